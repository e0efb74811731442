use std::fmt::Write;

use crate::bytecode::ir::{Constant, Function, Module};
use crate::bytecode::op::{Inst, Opcode};

/// Prints the disassembly of a whole module.
pub fn print_bc(module: &Module) {
    print!("{}", disassemble(module));
}

/// Renders a module as text: the constant pool, then one listing per
/// function in id order.
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();

    if !module.constants.is_empty() {
        out.push_str("constants:\n");
        for (i, constant) in module.constants.iter().enumerate() {
            let rendered = match constant {
                Constant::Int(v) => v.to_string(),
                Constant::Number(n) => format!("{:?}", n),
                Constant::Bool(b) => b.to_string(),
                Constant::Str(s) => format!("{:?}", s),
            };
            let _ = writeln!(out, "  [{}] {}", i, rendered);
        }
        out.push('\n');
    }

    for function in &module.functions {
        disassemble_function(function, &mut out);
        out.push('\n');
    }
    out
}

pub fn disassemble_function(function: &Function, out: &mut String) {
    let _ = writeln!(
        out,
        "func {} ({} instructions, {} registers)",
        function.name,
        function.code.len(),
        function.locals_count
    );

    let targets: Vec<usize> = function
        .code
        .iter()
        .filter(|inst| matches!(inst.op, Opcode::Br | Opcode::CondBr))
        .map(|inst| inst.s() as usize)
        .collect();

    for (ip, inst) in function.code.iter().enumerate() {
        let marker = if targets.contains(&ip) { "► " } else { "  " };
        let _ = writeln!(out, "{:04} {}{}", ip, marker, format_inst(inst));
    }
}

fn format_inst(inst: &Inst) -> String {
    let (a, b, c, s) = (inst.a, inst.b, inst.c, inst.s());
    match inst.op {
        Opcode::Br => format!("br {}", s),
        Opcode::CondBr => format!("condbr r{} {}", a, s),
        Opcode::Call => format!("call {} -> r{}", s, a),
        Opcode::CallHost => format!("callhost {} ({} args)", s, a),
        Opcode::Arg => format!("arg {} r{}", a, b),
        Opcode::Ret => "ret".to_string(),
        Opcode::RetVal => format!("retval r{}", a),
        Opcode::Move => format!("move r{} r{}", a, b),
        Opcode::ObjectNew => format!("objnew r{}", a),
        Opcode::ObjectSet => format!("objset r{}[r{}] = r{}", a, b, c),
        Opcode::ObjectGet => format!("objget r{} = r{}[r{}]", a, b, c),
        Opcode::Convert => format!("convert r{} r{}", a, b),
        Opcode::Truncate => format!("truncate r{} r{}", a, b),
        Opcode::LoadConst => format!("const r{} = [{}]", a, s),
        op => format!("{} r{} r{} -> r{}", binary_mnemonic(op), a, b, c),
    }
}

fn binary_mnemonic(op: Opcode) -> &'static str {
    match op {
        Opcode::NumberAdd => "add.n",
        Opcode::NumberSub => "sub.n",
        Opcode::NumberMul => "mul.n",
        Opcode::NumberDiv => "div.n",
        Opcode::NumberEq => "eq.n",
        Opcode::NumberNotEq => "noteq.n",
        Opcode::NumberGr => "gr.n",
        Opcode::NumberLess => "less.n",
        Opcode::NumberGrEq => "gr_eq.n",
        Opcode::NumberLessEq => "less_eq.n",
        Opcode::IntAdd => "add.i",
        Opcode::IntSub => "sub.i",
        Opcode::IntMul => "mul.i",
        Opcode::IntDiv => "div.i",
        Opcode::IntEq => "eq.i",
        Opcode::IntNotEq => "noteq.i",
        Opcode::IntGr => "gr.i",
        Opcode::IntLess => "less.i",
        Opcode::IntGrEq => "gr_eq.i",
        Opcode::IntLessEq => "less_eq.i",
        op => unreachable!("{:?} is not a binary operation", op),
    }
}
