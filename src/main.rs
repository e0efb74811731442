use std::{env, fs, path::Path, process};

use cinder::bytecode::{compile, disasm, Module};
use cinder::frontend::parser::Parser;
use cinder::frontend::token_dumper::TokenDumper;
use cinder::frontend::checker;
use cinder::runtime::env::Environment;
use cinder::runtime::heap::Cell;
use cinder::runtime::value::Value;
use cinder::runtime::vm::Vm;

fn main() {
    let args: Vec<String> = env::args().collect();

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let ast_only = args.contains(&"--ast".to_string());
    let bytecode_only =
        args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());

    let emit_at = args.iter().position(|a| a == "--emit");
    let emit_path = match emit_at {
        Some(i) => match args.get(i + 1) {
            Some(path) => Some(path.clone()),
            None => {
                eprintln!("--emit needs an output path");
                process::exit(1);
            }
        },
        None => None,
    };

    // first non-flag argument that is not the --emit operand
    let filename = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && emit_at.map(|e| e + 1) != Some(*i))
        .map(|(_, a)| a.clone());

    let filename = match filename {
        Some(filename) => filename,
        None => {
            print_usage();
            return;
        }
    };

    let extension = Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension {
        "cbc" => run_bytecode_file(&filename),
        "cin" => {
            let source = match fs::read_to_string(&filename) {
                Ok(source) => source,
                Err(e) => {
                    eprintln!("failed to read '{}': {}", filename, e);
                    process::exit(1);
                }
            };

            if tokens_only {
                dump_tokens(&source, no_color, pretty);
                return;
            }

            run_source(&source, ast_only, bytecode_only, emit_path.as_deref());
        }
        _ => {
            eprintln!("expected a .cin or .cbc file, got '{}'", filename);
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("cinder - a small statically-typed scripting language");
    println!();
    println!("Usage:");
    println!("  cinder <file.cin>            Run a program");
    println!("  cinder <file.cbc>            Run a compiled module");
    println!("  cinder --tokens <file.cin>   Show tokens only (--no-color, --pretty)");
    println!("  cinder --ast <file.cin>      Show the parsed AST and exit");
    println!("  cinder --bc <file.cin>       Show the compiled bytecode and exit");
    println!("  cinder --emit <out> <file>   Compile and write the module to <out>");
    println!("                               (.json for JSON, anything else archived)");
}

/// Environment every cinder program runs against: `print` and `assert`.
/// The same registration order is used when compiling and when running,
/// so host ids embedded in saved modules stay valid.
fn base_env() -> Environment {
    let mut env = Environment::new();
    env.add_host_func("print", host_print);
    env.add_host_func("assert", host_assert);
    env
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) {
    let mut dumper = TokenDumper::new();
    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }
    if let Err(e) = dumper.dump(source) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run_source(source: &str, ast_only: bool, bytecode_only: bool, emit_path: Option<&str>) {
    let env = base_env();

    let mut ast = match Parser::new(source).parse_module() {
        Ok(ast) => ast,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if ast_only {
        println!("{:#?}", ast);
        return;
    }

    if let Err(e) = checker::check(&mut ast, &env) {
        eprintln!("{}", e);
        process::exit(1);
    }

    let module = compile::compile(&ast, &env);

    if bytecode_only {
        disasm::print_bc(&module);
        return;
    }

    if let Some(path) = emit_path {
        emit_module(&module, path);
        return;
    }

    exec_module(&module, env);
}

fn run_bytecode_file(filename: &str) {
    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read '{}': {}", filename, e);
            process::exit(1);
        }
    };
    let module = match Module::from_bytes(&bytes) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("'{}': {}", filename, e);
            process::exit(1);
        }
    };
    exec_module(&module, base_env());
}

fn exec_module(module: &Module, env: Environment) {
    if module.function_id("main").is_none() {
        eprintln!("module has no 'main' function");
        process::exit(1);
    }
    let mut vm = Vm::new(env);
    vm.exec(module);
}

fn emit_module(module: &Module, path: &str) {
    let result = if path.ends_with(".json") {
        match serde_json::to_string_pretty(module) {
            Ok(json) => fs::write(path, json),
            Err(e) => {
                eprintln!("could not serialize module: {}", e);
                process::exit(1);
            }
        }
    } else {
        match module.to_bytes() {
            Ok(bytes) => fs::write(path, bytes),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    };
    if let Err(e) = result {
        eprintln!("failed to write '{}': {}", path, e);
        process::exit(1);
    }
}

fn host_print(vm: &mut Vm, args: &[Value]) {
    let mut out = String::new();
    for (i, value) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match value {
            Value::Int(v) => out.push_str(&v.to_string()),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::Bool(b) => out.push_str(&b.to_string()),
            Value::Cell(cell) => match vm.heap().cell(*cell) {
                Cell::Str(s) => out.push_str(s),
                Cell::Object(_) => out.push_str("<obj>"),
            },
        }
    }
    println!("{}", out);
}

fn host_assert(_vm: &mut Vm, args: &[Value]) {
    if args.first().map_or(true, |value| value.is_zero()) {
        println!("assert failed");
        process::exit(1);
    }
}
