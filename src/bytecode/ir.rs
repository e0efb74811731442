use std::collections::HashMap;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

use crate::bytecode::op::Inst;

/// An interned constant-pool entry.
///
/// Strings are stored as owned text rather than heap cells so a module
/// stays self-contained: each VM materializes string constants into its
/// own heap when it links the module, and a module can be shared
/// read-only across VM instances.
#[derive(Debug, Clone, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum Constant {
    Int(i64),
    Number(f64),
    Bool(bool),
    Str(String),
}

/// Structural value equality; numbers compare bit-exact so interning
/// never conflates distinct literals.
impl PartialEq for Constant {
    fn eq(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

/// A compiled function: its instruction stream plus the number of
/// register slots a frame must reserve (named locals and temporaries at
/// their joint high-water mark).
#[derive(Debug, Clone, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct Function {
    pub name: String,
    pub code: Vec<Inst>,
    pub locals_count: u16,
}

/// A compiled module: functions, the name table mapping function names
/// to their ids, and the interned constant pool. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct Module {
    pub functions: Vec<Function>,
    pub name_table: HashMap<String, u16>,
    pub constants: Vec<Constant>,
}

impl Module {
    pub fn function_id(&self, name: &str) -> Option<u16> {
        self.name_table.get(name).copied()
    }

    pub fn function(&self, id: u16) -> &Function {
        &self.functions[id as usize]
    }

    /// Serializes the module into the archived `.cbc` form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        rkyv::to_bytes::<_, 1024>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|_| "could not serialize bytecode module".to_string())
    }

    /// Deserializes a module written by `to_bytes`, validating the
    /// archive first.
    pub fn from_bytes(bytes: &[u8]) -> Result<Module, String> {
        rkyv::from_bytes::<Module>(bytes).map_err(|_| "malformed bytecode module".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::{Inst, Opcode};

    #[test]
    fn test_constant_equality_is_structural() {
        assert_eq!(Constant::Int(1), Constant::Int(1));
        assert_ne!(Constant::Int(1), Constant::Number(1.0));
        assert_ne!(Constant::Int(1), Constant::Bool(true));
        assert_eq!(
            Constant::Str("a".to_string()),
            Constant::Str("a".to_string())
        );
        assert_eq!(Constant::Number(2.5), Constant::Number(2.5));
        assert_ne!(Constant::Number(0.1), Constant::Number(0.2));
    }

    #[test]
    fn test_archive_roundtrip() {
        let module = Module {
            functions: vec![Function {
                name: "main".to_string(),
                code: vec![
                    Inst::with_s(Opcode::LoadConst, 0, 1),
                    Inst::abc(Opcode::RetVal, 0, 0, 0),
                ],
                locals_count: 1,
            }],
            name_table: HashMap::from([("main".to_string(), 0)]),
            constants: vec![Constant::Str("hi".to_string()), Constant::Int(42)],
        };

        let bytes = module.to_bytes().unwrap();
        let back = Module::from_bytes(&bytes).unwrap();
        assert_eq!(back.functions.len(), 1);
        assert_eq!(back.functions[0].name, "main");
        assert_eq!(back.functions[0].code, module.functions[0].code);
        assert_eq!(back.functions[0].locals_count, 1);
        assert_eq!(back.function_id("main"), Some(0));
        assert_eq!(back.constants, module.constants);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Module::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let module = Module {
            functions: vec![],
            name_table: HashMap::new(),
            constants: vec![Constant::Number(1.5)],
        };
        let json = serde_json::to_string(&module).unwrap();
        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back.constants, module.constants);
    }
}
