use std::collections::HashMap;

use crate::runtime::value::Value;
use crate::runtime::vm::Vm;

/// A host-provided routine. It receives the VM and the pre-staged
/// argument block and returns no value.
pub type HostFn = fn(&mut Vm, &[Value]);

/// Registry of host functions reachable from source code by name.
///
/// Host names live in their own namespace: codegen resolves calls
/// against the module's functions first, so a module function shadows a
/// host of the same name.
#[derive(Default)]
pub struct Environment {
    names: HashMap<String, u16>,
    funcs: Vec<HostFn>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    /// Registers `func` under `name`, replacing any previous registration
    /// of that name, and returns its id.
    pub fn add_host_func(&mut self, name: &str, func: HostFn) -> u16 {
        if let Some(&id) = self.names.get(name) {
            self.funcs[id as usize] = func;
            return id;
        }
        let id = self.funcs.len() as u16;
        self.funcs.push(func);
        self.names.insert(name.to_string(), id);
        id
    }

    pub fn host_id(&self, name: &str) -> Option<u16> {
        self.names.get(name).copied()
    }

    pub fn host_fn(&self, id: u16) -> HostFn {
        self.funcs[id as usize]
    }
}
