//! Function Objects
//!
//! A function is either scripted — a bytecode entry point plus an
//! ordered parameter list — or native, a host callback invoked with the
//! state. Native functions read their arguments through
//! `State::get_arg` / `State::get_arg_count` and never enter the VM
//! dispatch loop themselves.
//!
//! A scripted function captures the scope map that was on top of the
//! call stack when its FUNCTION instruction executed; variable lookup in
//! its body falls back to that scope (one hop — see the scope discipline
//! in `state`).

use crate::state::State;
use nominal_core::{StringId, Value};

/// A host callback. The callee reads arguments via `State::get_arg` and
/// returns the call's result.
pub type NativeFunction = fn(&mut State) -> Value;

/// The maximum number of parameters a scripted function may declare.
pub const MAX_FUNCTION_PARAMS: usize = 16;

/// The data of a function object.
pub struct FunctionData {
    /// Bytecode entry point. Zero for native functions, which the
    /// dispatch loop never jumps into.
    pub ip: u32,
    /// Parameter names in declaration order. Empty for native functions.
    pub params: Vec<StringId>,
    /// The host callback, when native.
    pub native: Option<NativeFunction>,
    /// The scope map captured at the function literal's evaluation, or
    /// nil for native and top-level functions with no surrounding scope.
    pub closure_scope: Value,
}

impl FunctionData {
    /// A scripted function starting at `ip`, capturing `closure_scope`.
    /// Parameters are added afterwards as the FUNCTION instruction's
    /// operands are decoded.
    pub fn scripted(ip: u32, closure_scope: Value) -> FunctionData {
        FunctionData {
            ip,
            params: Vec::new(),
            native: None,
            closure_scope,
        }
    }

    /// A native function wrapping a host callback.
    pub fn native(callback: NativeFunction) -> FunctionData {
        FunctionData {
            ip: 0,
            params: Vec::new(),
            native: Some(callback),
            closure_scope: Value::NIL,
        }
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}
