//! The Nominal State and Virtual Machine
//!
//! A `State` owns every other component: the value stack, the call
//! stack, the shared bytecode buffer, the heap, the string pool, the
//! intrinsic class registry, and the latched error. Evaluation flows
//! source → compiler → bytecode appended to the buffer → the dispatch
//! loop executes from the prior end-of-bytecode to the new end.
//!
//! ## Scope discipline
//!
//! Each call-stack frame carries a scope map (created lazily on the
//! first definition) and, for closures, the scope captured by the
//! function literal. `DEFINE` inserts into the top frame's scope;
//! `ASSIGN` and `FETCH` walk the frames newest to oldest, consulting
//! each frame's scope and then its closure scope.
//!
//! ## Errors
//!
//! Errors are latched: a single message and a flag. The dispatch loop
//! checks the flag after every instruction and unwinds. Reading the
//! error through [`State::get_error`] clears the flag so execution can
//! proceed.
//!
//! ## Nesting
//!
//! Native builtins re-enter the VM through [`State::call`]; the dispatch
//! loop records the call-stack depth at which it was invoked and stops
//! once a `RET` unwinds below it.

use crate::function::{FunctionData, NativeFunction};
use crate::heap::{Heap, HeapData};
use crate::map::MapData;
use crate::prelude;
use nominal_core::bytecode::{self, OpCode};
use nominal_core::stringpool::hash_bytes;
use nominal_core::{StringId, StringPool, Value, ValueKind};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// Value stack capacity; exceeding it is a fatal "Stack overflow".
pub const MAX_STACK_SIZE: usize = 128;

/// Call stack capacity.
pub const MAX_CALLSTACK_SIZE: usize = 32;

/// One element of the call stack.
struct Frame {
    return_ip: u32,
    argcount: u32,
    /// The frame's scope map, or nil until the first definition.
    scope: Value,
    /// The closure scope of the function executing in this frame, or
    /// nil.
    closure_scope: Value,
}

impl Frame {
    fn new(return_ip: u32, argcount: u32) -> Frame {
        Frame {
            return_ip,
            argcount,
            scope: Value::NIL,
            closure_scope: Value::NIL,
        }
    }
}

/// The intrinsic class maps, bound as global variables at startup.
pub(crate) struct Classes {
    pub class: Value,
    pub nil: Value,
    pub number: Value,
    pub boolean: Value,
    pub string: Value,
    pub map: Value,
    pub function: Value,
    pub module: Value,
}

/// Pre-interned strings the runtime looks up on hot paths.
pub(crate) struct Strings {
    pub name: Value,
    pub new: Value,
    pub add: Value,
    pub subtract: Value,
    pub multiply: Value,
    pub divide: Value,
}

/// A stateful iterator over a map's entries in insertion order.
///
/// The iterator is invalidated by any mutation of the map; callers must
/// not mutate while iterating (invalidation is not detected).
pub struct MapIterator {
    started: bool,
    index: usize,
    /// The key at the current position.
    pub key: Value,
    /// The value at the current position.
    pub value: Value,
}

impl MapIterator {
    pub fn new() -> MapIterator {
        MapIterator {
            started: false,
            index: 0,
            key: Value::NIL,
            value: Value::NIL,
        }
    }
}

impl Default for MapIterator {
    fn default() -> MapIterator {
        MapIterator::new()
    }
}

/// A Nominal interpreter instance.
///
/// States are self-contained; a host may create any number of them. A
/// state must only be used from one thread at a time.
pub struct State {
    stack: Vec<Value>,
    callstack: Vec<Frame>,
    bytecode: Vec<u8>,
    ip: u32,
    end: u32,
    heap: Heap,
    pool: StringPool,
    pub(crate) classes: Classes,
    pub(crate) strings: Strings,
    error: String,
    errorflag: bool,
}

impl State {
    /// Create a state with the intrinsic globals, classes, and prelude
    /// bound.
    pub fn new() -> State {
        let mut state = State {
            stack: Vec::with_capacity(MAX_STACK_SIZE),
            callstack: vec![Frame::new(0, 0)],
            bytecode: Vec::new(),
            ip: 0,
            end: 0,
            heap: Heap::new(),
            pool: StringPool::default(),
            classes: Classes {
                class: Value::NIL,
                nil: Value::NIL,
                number: Value::NIL,
                boolean: Value::NIL,
                string: Value::NIL,
                map: Value::NIL,
                function: Value::NIL,
                module: Value::NIL,
            },
            strings: Strings {
                name: Value::NIL,
                new: Value::NIL,
                add: Value::NIL,
                subtract: Value::NIL,
                multiply: Value::NIL,
                divide: Value::NIL,
            },
            error: String::new(),
            errorflag: false,
        };

        // Intrinsic global variables
        state.let_var("nil", Value::NIL);
        state.let_var("true", Value::TRUE);
        state.let_var("false", Value::FALSE);

        // Intrinsic strings
        state.strings.name = state.new_interned_string("name");
        state.strings.new = state.new_interned_string("new");
        state.strings.add = state.new_interned_string("add");
        state.strings.subtract = state.new_interned_string("subtract");
        state.strings.multiply = state.new_interned_string("multiply");
        state.strings.divide = state.new_interned_string("divide");

        // The intrinsic class map; its class is itself
        let class_class = state.new_map();
        let class_name = state.new_interned_string("Class");
        let name_key = state.strings.name;
        state.map_insert(class_class, name_key, class_name);
        state.let_var("Class", class_class);
        state.set_map_class(class_class, class_class);
        state.classes.class = class_class;

        // The other intrinsic classes
        state.classes.nil = state.new_class("Nil");
        state.classes.number = state.new_class("Number");
        state.classes.boolean = state.new_class("Boolean");
        state.classes.string = state.new_class("String");
        state.classes.map = state.new_class("Map");
        state.classes.function = state.new_class("Function");
        state.classes.module = state.new_class("Module");

        if !state.errorflag {
            prelude::register(&mut state);
        }

        debug!(
            globals = state.pool.len(),
            objects = state.heap.len(),
            "state created"
        );

        state
    }

    // =========================================================================
    // Compilation and execution
    // =========================================================================

    /// Compile and execute a source snippet. Results accumulate on the
    /// value stack; use [`State::evaluate`] for the common
    /// compile-execute-pop cycle.
    pub fn execute(&mut self, source: &str) {
        let saved_ip = self.ip;

        // Execution starts at the prior end of bytecode so nothing that
        // already ran is re-entered
        self.ip = self.end;

        self.compile(source);
        self.run();

        self.ip = saved_ip;
    }

    /// Compile and execute a source snippet, returning the resulting
    /// top-of-stack value (nil when the snippet produced nothing or an
    /// error is set).
    pub fn evaluate(&mut self, source: &str) -> Value {
        self.execute(source);
        if !self.errorflag && !self.stack.is_empty() {
            self.pop()
        } else {
            Value::NIL
        }
    }

    /// Read and execute a file. The working directory switches to the
    /// file's parent for the duration so relative `import` paths
    /// resolve, and is restored afterwards.
    pub fn do_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();

        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(_) => {
                let message = format!("Failed to open file '{}'", path.display());
                self.set_error(message);
                return;
            }
        };

        if source.is_empty() {
            let message = format!("Failed to read file '{}'", path.display());
            self.set_error(message);
            return;
        }

        let previous = std::env::current_dir().ok();
        let mut changed_directories = false;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && std::env::set_current_dir(parent).is_ok()
        {
            changed_directories = true;
        }

        self.execute(&source);

        if changed_directories
            && let Some(previous) = previous
        {
            let _ = std::env::set_current_dir(previous);
        }
    }

    /// Evaluate `<module>.ns` inside a fresh Module-classed map and
    /// return the map. Used by the `import` builtin.
    pub fn import(&mut self, module: &str) -> Value {
        let module_scope = self.new_map();
        let module_class = self.classes.module;
        self.set_map_class(module_scope, module_class);

        if !self.errorflag {
            let saved_ip = self.ip;

            // The module executes in its own frame whose scope is the
            // module map, so its definitions become the module's entries
            self.callstack.push(Frame::new(self.ip, 0));
            if let Some(frame) = self.callstack.last_mut() {
                frame.scope = module_scope;
            }

            let path = format!("{module}.ns");
            self.do_file(&path);

            self.callstack.pop();
            self.ip = saved_ip;
        }

        if !self.errorflag { module_scope } else { Value::NIL }
    }

    fn compile(&mut self, source: &str) {
        self.errorflag = false;

        match nominal_compiler::compile(source, &mut self.pool, &mut self.bytecode) {
            Ok(end) => self.end = end,
            Err(message) => self.set_error(message),
        }
    }

    /// The dispatch loop: execute from the current instruction pointer
    /// until the end of bytecode, the error flag, or a `RET` that
    /// unwinds past the invocation depth.
    fn run(&mut self) {
        let start_depth = self.callstack.len();
        let end = self.end;

        while self.ip < end && !self.errorflag {
            let byte = self.bytecode[self.ip as usize];
            self.ip += 1;

            let Some(op) = OpCode::from_byte(byte) else {
                self.set_error("Invalid opcode");
                break;
            };

            match op {
                OpCode::Push => {
                    let value = bytecode::read_value(&self.bytecode, &mut self.ip);
                    self.push(value);
                }

                OpCode::Pop => {
                    self.pop();
                }

                OpCode::Dup => {
                    let depth = bytecode::read_u32(&self.bytecode, &mut self.ip);
                    let value = self.peek(depth);
                    self.push(value);
                }

                OpCode::Add => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = self.add(left, right);
                    self.push(result);
                }

                OpCode::Sub => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = self.sub(left, right);
                    self.push(result);
                }

                OpCode::Mul => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = self.mul(left, right);
                    self.push(result);
                }

                OpCode::Div => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = self.div(left, right);
                    self.push(result);
                }

                OpCode::Neg => {
                    let value = self.pop();
                    let result = self.neg(value);
                    self.push(result);
                }

                OpCode::Eq => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = Value::boolean(self.equals(left, right));
                    self.push(result);
                }

                OpCode::Ne => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = Value::boolean(!self.equals(left, right));
                    self.push(result);
                }

                OpCode::Gt => {
                    let left = self.pop();
                    let right = self.pop();
                    self.push(Value::boolean(left.to_f64() > right.to_f64()));
                }

                OpCode::Gte => {
                    let left = self.pop();
                    let right = self.pop();
                    self.push(Value::boolean(left.to_f64() >= right.to_f64()));
                }

                OpCode::Lt => {
                    let left = self.pop();
                    let right = self.pop();
                    self.push(Value::boolean(left.to_f64() < right.to_f64()));
                }

                OpCode::Lte => {
                    let left = self.pop();
                    let right = self.pop();
                    self.push(Value::boolean(left.to_f64() <= right.to_f64()));
                }

                OpCode::And => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = Value::boolean(self.is_true(left) && self.is_true(right));
                    self.push(result);
                }

                OpCode::Or => {
                    let left = self.pop();
                    let right = self.pop();
                    let result = Value::boolean(self.is_true(left) || self.is_true(right));
                    self.push(result);
                }

                OpCode::Not => {
                    let value = self.pop();
                    let result = Value::boolean(!self.is_true(value));
                    self.push(result);
                }

                OpCode::Define => {
                    let id = bytecode::read_string_id(&self.bytecode, &mut self.ip);
                    let value = self.top();
                    self.let_interned(id, value);
                }

                OpCode::Assign => {
                    let id = bytecode::read_string_id(&self.bytecode, &mut self.ip);
                    let value = self.top();
                    self.set_interned(id, value);
                }

                OpCode::Fetch => {
                    let id = bytecode::read_string_id(&self.bytecode, &mut self.ip);
                    let value = self.get_interned(id);
                    self.push(value);
                }

                OpCode::Insert => {
                    let key = self.pop();
                    let map = self.pop();
                    let value = self.top();
                    if !self.insert_entry(map, key, value) {
                        let message =
                            format!("Value for key '{}' already exists", self.key_display(key));
                        self.set_error(message);
                    }
                }

                OpCode::Update => {
                    let key = self.pop();
                    let map = self.pop();
                    let value = self.top();
                    if !self.update_entry(map, key, value) {
                        let message = format!("No value for key '{}'", self.key_display(key));
                        self.set_error(message);
                    }
                }

                OpCode::Find => {
                    let key = self.pop();
                    let map = self.pop();
                    match self.find_entry(map, key) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!("No value for key '{}'", self.key_display(key));
                            self.set_error(message);
                        }
                    }
                }

                OpCode::Get => {
                    let key = self.pop();
                    let map = self.pop();
                    let value = self.get_entry(map, key);
                    self.push(value);
                }

                OpCode::Set => {
                    let key = self.pop();
                    let map = self.pop();
                    let value = self.top();
                    self.set_entry(map, key, value);
                }

                OpCode::Map => {
                    let count = bytecode::read_u32(&self.bytecode, &mut self.ip);
                    let map = self.new_map();
                    for _ in 0..count {
                        let key = self.pop();
                        let value = self.pop();
                        self.set_entry(map, key, value);
                    }
                    self.push(map);
                }

                OpCode::Function => {
                    let ip = bytecode::read_u32(&self.bytecode, &mut self.ip);
                    let count = bytecode::read_u32(&self.bytecode, &mut self.ip);

                    // Capture the defining frame's scope as the closure
                    // scope
                    let closure_scope = self
                        .callstack
                        .last()
                        .map(|frame| frame.scope)
                        .unwrap_or(Value::NIL);

                    let mut function = FunctionData::scripted(ip, closure_scope);
                    for _ in 0..count {
                        let param = bytecode::read_string_id(&self.bytecode, &mut self.ip);
                        function.params.push(param);
                    }

                    let value = Value::object(self.heap.alloc(HeapData::Function(function)));
                    self.push(value);
                }

                OpCode::ClassOf => {
                    let value = self.pop();
                    let class = self.class_of(value);
                    self.push(class);
                }

                OpCode::Jump => {
                    let target = bytecode::read_u32(&self.bytecode, &mut self.ip);
                    self.ip = target;
                }

                OpCode::JumpIf => {
                    let target = bytecode::read_u32(&self.bytecode, &mut self.ip);
                    let condition = self.pop();
                    if self.is_true(condition) {
                        self.ip = target;
                    }
                }

                OpCode::Call => {
                    let argcount = bytecode::read_u32(&self.bytecode, &mut self.ip);
                    self.call_on_stack(argcount, false);
                }

                OpCode::Ret => {
                    self.ret();
                    if self.callstack.len() < start_depth {
                        break;
                    }
                }
            }
        }
    }

    // =========================================================================
    // Call protocol
    // =========================================================================

    /// Invoke a callable value with the given arguments and return the
    /// result. This is the re-entry path native builtins use to run
    /// script functions passed to them.
    pub fn call(&mut self, value: Value, args: &[Value]) -> Value {
        let saved_sp = self.stack.len();

        for &arg in args {
            self.push(arg);
        }
        self.push(value);

        self.call_on_stack(args.len() as u32, true);

        if self.errorflag {
            // The unwind discards whatever partial state the call left
            self.stack.truncate(saved_sp);
            return Value::NIL;
        }

        self.pop()
    }

    /// Pop the callee off the stack and call it with `argcount` stacked
    /// arguments. With `execute` set, scripted callees run to completion
    /// through a nested dispatch loop (the host-call path); otherwise
    /// the current loop continues at the function's entry point.
    fn call_on_stack(&mut self, argcount: u32, execute: bool) {
        let value = self.pop();

        if !self.is_callable(value) {
            self.set_error("Value cannot be called");
            return;
        }

        // A class used as a callee resolves to its 'new' function
        let value = self.resolve_function(value);

        if self.callstack.len() >= MAX_CALLSTACK_SIZE {
            self.set_error("Stack overflow");
            return;
        }
        self.callstack.push(Frame::new(self.ip, argcount));

        // The callee's closure scope becomes part of the new frame's
        // lookup chain
        let closure_scope = self
            .function_data(value)
            .map(|function| function.closure_scope)
            .unwrap_or(Value::NIL);
        if self.is_map(closure_scope)
            && let Some(frame) = self.callstack.last_mut()
        {
            frame.closure_scope = closure_scope;
        }

        let (native, ip, params) = match self.function_data(value) {
            Some(function) => (function.native, function.ip, function.params.clone()),
            None => {
                // A class whose 'new' is missing resolves to itself
                self.set_error("Value cannot be called");
                return;
            }
        };

        if let Some(native) = native {
            let result = native(self);
            self.push(result);
            self.ret();
            return;
        }

        if argcount as usize > params.len() {
            let message = format!("Too many arguments given (expected {})", params.len());
            self.set_error(message);
            return;
        }

        // Bind parameters by peeking the stacked arguments; missing
        // arguments bind to nil
        for index in (0..params.len()).rev() {
            let arg = self.get_arg(index);
            self.let_interned(params[index], arg);
        }

        self.ip = ip;

        if execute {
            self.run();
        }
    }

    /// Pop the top frame: capture the return value, discard the
    /// arguments, restore the caller's instruction pointer, and push the
    /// return value in the arguments' place.
    fn ret(&mut self) {
        if self.callstack.len() <= 1 {
            self.set_error("Unexpected return");
            return;
        }

        let result = self.pop();

        let frame = self.callstack.pop().expect("call stack underflow");
        for _ in 0..frame.argcount {
            self.pop();
        }
        self.ip = frame.return_ip;

        self.push(result);
    }

    fn resolve_function(&mut self, value: Value) -> Value {
        if self.is_class(value) {
            let new_key = self.strings.new;
            if let Some(function) = self.find_entry(value, new_key)
                && self.is_function(function)
            {
                return function;
            }
        }
        value
    }

    /// The number of arguments in the current call frame. Native
    /// callbacks use this with [`State::get_arg`].
    pub fn get_arg_count(&self) -> usize {
        self.callstack
            .last()
            .map(|frame| frame.argcount as usize)
            .unwrap_or(0)
    }

    /// The argument at `index` in the current call frame, or nil when
    /// out of range.
    pub fn get_arg(&self, index: usize) -> Value {
        let argcount = self.get_arg_count();
        if index < argcount {
            self.peek((argcount - index - 1) as u32)
        } else {
            Value::NIL
        }
    }

    // =========================================================================
    // Variables and scope
    // =========================================================================

    /// Define a variable in the current scope. Errors if it already
    /// exists there.
    pub fn let_var(&mut self, identifier: &str, value: Value) {
        let id = self.pool.intern(identifier);
        self.let_interned(id, value);
    }

    /// Assign an existing variable, searching all visible scopes.
    /// Errors if no such variable exists.
    pub fn set_var(&mut self, identifier: &str, value: Value) {
        let id = self.pool.intern(identifier);
        self.set_interned(id, value);
    }

    /// Read a variable, searching all visible scopes. Errors (and
    /// returns nil) if no such variable exists.
    pub fn get_var(&mut self, identifier: &str) -> Value {
        let id = self.pool.intern(identifier);
        self.get_interned(id)
    }

    fn let_interned(&mut self, id: StringId, value: Value) {
        // The scope map is created on first use
        let mut scope = self
            .callstack
            .last()
            .map(|frame| frame.scope)
            .unwrap_or(Value::NIL);
        if !self.is_map(scope) {
            scope = self.new_map();
            if let Some(frame) = self.callstack.last_mut() {
                frame.scope = scope;
            }
        }

        let key = Value::interned(id);
        if !self.map_insert(scope, key, value) {
            let message = format!("Variable '{}' already exists", self.pool.lookup(id));
            self.set_error(message);
        }
    }

    fn set_interned(&mut self, id: StringId, value: Value) {
        let key = Value::interned(id);

        for index in (0..self.callstack.len()).rev() {
            let scope = self.callstack[index].scope;
            if self.map_update(scope, key, value) {
                return;
            }

            let closure_scope = self.callstack[index].closure_scope;
            if !closure_scope.is_nil() && self.map_update(closure_scope, key, value) {
                return;
            }
        }

        let message = format!("No variable '{}'", self.pool.lookup(id));
        self.set_error(message);
    }

    fn get_interned(&mut self, id: StringId) -> Value {
        let key = Value::interned(id);

        for index in (0..self.callstack.len()).rev() {
            let scope = self.callstack[index].scope;
            if let Some(value) = self.find_entry(scope, key) {
                return value;
            }

            let closure_scope = self.callstack[index].closure_scope;
            if !closure_scope.is_nil()
                && let Some(value) = self.find_entry(closure_scope, key)
            {
                return value;
            }
        }

        let message = format!("No variable '{}' in scope", self.pool.lookup(id));
        self.set_error(message);
        Value::NIL
    }

    // =========================================================================
    // Value constructors and predicates
    // =========================================================================

    /// Create an empty map.
    pub fn new_map(&mut self) -> Value {
        Value::object(self.heap.alloc(HeapData::Map(MapData::new())))
    }

    /// Create a heap-allocated (non-interned) string.
    pub fn new_string(&mut self, value: &str) -> Value {
        Value::object(self.heap.alloc(HeapData::Str(value.to_string())))
    }

    /// Create an interned string.
    pub fn new_interned_string(&mut self, value: &str) -> Value {
        Value::interned(self.pool.intern(value))
    }

    /// Wrap a native callback as a function value.
    pub fn new_function(&mut self, callback: NativeFunction) -> Value {
        Value::object(self.heap.alloc(HeapData::Function(FunctionData::native(
            callback,
        ))))
    }

    /// Create a class map with the given name and bind it as a global
    /// variable.
    pub fn new_class(&mut self, name: &str) -> Value {
        let class_name = self.new_interned_string(name);
        let class_value = self.new_map();
        let name_key = self.strings.name;
        self.map_insert(class_value, name_key, class_name);
        let class_class = self.classes.class;
        self.set_map_class(class_value, class_class);

        self.let_var(name, class_value);

        class_value
    }

    /// Whether the value is a string (interned or heap).
    pub fn is_string(&self, value: Value) -> bool {
        value.is_interned_string()
            || matches!(self.heap_data(value), Some(HeapData::Str(_)))
    }

    /// Whether the value is a map.
    pub fn is_map(&self, value: Value) -> bool {
        matches!(self.heap_data(value), Some(HeapData::Map(_)))
    }

    /// Whether the value is a function.
    pub fn is_function(&self, value: Value) -> bool {
        matches!(self.heap_data(value), Some(HeapData::Function(_)))
    }

    /// Whether the value is a class: a map whose class is the intrinsic
    /// Class class.
    pub fn is_class(&self, value: Value) -> bool {
        let class = self.map_class(value);
        !self.classes.class.is_nil() && class.raw() == self.classes.class.raw()
    }

    /// Whether calling the value can succeed: a function, or a class
    /// (resolved to its 'new' function).
    pub fn is_callable(&self, value: Value) -> bool {
        self.is_function(value) || self.is_class(value)
    }

    /// Whether the value can be iterated (maps only).
    pub fn is_iterable(&self, value: Value) -> bool {
        self.is_map(value)
    }

    /// The string content of a string value.
    pub fn get_string(&self, value: Value) -> Option<&str> {
        if value.is_interned_string() {
            return Some(self.pool.lookup(value.payload()));
        }
        match self.heap_data(value) {
            Some(HeapData::Str(string)) => Some(string),
            _ => None,
        }
    }

    /// Truthiness: booleans by their payload, everything else by
    /// inequality with nil (note that all numbers are true, zero
    /// included).
    pub fn is_true(&self, value: Value) -> bool {
        if value.is_boolean() {
            value.as_boolean()
        } else {
            !self.equals(value, Value::NIL)
        }
    }

    /// Semantic equality: numbers by IEEE comparison, strings by content
    /// when either side is non-interned, everything else by raw
    /// identity.
    pub fn equals(&self, left: Value, right: Value) -> bool {
        if left.is_number() {
            return f64::from_bits(left.raw()) == f64::from_bits(right.raw());
        }

        if self.is_string(left)
            && self.is_string(right)
            && !(left.is_interned_string() && right.is_interned_string())
        {
            return self.get_string(left) == self.get_string(right);
        }

        left.raw() == right.raw()
    }

    /// Value hash, agreeing with [`State::equals`]: equal values hash
    /// equal. Interned strings use the pooled hash, heap strings hash
    /// their bytes, numbers hash their bit pattern (`-0.0`
    /// canonicalized), everything else hashes its raw bits.
    pub fn hash(&self, value: Value) -> u64 {
        if value.is_interned_string() {
            return self.pool.hash_of(value.payload());
        }
        if let Some(HeapData::Str(string)) = self.heap_data(value) {
            return hash_bytes(string.as_bytes());
        }
        if value.is_number() && value.to_f64() == 0.0 {
            return 0.0f64.to_bits();
        }
        value.raw()
    }

    /// Render a value the way the REPL and `to_string` builtin print it.
    pub fn to_string(&self, value: Value) -> String {
        match value.kind() {
            ValueKind::Nil => "nil".to_string(),
            ValueKind::Number => format!("{}", value.to_f64()),
            ValueKind::Boolean => if value.as_boolean() { "true" } else { "false" }.to_string(),
            ValueKind::InternedString => format!("\"{}\"", self.pool.lookup(value.payload())),
            ValueKind::Object => match self.heap_data(value) {
                Some(HeapData::Str(string)) => format!("\"{string}\""),
                Some(HeapData::Map(map)) => {
                    let contiguous = map.is_contiguous();
                    let mut out = String::from("{");
                    for (index, &key) in map.keys().iter().enumerate() {
                        out.push_str(if index == 0 { " " } else { ", " });
                        if !contiguous {
                            out.push_str(&self.to_string(key));
                            out.push_str(" -> ");
                        }
                        out.push_str(&self.to_string(self.get_entry(value, key)));
                    }
                    out.push_str(" }");
                    out
                }
                Some(HeapData::Function(_)) => {
                    format!("<function with ID 0x{:08x}>", value.payload())
                }
                None => "<unknown>".to_string(),
            },
        }
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    /// Add two values. Non-numeric operands dispatch to the left
    /// operand's class method `add`, if any.
    pub fn add(&mut self, left: Value, right: Value) -> Value {
        let method = self.strings.add;
        self.arithmetic(left, right, |a, b| a + b, "add", method)
    }

    /// Subtract, with class fallback to `subtract`.
    pub fn sub(&mut self, left: Value, right: Value) -> Value {
        let method = self.strings.subtract;
        self.arithmetic(left, right, |a, b| a - b, "subtract", method)
    }

    /// Multiply, with class fallback to `multiply`.
    pub fn mul(&mut self, left: Value, right: Value) -> Value {
        let method = self.strings.multiply;
        self.arithmetic(left, right, |a, b| a * b, "multiply", method)
    }

    /// Divide, with class fallback to `divide`.
    pub fn div(&mut self, left: Value, right: Value) -> Value {
        let method = self.strings.divide;
        self.arithmetic(left, right, |a, b| a / b, "divide", method)
    }

    /// Negate a number.
    pub fn neg(&mut self, value: Value) -> Value {
        if !value.is_number() {
            self.set_error("Cannot negate a non-numeric value");
            return Value::NIL;
        }
        Value::number(-value.to_f64())
    }

    fn arithmetic(
        &mut self,
        left: Value,
        right: Value,
        op: fn(f64, f64) -> f64,
        name: &str,
        method: Value,
    ) -> Value {
        if left.is_number() && right.is_number() {
            return Value::number(op(left.to_f64(), right.to_f64()));
        }

        // Class-method fallback: the left operand's class may supply the
        // operation
        let class = self.map_class(left);
        if self.is_true(class)
            && let Some(function) = self.find_entry(class, method)
            && self.is_function(function)
        {
            return self.call(function, &[left, right]);
        }

        let message = format!("Cannot {name} non-numeric values");
        self.set_error(message);
        Value::NIL
    }

    // =========================================================================
    // Classes
    // =========================================================================

    /// The canonical class of a value: the intrinsic class for each
    /// variant, or a map's explicit class when set.
    pub fn class_of(&self, value: Value) -> Value {
        match value.kind() {
            ValueKind::Nil => self.classes.nil,
            ValueKind::Number => self.classes.number,
            ValueKind::Boolean => self.classes.boolean,
            ValueKind::InternedString => self.classes.string,
            ValueKind::Object => {
                let class = self.map_class(value);
                if self.is_true(class) {
                    return class;
                }
                match self.heap_data(value) {
                    Some(HeapData::Str(_)) => self.classes.string,
                    Some(HeapData::Map(_)) => self.classes.map,
                    Some(HeapData::Function(_)) => self.classes.function,
                    None => Value::NIL,
                }
            }
        }
    }

    /// A map's class, or nil.
    pub fn map_class(&self, map: Value) -> Value {
        match self.heap_data(map) {
            Some(HeapData::Map(data)) => data.class(),
            _ => Value::NIL,
        }
    }

    /// Set a map's class.
    pub fn set_map_class(&mut self, map: Value, class: Value) {
        if let Some(HeapData::Map(data)) = self.heap_data_mut(map) {
            data.set_class(class);
        }
    }

    // =========================================================================
    // Map operations
    // =========================================================================

    /// Insert a new entry. Returns false if the target is not a map or
    /// the key already has a value.
    pub fn map_insert(&mut self, map: Value, key: Value, value: Value) -> bool {
        self.insert_entry(map, key, value)
    }

    /// Update an existing entry. Returns false if the target is not a
    /// map or the key has no value.
    pub fn map_update(&mut self, map: Value, key: Value, value: Value) -> bool {
        self.update_entry(map, key, value)
    }

    /// Insert or update. Returns true when a new entry was inserted.
    pub fn map_set(&mut self, map: Value, key: Value, value: Value) -> bool {
        self.set_entry(map, key, value)
    }

    /// The value for a key, if present.
    pub fn map_find(&self, map: Value, key: Value) -> Option<Value> {
        self.find_entry(map, key)
    }

    /// The value for a key, or nil.
    pub fn map_get(&self, map: Value, key: Value) -> Value {
        self.get_entry(map, key)
    }

    /// Advance a map iterator. Returns false (and resets the iterator's
    /// key and value to nil) at the end.
    pub fn next(&self, map: Value, iterator: &mut MapIterator) -> bool {
        let Some(HeapData::Map(data)) = self.heap_data(map) else {
            return false;
        };

        if iterator.started {
            iterator.index += 1;
        } else {
            iterator.started = true;
            iterator.index = 0;
        }

        match data.keys().get(iterator.index).copied() {
            Some(key) => {
                iterator.key = key;
                iterator.value = self.get_entry(map, key);
                true
            }
            None => {
                iterator.key = Value::NIL;
                iterator.value = Value::NIL;
                false
            }
        }
    }

    fn insert_entry(&mut self, map: Value, key: Value, value: Value) -> bool {
        let canonical = self.key_for_insert(key);
        match self.heap_data_mut(map) {
            Some(HeapData::Map(data)) => data.insert(canonical, key, value),
            _ => false,
        }
    }

    fn update_entry(&mut self, map: Value, key: Value, value: Value) -> bool {
        let Some(canonical) = self.key_for_lookup(key) else {
            return false;
        };
        match self.heap_data_mut(map) {
            Some(HeapData::Map(data)) => data.update(canonical, value),
            _ => false,
        }
    }

    fn set_entry(&mut self, map: Value, key: Value, value: Value) -> bool {
        let canonical = self.key_for_insert(key);
        match self.heap_data_mut(map) {
            Some(HeapData::Map(data)) => data.set(canonical, key, value),
            _ => false,
        }
    }

    fn find_entry(&self, map: Value, key: Value) -> Option<Value> {
        let canonical = self.key_for_lookup(key)?;
        match self.heap_data(map) {
            Some(HeapData::Map(data)) => data.find(canonical),
            _ => None,
        }
    }

    fn get_entry(&self, map: Value, key: Value) -> Value {
        self.find_entry(map, key).unwrap_or(Value::NIL)
    }

    /// The canonical raw-bit form of a key, interning heap-string keys
    /// so equal content addresses the same entry.
    fn key_for_insert(&mut self, key: Value) -> u64 {
        if key.is_object()
            && let Some(HeapData::Str(string)) = self.heap_data(key)
        {
            let content = string.clone();
            let id = self.pool.intern(&content);
            return Value::interned(id).raw();
        }
        Self::canonical_raw(key)
    }

    /// The canonical form for lookup, without interning. `None` means
    /// the key cannot be present (a heap string whose content was never
    /// interned).
    fn key_for_lookup(&self, key: Value) -> Option<u64> {
        if key.is_object()
            && let Some(HeapData::Str(string)) = self.heap_data(key)
        {
            let id = self.pool.find(string)?;
            return Some(Value::interned(id).raw());
        }
        Some(Self::canonical_raw(key))
    }

    fn canonical_raw(key: Value) -> u64 {
        // -0.0 and 0.0 are equal numbers and must address the same entry
        if key.is_number() && key.to_f64() == 0.0 {
            return 0.0f64.to_bits();
        }
        key.raw()
    }

    fn key_display(&self, key: Value) -> String {
        match self.get_string(key) {
            Some(string) => string.to_string(),
            None => self.to_string(key),
        }
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Whether the error flag is set. Does not clear it.
    pub fn error(&self) -> bool {
        self.errorflag
    }

    /// Set the error message and latch the flag.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = message.into();
        self.errorflag = true;
    }

    /// Read the error message, clearing the flag so execution can
    /// proceed.
    pub fn get_error(&mut self) -> &str {
        self.errorflag = false;
        &self.error
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Collect unreachable heap objects. The roots are every value on
    /// the stack plus every frame's scope and closure scope; maps
    /// contribute their keys and values, functions their closure scope.
    /// Pinned objects (see [`State::acquire`]) survive regardless.
    ///
    /// Collection only happens when requested — there is no automatic
    /// trigger.
    pub fn collect_garbage(&mut self) -> u32 {
        let mut pending: Vec<Value> = self.stack.clone();
        for frame in &self.callstack {
            pending.push(frame.scope);
            pending.push(frame.closure_scope);
        }

        while let Some(value) = pending.pop() {
            if !value.is_object() {
                continue;
            }
            let id = value.payload();
            if self.heap.is_marked(id) {
                continue;
            }
            self.heap.mark(id);

            match self.heap.data(id) {
                Some(HeapData::Map(map)) => {
                    pending.extend(map.keys().iter().copied());
                    pending.extend(map.values().copied());
                }
                Some(HeapData::Function(function)) => pending.push(function.closure_scope),
                _ => {}
            }
        }

        let collected = self.heap.sweep();
        debug!(collected, live = self.heap.live_count(), "swept heap");
        collected
    }

    /// Pin an object so garbage collection cannot free it. Used for
    /// values held by the host across evaluations.
    pub fn acquire(&mut self, value: Value) {
        if value.is_object()
            && let Some(object) = self.heap.object_mut(value.payload())
        {
            object.refcount += 1;
        }
    }

    /// Release a pin taken by [`State::acquire`].
    pub fn release(&mut self, value: Value) {
        if value.is_object()
            && let Some(object) = self.heap.object_mut(value.payload())
        {
            object.refcount = object.refcount.saturating_sub(1);
        }
    }

    /// Number of live heap objects (diagnostics and tests).
    pub fn live_object_count(&self) -> usize {
        self.heap.live_count()
    }

    // =========================================================================
    // Disassembly
    // =========================================================================

    /// Render the state's entire bytecode buffer as a disassembly
    /// listing.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut ip: u32 = 0;

        while ip < self.end {
            let at = ip;
            let byte = self.bytecode[ip as usize];
            ip += 1;

            let Some(op) = OpCode::from_byte(byte) else {
                let _ = writeln!(out, "0x{at:08x}: INVALID");
                continue;
            };

            let _ = write!(out, "0x{:08x}: {}", at, op.name());

            match op {
                OpCode::Push => {
                    let value = bytecode::read_value(&self.bytecode, &mut ip);
                    let _ = write!(out, "\t{}", self.to_string(value));
                }
                OpCode::Dup | OpCode::Map | OpCode::Call => {
                    let count = bytecode::read_u32(&self.bytecode, &mut ip);
                    let _ = write!(out, "\t{count}");
                }
                OpCode::Define | OpCode::Assign | OpCode::Fetch => {
                    let id = bytecode::read_string_id(&self.bytecode, &mut ip);
                    let _ = write!(out, "\t{}", self.pool.lookup(id));
                }
                OpCode::Function => {
                    let target = bytecode::read_u32(&self.bytecode, &mut ip);
                    let count = bytecode::read_u32(&self.bytecode, &mut ip);
                    let _ = write!(out, "\t0x{target:08x} {count}");
                    for _ in 0..count {
                        let id = bytecode::read_string_id(&self.bytecode, &mut ip);
                        let _ = write!(out, " {}", self.pool.lookup(id));
                    }
                }
                OpCode::Jump | OpCode::JumpIf => {
                    let target = bytecode::read_u32(&self.bytecode, &mut ip);
                    let _ = write!(out, "\t0x{target:08x}");
                }
                _ => {}
            }

            out.push('\n');
        }

        out
    }

    // =========================================================================
    // Stack primitives
    // =========================================================================

    fn push(&mut self, value: Value) {
        if self.stack.len() >= MAX_STACK_SIZE {
            self.set_error("Stack overflow");
            return;
        }
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::NIL)
    }

    fn top(&self) -> Value {
        self.stack.last().copied().unwrap_or(Value::NIL)
    }

    fn peek(&self, depth: u32) -> Value {
        let len = self.stack.len();
        if (depth as usize) < len {
            self.stack[len - 1 - depth as usize]
        } else {
            Value::NIL
        }
    }

    fn heap_data(&self, value: Value) -> Option<&HeapData> {
        if value.is_object() {
            self.heap.data(value.payload())
        } else {
            None
        }
    }

    fn heap_data_mut(&mut self, value: Value) -> Option<&mut HeapData> {
        if value.is_object() {
            self.heap.data_mut(value.payload())
        } else {
            None
        }
    }

    fn function_data(&self, value: Value) -> Option<&FunctionData> {
        match self.heap_data(value) {
            Some(HeapData::Function(function)) => Some(function),
            _ => None,
        }
    }
}

impl Default for State {
    fn default() -> State {
        State::new()
    }
}
