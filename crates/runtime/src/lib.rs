//! Nominal Runtime Library
//!
//! The embedding surface of the Nominal scripting language. A host
//! creates a [`State`], binds variables and native callbacks, and
//! evaluates source text:
//!
//! ```
//! use nominal_runtime::{State, Value};
//!
//! let mut state = State::new();
//! let result = state.evaluate("2 * 3 + 1");
//! assert_eq!(result.to_f64(), 7.0);
//!
//! state.let_var("greeting", Value::number(42.0));
//! assert_eq!(state.evaluate("greeting").to_f64(), 42.0);
//! ```
//!
//! Scripts manipulate numbers, booleans, strings, maps (the only
//! aggregate, doubling as array and record), and first-class functions.
//! Errors are latched on the state — check [`State::error`] after
//! evaluating and read [`State::get_error`] to clear.
//!
//! The crate re-exports the core value types, so depending on
//! `nominal-runtime` alone is enough to embed the language.

pub mod function;
pub mod heap;
pub mod map;
pub mod prelude;
pub mod state;

pub use function::{FunctionData, NativeFunction, MAX_FUNCTION_PARAMS};
pub use heap::{Heap, HeapData, HeapObject};
pub use map::MapData;
pub use nominal_core::{HeapObjectId, OpCode, StringId, StringPool, Value, ValueKind};
pub use state::{MapIterator, State, MAX_CALLSTACK_SIZE, MAX_STACK_SIZE};
