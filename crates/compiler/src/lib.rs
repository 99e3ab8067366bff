//! Nominal Compiler Library
//!
//! Compiles Nominal source text into the bytecode executed by the
//! runtime's virtual machine. The pipeline is:
//!
//! ```text
//! source → Lexer → Parser → Node (AST) → codegen → bytecode
//! ```
//!
//! Compilation appends to an existing bytecode buffer: a state compiles
//! each snippet onto the end of its shared buffer and executes from the
//! prior end to the new end, so functions defined by earlier snippets
//! keep their instruction pointers.
//!
//! The compiler shares the owning state's [`StringPool`]: identifiers and
//! string literals are interned during parsing, and the emitted bytecode
//! embeds the resulting ids.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;

pub use ast::{Node, Op};
pub use lexer::{Lexer, TokenType};
pub use parser::Parser;

use nominal_core::StringPool;

/// Compile a source snippet, appending its bytecode to `code`.
///
/// Returns the new end-of-bytecode index. On a parse error the buffer is
/// left untouched and the error reads `"<message> on line <n>"`.
pub fn compile(source: &str, pool: &mut StringPool, code: &mut Vec<u8>) -> Result<u32, String> {
    let mut parser = Parser::new(source, pool);
    let node = parser.parse()?;
    codegen::generate(&node, code);
    Ok(code.len() as u32)
}
