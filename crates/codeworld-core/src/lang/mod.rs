//! The candidate dialect: a small, Python-shaped language with no reflection,
//! no imports and no I/O.
//!
//! # Modules
//!
//! - [`lexer`]       — indentation-aware tokenizer
//! - [`parser`]      — `parse_module()` producing an [`ast::Module`]
//! - [`ast`]         — syntax tree, including constructs the validator refuses
//! - [`value`]       — runtime values, equality/ordering, JSON bridge
//! - [`ops`]         — arithmetic, membership, subscripts and slices
//! - [`builtins`]    — whitelisted builtins, `math`, container methods
//! - [`interpreter`] — tree-walking `Interpreter`
//! - [`heap`]        — live-heap accounting behind `MemoryError`
//! - [`error`]       — `ParseError` / `RuntimeError`

pub mod ast;
pub mod builtins;
pub mod error;
pub mod heap;
pub mod interpreter;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod value;

pub use error::{ExcKind, ParseError, ParseResult, RuntimeError, RuntimeResult};
pub use interpreter::{Interpreter, MAX_CALL_DEPTH};
pub use parser::parse_module;
pub use value::{from_json, json_values_equal, to_json, EncodeError, Value};
