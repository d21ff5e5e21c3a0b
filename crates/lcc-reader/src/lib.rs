//! `lcc-reader`: a textual assembler for the quadruple IR `lcc-codegen`
//! consumes.
//!
//! `spec.md` scopes the lexer, recursive-descent parser, and AST-to-IR
//! translator for the source C-subset out of this workspace (`spec.md` §1's
//! Non-goals). This crate exists so the middle end can be exercised and
//! fuzzed end to end without one: it reads the same quadruple shape a real
//! front end would hand the middle end, just spelled out as text rather than
//! built by walking an AST. Modeled directly on `cranelift-reader`: a
//! hand-rolled `Lexer` producing a flat `Token` stream, and a `Parser` that
//! consumes it by recursive descent, reporting `Location`-tagged errors.

#[macro_use]
mod error;
mod lexer;
mod parser;

pub use error::{Location, ParseError, ParseResult};
pub use parser::parse_module;
