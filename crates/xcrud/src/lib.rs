//! xcrud - X Protocol CRUD statement compiler
//!
//! Turns X DevAPI style CRUD descriptors (collection, criteria text, bound
//! values, sort/limit clauses) into X Protocol `Crud.Find`, `Crud.Update` and
//! `Crud.Delete` messages, and tracks which statements are worth preparing
//! on the server.
//!
//! ## Quick Start
//!
//! ```ignore
//! use xcrud::{Mode, Statement, compile};
//! use xcrud::protocol::Encode;
//!
//! let stmt = Statement::find("people")
//!     .schema("test")
//!     .criteria("age > :min AND name LIKE :pattern")
//!     .bind("min", 18)
//!     .bind("pattern", "A%")
//!     .order_by("age DESC")
//!     .limit(10);
//!
//! let message = compile(&stmt, Mode::Execute)?;
//! let payload = message.to_bytes();
//! ```
//!
//! ## Prepared statements
//!
//! A [`StatementRegistry`] owns the per-session prepared-statement state. Call
//! [`StatementRegistry::decide`] on every execution and send the messages of
//! the returned [`Plan`] in order:
//!
//! ```ignore
//! let mut registry = StatementRegistry::new();
//! let handle = registry.register();
//! let plan = registry.decide(handle, &stmt)?;   // first run: direct
//! let plan = registry.decide(handle, &stmt)?;   // second run: prepare + execute
//! ```

pub mod ast;
mod compile;
pub mod parse;
mod prepared;
mod pretty;
pub mod protocol;
pub mod value;

use thiserror::Error;

// ============ Primary Public API ============

pub use compile::{
    FindClauses, Fragment, Mode, Operation, Statement, Target, UpdateSpec, bind_args, compile,
    compile_prepared,
};
pub use parse::{GrammarStart, ParseError, ParseOptions, Parsed, parse, parse_with};
pub use prepared::{Decision, Plan, StatementHandle, StatementRegistry, StatementState};
pub use value::{NotEncodable, Value};

// ============ Errors ============

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("No value bound for placeholder '{0}'")]
    UnboundPlaceholder(String),
    #[error(transparent)]
    NotEncodable(#[from] NotEncodable),
}

/// Failure to turn descriptor text into wire messages.
#[derive(Error, Debug)]
pub enum XcrudError {
    #[error("Invalid descriptor JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),
}
