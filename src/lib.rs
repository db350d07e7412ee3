//! docsql - compiles a SQL subset into document-store commands.
//!
//! SELECT statements become aggregation pipelines (`$match`, `$lookup`,
//! `$group`, `$project`, `$sort`, ...); INSERT, UPDATE and DELETE become write
//! descriptors; BEGIN/COMMIT/ROLLBACK become transaction directives for the
//! execution layer. Compilation is pure: no I/O, no state kept between calls.
//!
//! # Main Components
//!
//! - **Lexer / Parser**: SQL text to [`sql::ast::Statement`]
//! - **Translator**: statement to [`CompiledCommand`], resolving tables through a [`TableRegistry`]
//! - **Binder**: `?` and `:name` parameters from [`Params`]

pub mod config;
pub mod error;
pub mod sql;

pub use config::{CompilerConfig, TableConfig};
pub use error::{CompileError, CompileResult};
pub use sql::{
    compile, parse, CompiledCommand, Compiler, FunctionTable, InMemoryRegistry, Params, Pipeline,
    Statement, TableEntry, TableRegistry, TransactionDirective,
};
