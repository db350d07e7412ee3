//! SQL front-end: tokenizer, parser and lowering to document-store commands.
//!
//! ```rust
//! use docsql::sql::{Compiler, InMemoryRegistry, Params};
//! use docsql::CompilerConfig;
//! use serde_json::json;
//!
//! let mut registry = InMemoryRegistry::new();
//! registry.register_collection("users");
//!
//! let compiler = Compiler::new(registry, CompilerConfig::default());
//! let command = compiler
//!     .compile("SELECT * FROM users WHERE age > ? LIMIT 10", &Params::new().push(25))
//!     .unwrap();
//! assert_eq!(
//!     serde_json::to_value(&command).unwrap(),
//!     json!({
//!         "kind": "Select",
//!         "collection": "users",
//!         "pipeline": [{"$match": {"age": {"$gt": 25}}}, {"$limit": 10}]
//!     })
//! );
//! ```

pub mod ast;
pub mod binder;
pub mod command;
mod expr;
mod filter;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod registry;
mod translator;

use std::collections::HashMap;

use serde_json::Value;

pub use ast::Statement;
pub use binder::Params;
pub use command::{CompiledCommand, Pipeline, TransactionDirective};
pub use functions::{FunctionTable, ScalarRule};
pub use lexer::{SqlLexer, Token};
pub use parser::{parse, SqlParser};
pub use registry::{InMemoryRegistry, TableEntry, TableRegistry};

use crate::config::CompilerConfig;
use crate::error::CompileResult;
use translator::Translator;

/// Compiles SQL statements against a table registry.
///
/// Holds no per-statement state, so one compiler can serve any number of
/// compilations, concurrently if the registry allows it.
#[derive(Debug, Clone)]
pub struct Compiler<R> {
    registry: R,
    functions: FunctionTable,
    config: CompilerConfig,
}

impl<R: TableRegistry> Compiler<R> {
    pub fn new(registry: R, config: CompilerConfig) -> Self {
        Self {
            registry,
            functions: FunctionTable::builtin(),
            config,
        }
    }

    /// Replaces the scalar function table.
    pub fn with_functions(mut self, functions: FunctionTable) -> Self {
        self.functions = functions;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Parses, lowers and binds one statement.
    pub fn compile(&self, sql: &str, params: &Params) -> CompileResult<CompiledCommand> {
        let statement = parse(sql)?;
        let mut translator = Translator::new(&self.registry, &self.functions, &self.config, params);
        let command = translator.translate(&statement)?;
        translator.finish()?;

        tracing::debug!(
            kind = command.kind(),
            collection = command.collection().unwrap_or("-"),
            positional = params.positional().len(),
            "compiled statement"
        );
        Ok(command)
    }
}

/// One-shot compilation with default configuration.
pub fn compile<R: TableRegistry>(
    registry: R,
    sql: &str,
    named: HashMap<String, Value>,
    positional: Vec<Value>,
) -> CompileResult<CompiledCommand> {
    let params = Params::from_parts(named, positional);
    Compiler::new(registry, CompilerConfig::default()).compile(sql, &params)
}
