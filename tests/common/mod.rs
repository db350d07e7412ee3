//! Common test utilities for SQL compilation tests
//!
//! Provides shared helpers for:
//! - Building a table registry with the usual test tables
//! - Compiling statements and extracting pipelines as JSON

#![allow(dead_code)]

use docsql::{
    CompileResult, CompiledCommand, Compiler, CompilerConfig, InMemoryRegistry, Params, TableEntry,
};
use serde_json::Value;

pub fn create_registry() -> InMemoryRegistry {
    let mut registry = InMemoryRegistry::new();
    registry.register_collection("users");
    registry.register_collection("orders");
    registry.register_collection("products");
    registry.register_collection("archive");
    registry.register(
        "people",
        TableEntry::new("app_people")
            .with_field("id", "_id")
            .with_index_hint("idx_people_city"),
    );
    registry
}

pub fn create_compiler() -> Compiler<InMemoryRegistry> {
    Compiler::new(create_registry(), CompilerConfig::default())
}

pub fn try_compile(sql: &str, params: &Params) -> CompileResult<CompiledCommand> {
    create_compiler().compile(sql, params)
}

/// Compiles with no parameters and returns the command as JSON.
pub fn compile_json(sql: &str) -> Value {
    compile_json_with(sql, &Params::new())
}

pub fn compile_json_with(sql: &str, params: &Params) -> Value {
    let command = try_compile(sql, params)
        .unwrap_or_else(|e| panic!("Failed to compile {:?}: {}", sql, e));
    serde_json::to_value(&command).expect("command serializes")
}

/// The pipeline stages of a SELECT.
pub fn pipeline(sql: &str) -> Vec<Value> {
    pipeline_with(sql, &Params::new())
}

pub fn pipeline_with(sql: &str, params: &Params) -> Vec<Value> {
    match try_compile(sql, params) {
        Ok(CompiledCommand::Select(p)) => p.pipeline,
        Ok(other) => panic!("Expected a Select command, got {:?}", other),
        Err(e) => panic!("Failed to compile {:?}: {}", sql, e),
    }
}
