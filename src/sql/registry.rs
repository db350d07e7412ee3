//! Table-to-collection registry consulted during lowering.

use std::collections::HashMap;

use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};

/// What a statement-level table name resolves to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableEntry {
    /// Backing collection name
    pub collection: String,
    /// Statement field name -> stored field name
    pub field_map: HashMap<String, String>,
    pub index_hints: Vec<String>,
}

impl TableEntry {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, stored: impl Into<String>) -> Self {
        self.field_map.insert(name.into(), stored.into());
        self
    }

    pub fn with_index_hint(mut self, index: impl Into<String>) -> Self {
        self.index_hints.push(index.into());
        self
    }

    /// Stored path for a statement-level field path. Only the first segment
    /// is remapped; nested segments pass through.
    pub fn stored_path(&self, path: &str) -> String {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let head = self.field_map.get(head).map(String::as_str).unwrap_or(head);
        match rest {
            Some(rest) => format!("{}.{}", head, rest),
            None => head.to_string(),
        }
    }
}

/// Read-only table lookup used by the compiler.
pub trait TableRegistry {
    fn resolve(&self, name: &str) -> CompileResult<TableEntry>;
}

/// Registry populated once at start-up.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    tables: HashMap<String, TableEntry>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`; a later registration of the same name replaces it.
    pub fn register(&mut self, name: impl Into<String>, entry: TableEntry) {
        self.tables.insert(name.into(), entry);
    }

    /// Registers `name` backed by a collection of the same name.
    pub fn register_collection(&mut self, name: impl Into<String>) {
        let name = name.into();
        let entry = TableEntry::new(name.clone());
        self.register(name, entry);
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        let mut registry = Self::new();
        for (name, table) in &config.tables {
            let collection = table.collection.clone().unwrap_or_else(|| name.clone());
            registry.register(
                name.clone(),
                TableEntry {
                    collection,
                    field_map: table.fields.clone(),
                    index_hints: table.index_hints.clone(),
                },
            );
        }
        tracing::debug!(tables = registry.tables.len(), "table registry loaded from config");
        registry
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl TableRegistry for InMemoryRegistry {
    fn resolve(&self, name: &str) -> CompileResult<TableEntry> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnresolvedTable(name.to_string()))
    }
}

impl<R: TableRegistry + ?Sized> TableRegistry for &R {
    fn resolve(&self, name: &str) -> CompileResult<TableEntry> {
        (**self).resolve(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_table() {
        let mut registry = InMemoryRegistry::new();
        registry.register(
            "users",
            TableEntry::new("app_users")
                .with_field("id", "_id")
                .with_index_hint("idx_age"),
        );

        let entry = registry.resolve("users").unwrap();
        assert_eq!(entry.collection, "app_users");
        assert_eq!(entry.index_hints, vec!["idx_age".to_string()]);
    }

    #[test]
    fn test_unknown_table() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.resolve("ghosts"),
            Err(CompileError::UnresolvedTable(name)) if name == "ghosts"
        ));
    }

    #[test]
    fn test_stored_path_remaps_first_segment() {
        let entry = TableEntry::new("users")
            .with_field("id", "_id")
            .with_field("address", "addr");
        assert_eq!(entry.stored_path("id"), "_id");
        assert_eq!(entry.stored_path("address.city"), "addr.city");
        assert_eq!(entry.stored_path("name"), "name");
    }
}
