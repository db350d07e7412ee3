//! Compiler configuration.
//!
//! Loaded from a TOML file such as:
//!
//! ```toml
//! case_insensitive_like = true
//! strict_positional = false
//!
//! [tables.users]
//! collection = "app_users"
//! index_hints = ["idx_users_age"]
//!
//! [tables.users.fields]
//! id = "_id"
//! ```
//!
//! ## Environment Variables
//!
//! - `DOCSQL_CASE_INSENSITIVE_LIKE` - overrides `case_insensitive_like`
//! - `DOCSQL_STRICT_POSITIONAL` - overrides `strict_positional`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{CompileError, CompileResult};

pub const ENV_CASE_INSENSITIVE_LIKE: &str = "DOCSQL_CASE_INSENSITIVE_LIKE";
pub const ENV_STRICT_POSITIONAL: &str = "DOCSQL_STRICT_POSITIONAL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Compile LIKE to a case-insensitive regular expression
    #[serde(default = "default_true")]
    pub case_insensitive_like: bool,
    /// Reject positional values that no `?` marker consumes
    #[serde(default)]
    pub strict_positional: bool,
    /// Tables registered at start-up
    #[serde(default)]
    pub tables: HashMap<String, TableConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableConfig {
    /// Backing collection; defaults to the table name
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    #[serde(default)]
    pub index_hints: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            case_insensitive_like: true,
            strict_positional: false,
            tables: HashMap::new(),
        }
    }
}

impl CompilerConfig {
    pub fn from_toml_str(content: &str) -> CompileResult<Self> {
        let mut config: CompilerConfig = toml::from_str(content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> CompileResult<Self> {
        if !path.exists() {
            return Err(CompileError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), tables = config.tables.len(), "loaded compiler config");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_flag(ENV_CASE_INSENSITIVE_LIKE) {
            self.case_insensitive_like = value;
        }
        if let Some(value) = env_flag(ENV_STRICT_POSITIONAL) {
            self.strict_positional = value;
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(variable = name, value = %value, "ignoring unrecognized boolean");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(config.case_insensitive_like);
        assert!(!config.strict_positional);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_parse_tables() {
        let config = CompilerConfig::from_toml_str(
            r#"
            [tables.users]
            collection = "app_users"
            index_hints = ["idx_age"]

            [tables.users.fields]
            id = "_id"

            [tables.orders]
            "#,
        )
        .unwrap();

        let users = &config.tables["users"];
        assert_eq!(users.collection.as_deref(), Some("app_users"));
        assert_eq!(users.fields["id"], "_id");
        assert_eq!(users.index_hints, vec!["idx_age".to_string()]);
        assert_eq!(config.tables["orders"].collection, None);
    }

    #[test]
    fn test_invalid_toml() {
        let err = CompilerConfig::from_toml_str("tables = 3").unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tables.products]\ncollection = \"catalog\"").unwrap();

        let config = CompilerConfig::load(file.path()).unwrap();
        assert_eq!(
            config.tables["products"].collection.as_deref(),
            Some("catalog")
        );
    }

    #[test]
    fn test_missing_file() {
        let err = CompilerConfig::load(Path::new("/nonexistent/docsql.toml")).unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }
}
