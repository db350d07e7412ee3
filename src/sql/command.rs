//! Compiled commands handed to the execution layer.

use serde::Serialize;
use serde_json::{Map, Value};

/// Aggregation pipeline over one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    pub collection: String,
    pub pipeline: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub index_hints: Vec<String>,
}

impl Pipeline {
    /// The first stage with the given operator name, e.g. `"$match"`.
    pub fn stage(&self, operator: &str) -> Option<&Value> {
        self.pipeline.iter().find_map(|stage| stage.get(operator))
    }

    /// Operator names of every stage, in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.pipeline
            .iter()
            .filter_map(|stage| stage.as_object())
            .filter_map(|stage| stage.keys().next())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionDirective {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum CompiledCommand {
    Select(Pipeline),
    /// Either literal `documents`, or a `query` whose output rows are inserted.
    Insert {
        collection: String,
        documents: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<Pipeline>,
    },
    Update {
        collection: String,
        filter: Value,
        assignments: Map<String, Value>,
    },
    Delete {
        collection: String,
        filter: Value,
    },
    TransactionControl {
        directive: TransactionDirective,
    },
}

impl CompiledCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            CompiledCommand::Select(_) => "Select",
            CompiledCommand::Insert { .. } => "Insert",
            CompiledCommand::Update { .. } => "Update",
            CompiledCommand::Delete { .. } => "Delete",
            CompiledCommand::TransactionControl { .. } => "TransactionControl",
        }
    }

    /// Collection the command reads or writes, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            CompiledCommand::Select(p) => Some(&p.collection),
            CompiledCommand::Insert { collection, .. }
            | CompiledCommand::Update { collection, .. }
            | CompiledCommand::Delete { collection, .. } => Some(collection),
            CompiledCommand::TransactionControl { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_with_kind_tag() {
        let cmd = CompiledCommand::Delete {
            collection: "products".to_string(),
            filter: json!({}),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"kind": "Delete", "collection": "products", "filter": {}})
        );

        let cmd = CompiledCommand::TransactionControl {
            directive: TransactionDirective::Commit,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"kind": "TransactionControl", "directive": "Commit"})
        );
    }

    #[test]
    fn test_select_serialization_and_helpers() {
        let cmd = CompiledCommand::Select(Pipeline {
            collection: "users".to_string(),
            pipeline: vec![json!({"$match": {"age": {"$gt": 25}}}), json!({"$limit": 10})],
            index_hints: vec![],
        });
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({
                "kind": "Select",
                "collection": "users",
                "pipeline": [{"$match": {"age": {"$gt": 25}}}, {"$limit": 10}]
            })
        );
        if let CompiledCommand::Select(p) = &cmd {
            assert_eq!(p.stage_names(), vec!["$match", "$limit"]);
            assert_eq!(p.stage("$limit"), Some(&json!(10)));
        }
        assert_eq!(cmd.collection(), Some("users"));
        assert_eq!(cmd.kind(), "Select");
    }
}
