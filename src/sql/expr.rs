//! Expression lowering.
//!
//! Field references resolve against a [`FieldResolver`]: a plain [`Scope`]
//! before grouping, a [`GroupScope`] once rows have been collapsed into groups.

use serde_json::{json, Value};

use super::ast::{BinaryOp, Expr, FieldRef, TableRef, UnaryOp};
use super::registry::TableEntry;
use super::translator::Translator;
use crate::error::{CompileError, CompileResult};

pub(crate) trait FieldResolver {
    /// Document path (without the leading `$`) for a field reference.
    fn field_path(&self, field: &FieldRef) -> CompileResult<String>;

    /// Materialized field holding the value of an aggregate call.
    fn aggregate_path(&self, call: &Expr) -> CompileResult<String>;
}

/// A table visible to the statement.
#[derive(Debug, Clone)]
pub(crate) struct TableBinding {
    pub binding: String,
    pub table: String,
    pub entry: TableEntry,
    /// Where the row lives in the pipeline document; `None` for the root
    pub prefix: Option<String>,
}

impl TableBinding {
    pub fn path(&self, name: &str) -> String {
        let stored = self.entry.stored_path(name);
        match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, stored),
            None => stored,
        }
    }
}

/// Tables in scope: the primary table at the root, joined tables nested
/// under their binding name.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    tables: Vec<TableBinding>,
}

impl Scope {
    pub fn new(table: &TableRef, entry: TableEntry) -> Self {
        Self {
            tables: vec![TableBinding {
                binding: table.binding().to_string(),
                table: table.name.clone(),
                entry,
                prefix: None,
            }],
        }
    }

    pub fn add_join(&mut self, table: &TableRef, entry: TableEntry) -> CompileResult<()> {
        let binding = table.binding().to_string();
        if self.tables.iter().any(|t| t.binding == binding) {
            return Err(CompileError::UnsupportedFeature(format!(
                "table binding {} is used twice; give the joined table an alias",
                binding
            )));
        }
        self.tables.push(TableBinding {
            prefix: Some(binding.clone()),
            binding,
            table: table.name.clone(),
            entry,
        });
        Ok(())
    }

    pub fn primary(&self) -> &TableBinding {
        &self.tables[0]
    }

    /// Table by position in the FROM clause; 0 is the primary table.
    pub fn table(&self, index: usize) -> Option<&TableBinding> {
        self.tables.get(index)
    }

    /// Position of the table a qualifier names, if it names one.
    pub fn index_of(&self, field: &FieldRef) -> Option<usize> {
        field
            .table
            .as_deref()
            .and_then(|table| self.lookup(table))
            .map(|(index, _)| index)
    }

    /// Binding by alias, falling back to the table name.
    pub fn lookup(&self, name: &str) -> Option<(usize, &TableBinding)> {
        self.tables
            .iter()
            .enumerate()
            .find(|(_, t)| t.binding == name)
            .or_else(|| self.tables.iter().enumerate().find(|(_, t)| t.table == name))
    }

    /// True when `expr` mentions a field of a joined (non-primary) table.
    pub fn references_join(&self, expr: &Expr) -> bool {
        let mut found = false;
        visit_fields(expr, &mut |field| {
            if self.index_of(field).is_some_and(|index| index > 0) {
                found = true;
            }
        });
        found
    }
}

impl FieldResolver for Scope {
    fn field_path(&self, field: &FieldRef) -> CompileResult<String> {
        match &field.table {
            Some(table) => match self.lookup(table) {
                Some((_, binding)) => Ok(binding.path(&field.name)),
                // Not a table: a nested path inside the primary table
                None => Ok(self.primary().path(&format!("{}.{}", table, field.name))),
            },
            None => Ok(self.primary().path(&field.name)),
        }
    }

    fn aggregate_path(&self, call: &Expr) -> CompileResult<String> {
        Err(CompileError::UnsupportedFeature(format!(
            "aggregate {} is only allowed in the select list or HAVING",
            describe(call)
        )))
    }
}

/// Resolution after a `$group` stage.
pub(crate) struct GroupScope<'s> {
    scope: &'s Scope,
    /// (source path, key name)
    keys: Vec<(String, String)>,
    /// (aggregate call, output field)
    aggregates: Vec<(Expr, String)>,
    /// (select alias, key name) for aliased group-key columns
    key_aliases: Vec<(String, String)>,
}

impl<'s> GroupScope<'s> {
    pub fn new(scope: &'s Scope) -> Self {
        Self {
            scope,
            keys: Vec::new(),
            aggregates: Vec::new(),
            key_aliases: Vec::new(),
        }
    }

    pub fn add_key(&mut self, source_path: String, key: String) {
        self.keys.push((source_path, key));
    }

    pub fn add_aggregate(&mut self, call: Expr, name: String) {
        self.aggregates.push((call, name));
    }

    pub fn add_key_alias(&mut self, alias: String, key: String) {
        self.key_aliases.push((alias, key));
    }

    pub fn has_aggregate(&self, call: &Expr) -> bool {
        self.aggregates.iter().any(|(c, _)| c == call)
    }

    /// Group key name for a field, if the field is grouped on.
    pub fn key_for(&self, field: &FieldRef) -> CompileResult<Option<&str>> {
        let path = self.scope.field_path(field)?;
        Ok(self
            .keys
            .iter()
            .find(|(source, _)| *source == path)
            .map(|(_, key)| key.as_str()))
    }
}

impl FieldResolver for GroupScope<'_> {
    fn field_path(&self, field: &FieldRef) -> CompileResult<String> {
        if let Some(key) = self.key_for(field)? {
            return Ok(format!("_id.{}", key));
        }
        if field.table.is_none() {
            if let Some((_, name)) = self.aggregates.iter().find(|(_, name)| *name == field.name) {
                return Ok(name.clone());
            }
            if let Some((_, key)) = self.key_aliases.iter().find(|(alias, _)| *alias == field.name) {
                return Ok(format!("_id.{}", key));
            }
        }
        Err(CompileError::UnsupportedFeature(format!(
            "column {} is neither grouped nor an aggregate",
            describe(&Expr::Field(field.clone()))
        )))
    }

    fn aggregate_path(&self, call: &Expr) -> CompileResult<String> {
        self.aggregates
            .iter()
            .find(|(c, _)| c == call)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| {
                CompileError::UnsupportedFeature(format!(
                    "{} must also appear in the select list",
                    describe(call)
                ))
            })
    }
}

/// Calls `f` on every field reference inside `expr`.
pub(crate) fn visit_fields(expr: &Expr, f: &mut dyn FnMut(&FieldRef)) {
    match expr {
        Expr::Field(field) => f(field),
        Expr::Array(items) => items.iter().for_each(|item| visit_fields(item, f)),
        Expr::Function { args, .. } => args.iter().for_each(|arg| visit_fields(arg, f)),
        Expr::Between { expr, low, high } => {
            visit_fields(expr, f);
            visit_fields(low, f);
            visit_fields(high, f);
        }
        Expr::BinaryOp { left, right, .. } => {
            visit_fields(left, f);
            visit_fields(right, f);
        }
        Expr::UnaryOp { operand, .. } => visit_fields(operand, f),
        Expr::IsNull { expr, .. } => visit_fields(expr, f),
        _ => {}
    }
}

/// Short SQL-ish rendering for error messages.
pub(crate) fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Field(field) => match &field.table {
            Some(table) => format!("{}.{}", table, field.name),
            None => field.name.clone(),
        },
        Expr::Function { name, args } => {
            let args: Vec<String> = args.iter().map(describe).collect();
            format!("{}({})", name, args.join(", "))
        }
        Expr::Wildcard => "*".to_string(),
        Expr::Number(text) => text.clone(),
        Expr::String(s) => format!("'{}'", s),
        Expr::Positional(_) => "?".to_string(),
        Expr::Named(name) => format!(":{}", name),
        Expr::BinaryOp { left, op, right } => {
            format!("{} {} {}", describe(left), op.symbol(), describe(right))
        }
        other => format!("{:?}", other),
    }
}

/// True for literals, parameters and arrays of those.
pub(crate) fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Number(_)
        | Expr::String(_)
        | Expr::Boolean(_)
        | Expr::Null
        | Expr::Positional(_)
        | Expr::Named(_) => true,
        Expr::Array(items) => items.iter().all(is_constant),
        Expr::UnaryOp {
            op: UnaryOp::Minus,
            operand,
        } => is_constant(operand),
        _ => false,
    }
}

/// Protects values the store would otherwise read as expressions.
pub(crate) fn literal(value: Value) -> Value {
    fn needs_literal(value: &Value) -> bool {
        match value {
            Value::String(s) => s.starts_with('$'),
            Value::Object(_) => true,
            Value::Array(items) => items.iter().any(needs_literal),
            _ => false,
        }
    }

    if needs_literal(&value) {
        json!({ "$literal": value })
    } else {
        value
    }
}

fn arithmetic_operator(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Plus => Some("$add"),
        BinaryOp::Minus => Some("$subtract"),
        BinaryOp::Multiply => Some("$multiply"),
        BinaryOp::Divide => Some("$divide"),
        _ => None,
    }
}

impl Translator<'_> {
    /// Lowers a value expression to the store's expression language.
    pub(crate) fn compile_expr(
        &mut self,
        expr: &Expr,
        resolver: &dyn FieldResolver,
    ) -> CompileResult<Value> {
        match expr {
            Expr::Field(field) => Ok(Value::String(format!("${}", resolver.field_path(field)?))),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.compile_expr(item, resolver))
                .collect::<CompileResult<Vec<_>>>()
                .map(Value::Array),
            e if is_constant(e) => Ok(literal(self.binder.bind(e)?)),
            Expr::BinaryOp { left, op, right } => {
                let operator = arithmetic_operator(*op).ok_or_else(|| {
                    CompileError::UnsupportedFeature(format!(
                        "operator {} is not valid in a value expression",
                        op.symbol()
                    ))
                })?;
                let left = self.compile_expr(left, resolver)?;
                let right = self.compile_expr(right, resolver)?;
                Ok(json!({ operator: [left, right] }))
            }
            Expr::UnaryOp {
                op: UnaryOp::Minus,
                operand,
            } => {
                let operand = self.compile_expr(operand, resolver)?;
                Ok(json!({ "$multiply": [-1, operand] }))
            }
            call @ Expr::Function { .. } if call.is_aggregate_call() => {
                Ok(Value::String(format!("${}", resolver.aggregate_path(call)?)))
            }
            Expr::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.compile_expr(arg, resolver))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.functions.lower(name, args)
            }
            other => Err(CompileError::UnsupportedFeature(format!(
                "{} is not valid in a value expression",
                describe(other)
            ))),
        }
    }

    /// Lowers an aggregate call to a `$group` accumulator.
    pub(crate) fn compile_aggregate(
        &mut self,
        call: &Expr,
        resolver: &dyn FieldResolver,
    ) -> CompileResult<Value> {
        let (name, args) = match call {
            Expr::Function { name, args } if call.is_aggregate_call() => (name.as_str(), args),
            other => {
                return Err(CompileError::UnsupportedFeature(format!(
                    "{} is not an aggregate",
                    describe(other)
                )));
            }
        };
        if args.iter().any(Expr::contains_aggregate) {
            return Err(CompileError::UnsupportedFeature(format!(
                "nested aggregate in {}",
                describe(call)
            )));
        }

        match (name, args.as_slice()) {
            ("COUNT", []) | ("COUNT", [Expr::Wildcard]) => Ok(json!({ "$sum": 1 })),
            ("COUNT", [arg]) => {
                let value = self.compile_expr(arg, resolver)?;
                Ok(json!({
                    "$sum": {
                        "$cond": [{ "$eq": [{ "$ifNull": [value, null] }, null] }, 0, 1]
                    }
                }))
            }
            (_, [Expr::Wildcard]) | (_, []) => Err(CompileError::UnsupportedFeature(format!(
                "{} requires a field argument",
                name
            ))),
            (_, [arg]) => {
                let value = self.compile_expr(arg, resolver)?;
                let accumulator = format!("${}", name.to_ascii_lowercase());
                Ok(json!({ accumulator: value }))
            }
            _ => Err(CompileError::UnsupportedFeature(format!(
                "{} takes a single argument",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut scope = Scope::new(
            &TableRef {
                name: "users".to_string(),
                alias: Some("u".to_string()),
            },
            TableEntry::new("users").with_field("id", "_id"),
        );
        scope
            .add_join(
                &TableRef {
                    name: "orders".to_string(),
                    alias: Some("o".to_string()),
                },
                TableEntry::new("orders"),
            )
            .unwrap();
        scope
    }

    #[test]
    fn test_duplicate_binding() {
        let mut scope = scope();
        let err = scope
            .add_join(
                &TableRef {
                    name: "orders".to_string(),
                    alias: Some("u".to_string()),
                },
                TableEntry::new("orders"),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedFeature(_)));
    }

    #[test]
    fn test_scope_paths() {
        let scope = scope();
        assert_eq!(scope.field_path(&FieldRef::new("name")).unwrap(), "name");
        assert_eq!(scope.field_path(&FieldRef::new("id")).unwrap(), "_id");
        assert_eq!(
            scope.field_path(&FieldRef::qualified("u", "id")).unwrap(),
            "_id"
        );
        assert_eq!(
            scope.field_path(&FieldRef::qualified("users", "name")).unwrap(),
            "name"
        );
        assert_eq!(
            scope.field_path(&FieldRef::qualified("o", "total")).unwrap(),
            "o.total"
        );
        assert_eq!(
            scope.field_path(&FieldRef::qualified("address", "city")).unwrap(),
            "address.city"
        );
    }

    #[test]
    fn test_references_join() {
        let scope = scope();
        let join_ref = Expr::binary(
            Expr::Field(FieldRef::qualified("o", "total")),
            BinaryOp::Gt,
            Expr::Number("5".to_string()),
        );
        let primary_ref = Expr::binary(
            Expr::Field(FieldRef::qualified("u", "age")),
            BinaryOp::Gt,
            Expr::Number("5".to_string()),
        );
        assert!(scope.references_join(&join_ref));
        assert!(!scope.references_join(&primary_ref));
    }

    #[test]
    fn test_group_scope_resolution() {
        let scope = scope();
        let mut group = GroupScope::new(&scope);
        group.add_key("name".to_string(), "name".to_string());
        let count = Expr::Function {
            name: "COUNT".to_string(),
            args: vec![Expr::Wildcard],
        };
        group.add_aggregate(count.clone(), "n".to_string());

        assert_eq!(
            group.field_path(&FieldRef::qualified("u", "name")).unwrap(),
            "_id.name"
        );
        assert_eq!(group.field_path(&FieldRef::new("n")).unwrap(), "n");
        assert_eq!(group.aggregate_path(&count).unwrap(), "n");
        assert!(matches!(
            group.field_path(&FieldRef::new("age")),
            Err(CompileError::UnsupportedFeature(_))
        ));
        let sum = Expr::Function {
            name: "SUM".to_string(),
            args: vec![Expr::Field(FieldRef::new("age"))],
        };
        assert!(matches!(
            group.aggregate_path(&sum),
            Err(CompileError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_literal_protection() {
        assert_eq!(literal(json!("plain")), json!("plain"));
        assert_eq!(literal(json!("$price")), json!({"$literal": "$price"}));
        assert_eq!(literal(json!({"a": 1})), json!({"$literal": {"a": 1}}));
        assert_eq!(literal(json!([1, 2])), json!([1, 2]));
    }
}
