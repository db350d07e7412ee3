//! WHERE / HAVING predicates lowered to filter documents.

use serde_json::{json, Map, Value};

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::expr::{describe, is_constant, FieldResolver};
use super::translator::Translator;
use crate::error::{CompileError, CompileResult};

fn query_operator(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Eq => Some("$eq"),
        BinaryOp::NotEq => Some("$ne"),
        BinaryOp::Lt => Some("$lt"),
        BinaryOp::LtEq => Some("$lte"),
        BinaryOp::Gt => Some("$gt"),
        BinaryOp::GtEq => Some("$gte"),
        _ => None,
    }
}

/// Builds an anchored regular expression from a LIKE pattern.
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    regex.push('$');
    regex
}

/// Flattens nested applications of the same logical operator.
pub(crate) fn flatten<'e>(expr: &'e Expr, op: BinaryOp, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::BinaryOp { left, op: inner, right } if *inner == op => {
            flatten(left, op, out);
            flatten(right, op, out);
        }
        other => out.push(other),
    }
}

fn field_predicate(path: String, operator: &str, value: Value) -> Value {
    let mut condition = Map::new();
    condition.insert(operator.to_string(), value);
    let mut filter = Map::new();
    filter.insert(path, Value::Object(condition));
    Value::Object(filter)
}

impl Translator<'_> {
    /// Field path for a predicate operand, when it names a stored or
    /// materialized value rather than a computation.
    fn operand_path(
        &self,
        expr: &Expr,
        resolver: &dyn FieldResolver,
    ) -> Option<CompileResult<String>> {
        match expr {
            Expr::Field(field) => Some(resolver.field_path(field)),
            call if call.is_aggregate_call() => Some(resolver.aggregate_path(call)),
            _ => None,
        }
    }

    fn require_path(
        &self,
        expr: &Expr,
        resolver: &dyn FieldResolver,
        context: &str,
    ) -> CompileResult<String> {
        self.operand_path(expr, resolver).unwrap_or_else(|| {
            Err(CompileError::UnsupportedFeature(format!(
                "{} requires a column on the left, found {}",
                context,
                describe(expr)
            )))
        })
    }

    pub(crate) fn compile_filter(
        &mut self,
        expr: &Expr,
        resolver: &dyn FieldResolver,
    ) -> CompileResult<Value> {
        match expr {
            Expr::BinaryOp {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                ..
            } => {
                let mut operands = Vec::new();
                flatten(expr, *op, &mut operands);
                let compiled = operands
                    .into_iter()
                    .map(|operand| self.compile_filter(operand, resolver))
                    .collect::<CompileResult<Vec<_>>>()?;
                let combinator = if *op == BinaryOp::And { "$and" } else { "$or" };
                Ok(json!({ combinator: compiled }))
            }
            Expr::UnaryOp {
                op: UnaryOp::Not,
                operand,
            } => {
                let inner = self.compile_filter(operand, resolver)?;
                Ok(json!({ "$nor": [inner] }))
            }
            Expr::BinaryOp { left, op, right } if op.is_comparison() => {
                self.compile_comparison(left, *op, right, resolver)
            }
            Expr::BinaryOp {
                left,
                op: op @ (BinaryOp::In | BinaryOp::NotIn),
                right,
            } => {
                let path = self.require_path(left, resolver, op.symbol())?;
                let values = match self.binder.bind(right)? {
                    Value::Array(items) => Value::Array(items),
                    single => Value::Array(vec![single]),
                };
                let operator = if *op == BinaryOp::In { "$in" } else { "$nin" };
                Ok(field_predicate(path, operator, values))
            }
            Expr::BinaryOp {
                left,
                op: BinaryOp::Like,
                right,
            } => {
                let path = self.require_path(left, resolver, "LIKE")?;
                let pattern = match self.binder.bind(right)? {
                    Value::String(pattern) => pattern,
                    other => {
                        return Err(CompileError::UnsupportedFeature(format!(
                            "LIKE pattern must be a string, got {}",
                            other
                        )));
                    }
                };
                let mut condition = Map::new();
                condition.insert("$regex".to_string(), Value::String(like_to_regex(&pattern)));
                if self.config.case_insensitive_like {
                    condition.insert("$options".to_string(), json!("i"));
                }
                let mut filter = Map::new();
                filter.insert(path, Value::Object(condition));
                Ok(Value::Object(filter))
            }
            Expr::IsNull { expr, negated } => {
                let path = self.require_path(expr, resolver, "IS NULL")?;
                let operator = if *negated { "$ne" } else { "$eq" };
                Ok(field_predicate(path, operator, Value::Null))
            }
            Expr::Between { expr, low, high } => {
                let path = self.require_path(expr, resolver, "BETWEEN")?;
                let low = self.binder.bind(low)?;
                let high = self.binder.bind(high)?;
                let mut filter = Map::new();
                filter.insert(path, json!({ "$gte": low, "$lte": high }));
                Ok(Value::Object(filter))
            }
            Expr::Field(_) => {
                let path = self.require_path(expr, resolver, "boolean test")?;
                Ok(field_predicate(path, "$eq", Value::Bool(true)))
            }
            other => Err(CompileError::UnsupportedFeature(format!(
                "{} is not a supported predicate",
                describe(other)
            ))),
        }
    }

    fn compile_comparison(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        resolver: &dyn FieldResolver,
    ) -> CompileResult<Value> {
        let operator = query_operator(op).ok_or_else(|| {
            CompileError::UnsupportedFeature(format!("{} is not a comparison", op.symbol()))
        })?;

        if is_constant(right) {
            if let Some(path) = self.operand_path(left, resolver) {
                let value = self.binder.bind(right)?;
                return Ok(field_predicate(path?, operator, value));
            }
        }
        if is_constant(left) {
            if let Some(path) = self.operand_path(right, resolver) {
                let value = self.binder.bind(left)?;
                let operator = query_operator(op.flipped()).unwrap_or(operator);
                return Ok(field_predicate(path?, operator, value));
            }
        }

        // Field against field, or computed operands
        let left = self.compile_expr(left, resolver)?;
        let right = self.compile_expr(right, resolver)?;
        Ok(json!({ "$expr": { operator: [left, right] } }))
    }
}
