//! Parameter binding.
//!
//! `?` markers are numbered in source order by the parser; the binder resolves
//! them against the positional list and `:name` markers against the named map.
//! A binder lives for exactly one compilation.

use std::collections::HashMap;

use serde_json::{Number, Value};

use super::ast::{Expr, UnaryOp};
use crate::error::{CompileError, CompileResult};

/// Values supplied for one statement.
#[derive(Debug, Clone, Default)]
pub struct Params {
    positional: Vec<Value>,
    /// `None` marks a name that was declared but never given a value
    named: HashMap<String, Option<Value>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(named: HashMap<String, Value>, positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: named.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }

    /// Appends the value for the next `?`.
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Binds `:name`.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), Some(value.into()));
        self
    }

    /// Declares `:name` without a value; binding it fails like an absent name.
    pub fn declare(mut self, name: impl Into<String>) -> Self {
        self.named.insert(name.into(), None);
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name).and_then(Option::as_ref)
    }
}

pub struct ParamBinder<'a> {
    params: &'a Params,
    /// One past the highest positional ordinal consumed so far
    cursor: usize,
}

impl<'a> ParamBinder<'a> {
    pub fn new(params: &'a Params) -> Self {
        Self { params, cursor: 0 }
    }

    pub fn consumed(&self) -> usize {
        self.cursor
    }

    fn bind_positional(&mut self, ordinal: usize) -> CompileResult<Value> {
        let value = self.params.positional.get(ordinal).cloned().ok_or_else(|| {
            CompileError::Binding(format!(
                "positional parameter #{} has no value ({} supplied)",
                ordinal + 1,
                self.params.positional.len()
            ))
        })?;
        self.cursor = self.cursor.max(ordinal + 1);
        Ok(value)
    }

    fn bind_named(&self, name: &str) -> CompileResult<Value> {
        self.params
            .named(name)
            .cloned()
            .ok_or_else(|| CompileError::Binding(format!("named parameter :{} is not bound", name)))
    }

    /// Resolves a literal, parameter or composite of those to a value.
    pub fn bind(&mut self, expr: &Expr) -> CompileResult<Value> {
        match expr {
            Expr::Positional(ordinal) => self.bind_positional(*ordinal),
            Expr::Named(name) => self.bind_named(name),
            Expr::Number(text) => number_value(text),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Boolean(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.bind(item))
                .collect::<CompileResult<Vec<_>>>()
                .map(Value::Array),
            Expr::Between { low, high, .. } => {
                Ok(Value::Array(vec![self.bind(low)?, self.bind(high)?]))
            }
            Expr::UnaryOp {
                op: UnaryOp::Minus,
                operand,
            } => negate(self.bind(operand)?),
            other => Err(CompileError::UnsupportedFeature(format!(
                "expected a literal or parameter value, found {:?}",
                other
            ))),
        }
    }

    /// Fails when values were supplied for `?` markers that do not exist.
    pub fn finish(&self, strict: bool) -> CompileResult<()> {
        let supplied = self.params.positional.len();
        if supplied > self.cursor {
            if strict {
                return Err(CompileError::Binding(format!(
                    "{} positional values supplied but only {} used",
                    supplied, self.cursor
                )));
            }
            tracing::debug!(supplied, used = self.cursor, "ignoring unused positional values");
        }
        Ok(())
    }
}

/// Converts numeric literal text to a JSON number, preferring integers.
pub(crate) fn number_value(text: &str) -> CompileResult<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| CompileError::Parse(format!("Invalid numeric literal: {}", text)))
}

fn negate(value: Value) -> CompileResult<Value> {
    match &value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
                return Ok(Value::from(i));
            }
            n.as_f64()
                .and_then(|f| Number::from_f64(-f))
                .map(Value::Number)
                .ok_or_else(|| CompileError::UnsupportedFeature(format!("cannot negate {}", value)))
        }
        _ => Err(CompileError::UnsupportedFeature(format!(
            "unary minus applied to non-numeric value {}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_positional_by_ordinal() {
        let params = Params::new().push("a").push(2);
        let mut binder = ParamBinder::new(&params);
        assert_eq!(binder.bind(&Expr::Positional(1)).unwrap(), json!(2));
        assert_eq!(binder.bind(&Expr::Positional(0)).unwrap(), json!("a"));
        assert_eq!(binder.consumed(), 2);
    }

    #[test]
    fn test_positional_exhausted() {
        let params = Params::new().push(1);
        let mut binder = ParamBinder::new(&params);
        let err = binder.bind(&Expr::Positional(1)).unwrap_err();
        assert!(matches!(err, CompileError::Binding(_)));
        assert!(err.to_string().contains("#2"));
    }

    #[test]
    fn test_named_missing_and_unset() {
        let params = Params::new().bind("city", "Paris").declare("country");
        let mut binder = ParamBinder::new(&params);
        assert_eq!(
            binder.bind(&Expr::Named("city".to_string())).unwrap(),
            json!("Paris")
        );
        assert!(matches!(
            binder.bind(&Expr::Named("country".to_string())),
            Err(CompileError::Binding(_))
        ));
        assert!(matches!(
            binder.bind(&Expr::Named("zip".to_string())),
            Err(CompileError::Binding(_))
        ));
    }

    #[test]
    fn test_explicit_null_is_a_value() {
        let params = Params::new().bind("deleted_at", Value::Null);
        let mut binder = ParamBinder::new(&params);
        assert_eq!(
            binder.bind(&Expr::Named("deleted_at".to_string())).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_literals_and_composites() {
        let params = Params::new().push(5);
        let mut binder = ParamBinder::new(&params);
        assert_eq!(binder.bind(&Expr::Number("1200".to_string())).unwrap(), json!(1200));
        assert_eq!(binder.bind(&Expr::Number("2.5".to_string())).unwrap(), json!(2.5));
        assert_eq!(binder.bind(&Expr::Boolean(true)).unwrap(), json!(true));
        assert_eq!(
            binder
                .bind(&Expr::Array(vec![
                    Expr::String("x".to_string()),
                    Expr::Positional(0)
                ]))
                .unwrap(),
            json!(["x", 5])
        );
        let negative = Expr::UnaryOp {
            op: UnaryOp::Minus,
            operand: Box::new(Expr::Number("3".to_string())),
        };
        assert_eq!(binder.bind(&negative).unwrap(), json!(-3));
    }

    #[test]
    fn test_non_value_expression() {
        let params = Params::new();
        let mut binder = ParamBinder::new(&params);
        let field = Expr::Field(crate::sql::ast::FieldRef::new("age"));
        assert!(matches!(
            binder.bind(&field),
            Err(CompileError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_finish_strict() {
        let params = Params::new().push(1).push(2);
        let mut binder = ParamBinder::new(&params);
        binder.bind(&Expr::Positional(0)).unwrap();
        assert!(binder.finish(false).is_ok());
        assert!(matches!(binder.finish(true), Err(CompileError::Binding(_))));
    }
}
