//! Scalar function lowering rules.
//!
//! The table is built explicitly and handed to the compiler; there is no
//! global registry.

use std::collections::HashMap;
use std::fmt;

use serde_json::{json, Value};

use crate::error::{CompileError, CompileResult};

/// Lowers already-compiled argument expressions to a store expression.
pub type ScalarRule = fn(Vec<Value>) -> CompileResult<Value>;

#[derive(Clone)]
pub struct FunctionTable {
    rules: HashMap<String, ScalarRule>,
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionTable").field("functions", &names).finish()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionTable {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// LOWER, UPPER, CONCAT, COALESCE, ABS and ROUND.
    pub fn builtin() -> Self {
        Self::empty()
            .with("LOWER", lower)
            .with("UPPER", upper)
            .with("CONCAT", concat)
            .with("COALESCE", coalesce)
            .with("ABS", abs)
            .with("ROUND", round)
    }

    /// Adds or replaces a rule. Names are matched case-insensitively.
    pub fn with(mut self, name: &str, rule: ScalarRule) -> Self {
        self.rules.insert(name.to_ascii_uppercase(), rule);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(&name.to_ascii_uppercase())
    }

    pub fn lower(&self, name: &str, args: Vec<Value>) -> CompileResult<Value> {
        let rule = self
            .rules
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| CompileError::UnsupportedFeature(format!("unknown function {}", name)))?;
        rule(args)
    }
}

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> CompileResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(CompileError::UnsupportedFeature(format!(
            "{} expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn single(name: &str, operator: &str, mut args: Vec<Value>) -> CompileResult<Value> {
    check_arity(name, &args, 1, 1)?;
    let arg = args.remove(0);
    Ok(json!({ operator: arg }))
}

fn lower(args: Vec<Value>) -> CompileResult<Value> {
    single("LOWER", "$toLower", args)
}

fn upper(args: Vec<Value>) -> CompileResult<Value> {
    single("UPPER", "$toUpper", args)
}

fn abs(args: Vec<Value>) -> CompileResult<Value> {
    single("ABS", "$abs", args)
}

fn concat(args: Vec<Value>) -> CompileResult<Value> {
    check_arity("CONCAT", &args, 1, usize::MAX)?;
    Ok(json!({ "$concat": args }))
}

fn coalesce(mut args: Vec<Value>) -> CompileResult<Value> {
    check_arity("COALESCE", &args, 1, 2)?;
    if args.len() == 1 {
        args.push(Value::Null);
    }
    Ok(json!({ "$ifNull": args }))
}

// ROUND(x) rounds x to zero decimal places.
fn round(mut args: Vec<Value>) -> CompileResult<Value> {
    check_arity("ROUND", &args, 1, 2)?;
    if args.len() == 1 {
        args.push(json!(0));
    }
    Ok(json!({ "$round": args }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules() {
        let table = FunctionTable::builtin();
        assert_eq!(
            table.lower("lower", vec![json!("$name")]).unwrap(),
            json!({"$toLower": "$name"})
        );
        assert_eq!(
            table.lower("UPPER", vec![json!("$name")]).unwrap(),
            json!({"$toUpper": "$name"})
        );
        assert_eq!(
            table
                .lower("CONCAT", vec![json!("$first"), json!(" "), json!("$last")])
                .unwrap(),
            json!({"$concat": ["$first", " ", "$last"]})
        );
        assert_eq!(
            table.lower("ABS", vec![json!("$delta")]).unwrap(),
            json!({"$abs": "$delta"})
        );
    }

    #[test]
    fn test_coalesce_defaults_to_null() {
        let table = FunctionTable::builtin();
        assert_eq!(
            table.lower("COALESCE", vec![json!("$nick")]).unwrap(),
            json!({"$ifNull": ["$nick", null]})
        );
        assert_eq!(
            table
                .lower("COALESCE", vec![json!("$nick"), json!("anon")])
                .unwrap(),
            json!({"$ifNull": ["$nick", "anon"]})
        );
    }

    #[test]
    fn test_round_defaults_to_zero_places() {
        let table = FunctionTable::builtin();
        assert_eq!(
            table.lower("ROUND", vec![json!("$price")]).unwrap(),
            json!({"$round": ["$price", 0]})
        );
        assert_eq!(
            table.lower("ROUND", vec![json!("$price"), json!(2)]).unwrap(),
            json!({"$round": ["$price", 2]})
        );
    }

    #[test]
    fn test_arity_and_unknown() {
        let table = FunctionTable::builtin();
        assert!(matches!(
            table.lower("LOWER", vec![]),
            Err(CompileError::UnsupportedFeature(_))
        ));
        assert!(matches!(
            table.lower("COALESCE", vec![json!(1), json!(2), json!(3)]),
            Err(CompileError::UnsupportedFeature(_))
        ));
        assert!(matches!(
            table.lower("SOUNDEX", vec![json!("$name")]),
            Err(CompileError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_custom_rule() {
        fn trim(args: Vec<Value>) -> CompileResult<Value> {
            Ok(json!({ "$trim": { "input": args[0] } }))
        }
        let table = FunctionTable::builtin().with("trim", trim);
        assert!(table.contains("TRIM"));
        assert_eq!(
            table.lower("Trim", vec![json!("$name")]).unwrap(),
            json!({"$trim": {"input": "$name"}})
        );
    }
}
