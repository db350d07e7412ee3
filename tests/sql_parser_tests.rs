//! SQL Parser Tests
//!
//! Tests for the SQL front-end through the public API, covering:
//! - Statement kinds (SELECT, INSERT, UPDATE, DELETE, transactions)
//! - Clause combinations accepted by SELECT
//! - Parameter markers
//! - Error classification

use docsql::sql::ast::{BinaryOp, Expr, FieldRef, InsertSource, JoinType, Statement};
use docsql::sql::{SqlLexer, Token};
use docsql::{parse, CompileError};

fn select(sql: &str) -> docsql::sql::ast::SelectStatement {
    match parse(sql) {
        Ok(Statement::Select(s)) => s,
        other => panic!("Expected SELECT from {:?}, got {:?}", sql, other),
    }
}

// ============================================================================
// Accepted Statements
// ============================================================================

#[test]
fn test_statement_kinds() {
    let cases = [
        ("SELECT * FROM users", "SELECT"),
        ("INSERT INTO users (name) VALUES ('a')", "INSERT"),
        ("UPDATE users SET name = 'b'", "UPDATE"),
        ("DELETE FROM users", "DELETE"),
        ("BEGIN", "BEGIN"),
        ("BEGIN TRANSACTION", "BEGIN"),
        ("COMMIT", "COMMIT"),
        ("ROLLBACK WORK", "ROLLBACK"),
    ];
    for (sql, kind) in cases {
        let result = parse(sql);
        assert!(result.is_ok(), "Failed to parse {:?}: {:?}", sql, result.err());
        assert_eq!(result.unwrap().kind(), kind);
    }
}

#[test]
fn test_full_select_clause_chain() {
    let query = "SELECT u.name, COUNT(*) AS n FROM users u \
                 LEFT OUTER JOIN orders o ON o.userId = u._id \
                 WHERE u.age >= 18 AND o.status IN ('paid', 'shipped') \
                 GROUP BY u.name HAVING n > 2 ORDER BY n DESC, u.name LIMIT 10 OFFSET 5;";
    let s = select(query);
    assert_eq!(s.columns.len(), 2);
    assert_eq!(s.from.binding(), "u");
    assert_eq!(s.joins.len(), 1);
    assert_eq!(s.joins[0].join_type, JoinType::Left);
    assert_eq!(s.group_by, vec![FieldRef::qualified("u", "name")]);
    assert!(s.having.is_some());
    assert_eq!(s.order_by.len(), 2);
    assert!(s.order_by[0].descending);
    assert!(!s.order_by[1].descending);
    assert_eq!(s.limit, Some(Expr::Number("10".to_string())));
    assert_eq!(s.offset, Some(Expr::Number("5".to_string())));
}

#[test]
fn test_equivalent_spellings_give_identical_ast() {
    let a = parse("SELECT name FROM users WHERE age > 1 AND city = 'x' ORDER BY name");
    let b = parse("select\n  name\nfrom USERS where AGE>1 and CITY='x' order by NAME asc");
    // Identifiers keep their case; only keywords are case-insensitive
    assert_ne!(a.as_ref().unwrap(), b.as_ref().unwrap());

    let c = parse("select   name from users\twhere age > 1 and city='x'   ORDER  BY name ASC");
    assert_eq!(a.unwrap(), c.unwrap());
}

#[test]
fn test_comments_are_ignored() {
    let a = parse("SELECT name FROM users -- trailing comment");
    let b = parse("SELECT /* inline */ name FROM users");
    assert_eq!(a.unwrap(), b.unwrap());
}

#[test]
fn test_where_operators() {
    let queries = [
        "SELECT * FROM t WHERE a = 1",
        "SELECT * FROM t WHERE a != 1",
        "SELECT * FROM t WHERE a <> 1",
        "SELECT * FROM t WHERE a < 1 OR a <= 2 OR a > 3 OR a >= 4",
        "SELECT * FROM t WHERE a IN (1, 2, 3)",
        "SELECT * FROM t WHERE a NOT IN (1)",
        "SELECT * FROM t WHERE a LIKE 'x%'",
        "SELECT * FROM t WHERE a NOT LIKE 'x%'",
        "SELECT * FROM t WHERE a IS NULL",
        "SELECT * FROM t WHERE a IS NOT NULL",
        "SELECT * FROM t WHERE a BETWEEN 1 AND 5",
        "SELECT * FROM t WHERE NOT (a = 1 OR b = 2)",
    ];
    for query in queries {
        let result = parse(query);
        assert!(result.is_ok(), "Failed to parse {:?}: {:?}", query, result.err());
    }
}

#[test]
fn test_not_equal_spellings_agree() {
    let a = select("SELECT * FROM t WHERE a != 1");
    let b = select("SELECT * FROM t WHERE a <> 1");
    assert_eq!(a, b);
    assert_eq!(
        a.where_clause,
        Some(Expr::binary(
            Expr::Field(FieldRef::new("a")),
            BinaryOp::NotEq,
            Expr::Number("1".to_string())
        ))
    );
}

#[test]
fn test_parameter_markers() {
    let s = select("SELECT * FROM t WHERE a = ? AND b = :name AND c IN ? LIMIT ?");
    let where_clause = s.where_clause.unwrap();
    let Expr::BinaryOp { left, right, .. } = where_clause else {
        panic!("expected AND");
    };
    assert_eq!(
        *right,
        Expr::binary(Expr::Field(FieldRef::new("c")), BinaryOp::In, Expr::Positional(1))
    );
    let Expr::BinaryOp { left: first, right: second, .. } = *left else {
        panic!("expected AND");
    };
    assert_eq!(
        *first,
        Expr::binary(Expr::Field(FieldRef::new("a")), BinaryOp::Eq, Expr::Positional(0))
    );
    assert_eq!(
        *second,
        Expr::binary(
            Expr::Field(FieldRef::new("b")),
            BinaryOp::Eq,
            Expr::Named("name".to_string())
        )
    );
    assert_eq!(s.limit, Some(Expr::Positional(2)));
}

#[test]
fn test_insert_forms() {
    let Ok(Statement::Insert(insert)) = parse("INSERT INTO t (a, b) VALUES (1, 'x'), (?, ?)") else {
        panic!("expected INSERT");
    };
    assert_eq!(insert.columns, Some(vec!["a".to_string(), "b".to_string()]));
    let InsertSource::Values(rows) = insert.source else {
        panic!("expected VALUES");
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], vec![Expr::Positional(0), Expr::Positional(1)]);

    let Ok(Statement::Insert(insert)) = parse("INSERT INTO t VALUES :doc") else {
        panic!("expected INSERT");
    };
    assert_eq!(insert.columns, None);
    assert_eq!(
        insert.source,
        InsertSource::Values(vec![vec![Expr::Named("doc".to_string())]])
    );

    let Ok(Statement::Insert(insert)) = parse("INSERT INTO t (a) SELECT a FROM s") else {
        panic!("expected INSERT");
    };
    assert!(matches!(insert.source, InsertSource::Select(_)));
}

// ============================================================================
// Rejected Statements
// ============================================================================

#[test]
fn test_parse_errors() {
    let queries = [
        "",
        "SELECT",
        "SELECT * FROM",
        "SELECT * users",
        "SELECT * FROM users WHERE",
        "SELECT * FROM users ORDER name",
        "SELECT * FROM users LIMIT 'ten'",
        "INSERT INTO t (a, b) VALUES (1)",
        "UPDATE t name = 1",
        "DELETE users",
        "DROP TABLE users",
        "SELECT * FROM users; SELECT 1",
    ];
    for query in queries {
        let result = parse(query);
        assert!(
            matches!(result, Err(CompileError::Parse(_))),
            "Expected ParseError for {:?}, got {:?}",
            query,
            result
        );
    }
}

#[test]
fn test_unsupported_constructs() {
    let queries = [
        "SELECT * FROM a FULL JOIN b ON a.id = b.id",
        "SELECT * FROM a CROSS JOIN b ON a.id = b.id",
        "SELECT * FROM a JOIN b ON a.id = b.id AND a.x = b.x",
        "SELECT * FROM a GROUP BY LOWER(name)",
    ];
    for query in queries {
        let result = parse(query);
        assert!(
            matches!(result, Err(CompileError::UnsupportedFeature(_))),
            "Expected UnsupportedFeatureError for {:?}, got {:?}",
            query,
            result
        );
    }
}

#[test]
fn test_deep_nesting_is_a_parse_error() {
    let depth = 20_000;
    let query = format!(
        "SELECT * FROM t WHERE {}a = 1{}",
        "(".repeat(depth),
        ")".repeat(depth)
    );
    assert!(matches!(parse(&query), Err(CompileError::Parse(_))));

    let query = format!("SELECT * FROM t WHERE {}a = 1", "NOT ".repeat(depth));
    assert!(matches!(parse(&query), Err(CompileError::Parse(_))));

    let query = format!("SELECT {}1 FROM t", "- ".repeat(depth));
    assert!(matches!(parse(&query), Err(CompileError::Parse(_))));

    let shallow = format!("SELECT * FROM t WHERE {}a = 1{}", "(".repeat(20), ")".repeat(20));
    assert!(parse(&shallow).is_ok());
}

#[test]
fn test_lex_errors_report_position() {
    let err = parse("SELECT * FROM users WHERE a = #").unwrap_err();
    match err {
        CompileError::Lex { ch, position } => {
            assert_eq!(ch, '#');
            assert_eq!(position, 30);
        }
        other => panic!("Expected LexError, got {:?}", other),
    }
}

#[test]
fn test_lexer_tokenize() {
    let tokens = SqlLexer::new("SELECT a, 1.5 FROM t").tokenize().unwrap();
    assert_eq!(
        tokens,
        vec![
            Token::Identifier("SELECT".to_string()),
            Token::Identifier("a".to_string()),
            Token::Comma,
            Token::Number("1.5".to_string()),
            Token::Identifier("FROM".to_string()),
            Token::Identifier("t".to_string()),
            Token::Eof,
        ]
    );
}
