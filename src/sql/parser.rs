use super::ast::*;
use super::lexer::{SpannedToken, SqlLexer, Token};
use crate::error::{CompileError, CompileResult};

mod expressions;

/// Words that terminate an expression or a table reference. A bare identifier
/// in this set is never taken as an implicit alias.
const RESERVED_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "BY", "LIMIT", "OFFSET", "JOIN",
    "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "ON", "AS", "AND", "OR", "NOT", "IN",
    "IS", "LIKE", "BETWEEN", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "ASC",
    "DESC", "UNION",
];

pub(crate) fn is_reserved(word: &str) -> bool {
    RESERVED_KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(word))
}

/// Deepest expression nesting the parser accepts before giving up.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parses a single statement.
pub fn parse(sql: &str) -> CompileResult<Statement> {
    SqlParser::new(sql).parse()
}

/// Recursive-descent parser over a lazy token stream with one token of lookahead.
pub struct SqlParser {
    lexer: SqlLexer,
    /// Number of `?` markers seen so far; the next one gets this ordinal
    positional_count: usize,
    /// Current expression nesting
    depth: usize,
}

impl SqlParser {
    pub fn new(input: &str) -> Self {
        Self {
            lexer: SqlLexer::new(input),
            positional_count: 0,
            depth: 0,
        }
    }

    fn current_token(&mut self) -> CompileResult<&Token> {
        Ok(&self.lexer.peek_token()?.token)
    }

    fn advance(&mut self) -> CompileResult<SpannedToken> {
        self.lexer.next_token()
    }

    fn unexpected(&mut self, expected: &str) -> CompileError {
        match self.lexer.peek_token() {
            Ok(found) => CompileError::Parse(format!(
                "Expected {}, found {:?} at position {}",
                expected, found.token, found.position
            )),
            Err(err) => err,
        }
    }

    fn check(&mut self, expected: &Token) -> CompileResult<bool> {
        Ok(self.current_token()? == expected)
    }

    fn consume(&mut self, expected: &Token) -> CompileResult<bool> {
        if self.check(expected)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, expected: Token) -> CompileResult<()> {
        if self.consume(&expected)? {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", expected)))
        }
    }

    fn check_keyword(&mut self, keyword: &str) -> CompileResult<bool> {
        Ok(self.current_token()?.is_keyword(keyword))
    }

    fn consume_keyword(&mut self, keyword: &str) -> CompileResult<bool> {
        if self.check_keyword(keyword)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> CompileResult<()> {
        if self.consume_keyword(keyword)? {
            Ok(())
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn expect_identifier(&mut self) -> CompileResult<String> {
        match self.current_token()? {
            Token::Identifier(name) if !is_reserved(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// `ident(.ident)*` joined with dots.
    fn parse_dotted_name(&mut self) -> CompileResult<String> {
        let mut name = self.expect_identifier()?;
        while self.consume(&Token::Dot)? {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    /// Consumes a bare identifier as an alias unless it is a reserved keyword.
    fn parse_optional_alias(&mut self) -> CompileResult<Option<String>> {
        if self.consume_keyword("AS")? {
            return Ok(Some(self.expect_identifier()?));
        }
        match self.current_token()? {
            Token::Identifier(name) if !is_reserved(name) => {
                let alias = name.clone();
                self.advance()?;
                Ok(Some(alias))
            }
            _ => Ok(None),
        }
    }

    pub fn parse(&mut self) -> CompileResult<Statement> {
        let keyword = match self.current_token()? {
            Token::Identifier(word) => word.to_ascii_uppercase(),
            _ => return Err(self.unexpected("statement keyword")),
        };

        let stmt = match keyword.as_str() {
            "SELECT" => Statement::Select(self.parse_select()?),
            "INSERT" => Statement::Insert(self.parse_insert()?),
            "UPDATE" => Statement::Update(self.parse_update()?),
            "DELETE" => Statement::Delete(self.parse_delete()?),
            "BEGIN" | "COMMIT" | "ROLLBACK" => {
                self.advance()?;
                if !self.consume_keyword("TRANSACTION")? {
                    self.consume_keyword("WORK")?;
                }
                match keyword.as_str() {
                    "BEGIN" => Statement::Begin,
                    "COMMIT" => Statement::Commit,
                    _ => Statement::Rollback,
                }
            }
            other => {
                return Err(CompileError::Parse(format!(
                    "Unexpected token at start of statement: {}",
                    other
                )));
            }
        };

        // Optional semicolon at end
        self.consume(&Token::Semicolon)?;
        if !self.check(&Token::Eof)? {
            return Err(self.unexpected("end of statement"));
        }

        tracing::debug!(kind = stmt.kind(), "parsed statement");
        Ok(stmt)
    }

    fn parse_select(&mut self) -> CompileResult<SelectStatement> {
        self.expect_keyword("SELECT")?;

        let columns = self.parse_select_items()?;

        self.expect_keyword("FROM")?;
        let from = self.parse_table_ref()?;

        let joins = self.parse_join_clauses()?;

        let where_clause = if self.consume_keyword("WHERE")? {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let group_by = if self.consume_keyword("GROUP")? {
            self.expect_keyword("BY")?;
            self.parse_field_list()?
        } else {
            Vec::new()
        };

        let having = if self.consume_keyword("HAVING")? {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let order_by = if self.consume_keyword("ORDER")? {
            self.expect_keyword("BY")?;
            self.parse_order_by_list()?
        } else {
            Vec::new()
        };

        let limit = if self.consume_keyword("LIMIT")? {
            Some(self.parse_row_count("LIMIT")?)
        } else {
            None
        };

        let offset = if self.consume_keyword("OFFSET")? {
            Some(self.parse_row_count("OFFSET")?)
        } else {
            None
        };

        Ok(SelectStatement {
            columns,
            from,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_items(&mut self) -> CompileResult<Vec<SelectItem>> {
        let mut items = Vec::new();

        loop {
            let item = if self.consume(&Token::Star)? {
                SelectItem {
                    expr: Expr::Wildcard,
                    alias: None,
                }
            } else {
                let expr = self.parse_expression()?;
                let alias = self.parse_optional_alias()?;
                SelectItem { expr, alias }
            };
            items.push(item);

            if !self.consume(&Token::Comma)? {
                break;
            }
        }

        Ok(items)
    }

    fn parse_table_ref(&mut self) -> CompileResult<TableRef> {
        let name = self.expect_identifier()?;
        let alias = self.parse_optional_alias()?;
        Ok(TableRef { name, alias })
    }

    fn parse_join_clauses(&mut self) -> CompileResult<Vec<JoinClause>> {
        let mut joins = Vec::new();

        loop {
            let join_type = if self.consume_keyword("JOIN")? {
                JoinType::Inner
            } else if self.consume_keyword("INNER")? {
                self.expect_keyword("JOIN")?;
                JoinType::Inner
            } else if self.consume_keyword("LEFT")? {
                self.consume_keyword("OUTER")?;
                self.expect_keyword("JOIN")?;
                JoinType::Left
            } else {
                if let Token::Identifier(word) = self.current_token()? {
                    if ["RIGHT", "FULL", "CROSS"]
                        .iter()
                        .any(|kind| kind.eq_ignore_ascii_case(word))
                    {
                        return Err(CompileError::UnsupportedFeature(format!(
                            "{} JOIN (only INNER and LEFT joins are supported)",
                            word.to_ascii_uppercase()
                        )));
                    }
                }
                break;
            };

            let table = self.parse_table_ref()?;
            self.expect_keyword("ON")?;
            let on = self.parse_join_condition()?;

            joins.push(JoinClause {
                join_type,
                table,
                on,
            });
        }

        Ok(joins)
    }

    fn parse_join_condition(&mut self) -> CompileResult<JoinCondition> {
        match self.parse_expression()? {
            Expr::BinaryOp {
                left,
                op: BinaryOp::Eq,
                right,
            } => match (*left, *right) {
                (Expr::Field(left), Expr::Field(right)) => Ok(JoinCondition { left, right }),
                _ => Err(CompileError::UnsupportedFeature(
                    "join predicate must compare two fields".to_string(),
                )),
            },
            _ => Err(CompileError::UnsupportedFeature(
                "join predicate must be a single field = field equality".to_string(),
            )),
        }
    }

    fn parse_field_list(&mut self) -> CompileResult<Vec<FieldRef>> {
        let mut fields = Vec::new();

        loop {
            match self.parse_expression()? {
                Expr::Field(field) => fields.push(field),
                other => {
                    return Err(CompileError::UnsupportedFeature(format!(
                        "GROUP BY accepts field references only, found {:?}",
                        other
                    )));
                }
            }

            if !self.consume(&Token::Comma)? {
                break;
            }
        }

        Ok(fields)
    }

    fn parse_order_by_list(&mut self) -> CompileResult<Vec<OrderByItem>> {
        let mut items = Vec::new();

        loop {
            let expr = self.parse_expression()?;

            let descending = if self.consume_keyword("DESC")? {
                true
            } else {
                self.consume_keyword("ASC")?;
                false
            };

            items.push(OrderByItem { expr, descending });

            if !self.consume(&Token::Comma)? {
                break;
            }
        }

        Ok(items)
    }

    /// LIMIT/OFFSET operand: an integer literal or a parameter.
    fn parse_row_count(&mut self, clause: &str) -> CompileResult<Expr> {
        match self.current_token()? {
            Token::Number(text) if !text.contains('.') => {
                let text = text.clone();
                self.advance()?;
                Ok(Expr::Number(text))
            }
            Token::Positional | Token::Named(_) => self.parse_primary_expression(),
            _ => Err(self.unexpected(&format!("integer after {}", clause))),
        }
    }

    fn parse_insert(&mut self) -> CompileResult<InsertStatement> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;

        let table = self.expect_identifier()?;

        let columns = if self.consume(&Token::LeftParen)? {
            let mut cols = Vec::new();
            loop {
                cols.push(self.parse_dotted_name()?);
                if !self.consume(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            Some(cols)
        } else {
            None
        };

        let source = if self.check_keyword("SELECT")? {
            InsertSource::Select(Box::new(self.parse_select()?))
        } else {
            self.expect_keyword("VALUES")?;
            InsertSource::Values(self.parse_value_rows(columns.as_deref())?)
        };

        Ok(InsertStatement {
            table,
            columns,
            source,
        })
    }

    fn parse_value_rows(&mut self, columns: Option<&[String]>) -> CompileResult<Vec<Vec<Expr>>> {
        let mut rows = Vec::new();

        loop {
            let row = match self.current_token()? {
                // A bare parameter standing for a whole document
                Token::Positional | Token::Named(_) => vec![self.parse_primary_expression()?],
                _ => {
                    self.expect(Token::LeftParen)?;
                    let row = self.parse_expression_list()?;
                    self.expect(Token::RightParen)?;
                    row
                }
            };

            if let Some(columns) = columns {
                if row.len() != columns.len() {
                    return Err(CompileError::Parse(format!(
                        "VALUES row {} has {} values but {} columns were declared",
                        rows.len() + 1,
                        row.len(),
                        columns.len()
                    )));
                }
            }
            rows.push(row);

            if !self.consume(&Token::Comma)? {
                break;
            }
        }

        Ok(rows)
    }

    fn parse_update(&mut self) -> CompileResult<UpdateStatement> {
        self.expect_keyword("UPDATE")?;

        let table = self.expect_identifier()?;

        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.parse_dotted_name()?;
            self.expect(Token::Equal)?;
            let value = self.parse_expression()?;
            assignments.push((column, value));

            if !self.consume(&Token::Comma)? {
                break;
            }
        }

        let where_clause = if self.consume_keyword("WHERE")? {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> CompileResult<DeleteStatement> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;

        let table = self.expect_identifier()?;

        let where_clause = if self.consume_keyword("WHERE")? {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(DeleteStatement {
            table,
            where_clause,
        })
    }
}
