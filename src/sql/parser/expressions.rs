//! Expression parsing.
//!
//! Precedence, lowest first:
//! - `OR`
//! - `AND`
//! - prefix `NOT`
//! - comparison and membership: `= != <> < <= > >=`, `[NOT] IN`,
//!   `[NOT] BETWEEN .. AND ..`, `[NOT] LIKE`, `IS [NOT] NULL`
//! - additive: `+ -`
//! - multiplicative: `* /`
//! - unary minus
//! - primary: literals, parameters, field references, calls, `( expr )`, `*`

use super::{is_reserved, SqlParser, MAX_NESTING_DEPTH};
use crate::error::{CompileError, CompileResult};
use crate::sql::ast::{BinaryOp, Expr, FieldRef, UnaryOp};
use crate::sql::lexer::Token;

impl SqlParser {
    pub(super) fn parse_expression(&mut self) -> CompileResult<Expr> {
        self.nested(Self::parse_or_expression)
    }

    /// Runs `parse` one nesting level deeper.
    fn nested(&mut self, parse: fn(&mut Self) -> CompileResult<Expr>) -> CompileResult<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CompileError::Parse(format!(
                "Expression nested deeper than {} levels",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        let expr = parse(self);
        self.depth -= 1;
        expr
    }

    pub(super) fn parse_expression_list(&mut self) -> CompileResult<Vec<Expr>> {
        let mut exprs = Vec::new();

        loop {
            exprs.push(self.parse_expression()?);

            if !self.consume(&Token::Comma)? {
                break;
            }
        }

        Ok(exprs)
    }

    fn parse_or_expression(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_and_expression()?;

        while self.consume_keyword("OR")? {
            let right = self.parse_and_expression()?;
            left = Expr::binary(left, BinaryOp::Or, right);
        }

        Ok(left)
    }

    fn parse_and_expression(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_not_expression()?;

        while self.consume_keyword("AND")? {
            let right = self.parse_not_expression()?;
            left = Expr::binary(left, BinaryOp::And, right);
        }

        Ok(left)
    }

    fn parse_not_expression(&mut self) -> CompileResult<Expr> {
        if self.consume_keyword("NOT")? {
            let expr = self.nested(Self::parse_not_expression)?;
            return Ok(Expr::not(expr));
        }

        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> CompileResult<Expr> {
        let left = self.parse_additive_expression()?;

        if self.consume_keyword("IS")? {
            let negated = self.consume_keyword("NOT")?;
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = self.consume_keyword("NOT")?;

        if self.consume_keyword("BETWEEN")? {
            let low = self.parse_additive_expression()?;
            self.expect_keyword("AND")?;
            let high = self.parse_additive_expression()?;
            let between = Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
            };
            return Ok(if negated { Expr::not(between) } else { between });
        }

        if self.consume_keyword("IN")? {
            let list = self.parse_in_operand()?;
            let op = if negated { BinaryOp::NotIn } else { BinaryOp::In };
            return Ok(Expr::binary(left, op, list));
        }

        if self.consume_keyword("LIKE")? {
            let pattern = self.parse_additive_expression()?;
            let like = Expr::binary(left, BinaryOp::Like, pattern);
            return Ok(if negated { Expr::not(like) } else { like });
        }

        if negated {
            return Err(self.unexpected("IN, LIKE or BETWEEN after NOT"));
        }

        let op = match self.current_token()? {
            Token::Equal => BinaryOp::Eq,
            Token::NotEqual => BinaryOp::NotEq,
            Token::LessThan => BinaryOp::Lt,
            Token::LessThanEq => BinaryOp::LtEq,
            Token::GreaterThan => BinaryOp::Gt,
            Token::GreaterThanEq => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_additive_expression()?;

        Ok(Expr::binary(left, op, right))
    }

    /// `( list )` or a single parameter expected to bind to a sequence.
    fn parse_in_operand(&mut self) -> CompileResult<Expr> {
        match self.current_token()? {
            Token::Positional | Token::Named(_) => self.parse_primary_expression(),
            _ => {
                self.expect(Token::LeftParen)?;
                let list = self.parse_expression_list()?;
                self.expect(Token::RightParen)?;
                Ok(Expr::Array(list))
            }
        }
    }

    fn parse_additive_expression(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_multiplicative_expression()?;

        loop {
            let op = match self.current_token()? {
                Token::Plus => BinaryOp::Plus,
                Token::Minus => BinaryOp::Minus,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative_expression()?;
            left = Expr::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_unary_expression()?;

        loop {
            let op = match self.current_token()? {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary_expression()?;
            left = Expr::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> CompileResult<Expr> {
        if self.consume(&Token::Minus)? {
            let operand = self.nested(Self::parse_unary_expression)?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Minus,
                operand: Box::new(operand),
            });
        }

        self.parse_primary_expression()
    }

    pub(super) fn parse_primary_expression(&mut self) -> CompileResult<Expr> {
        let token = self.advance()?;

        match token.token {
            Token::Number(text) => Ok(Expr::Number(text)),
            Token::String(s) => Ok(Expr::String(s)),
            Token::Positional => {
                let ordinal = self.positional_count;
                self.positional_count += 1;
                Ok(Expr::Positional(ordinal))
            }
            Token::Named(name) => Ok(Expr::Named(name)),
            Token::Star => Ok(Expr::Wildcard),
            Token::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                if name.eq_ignore_ascii_case("NULL") {
                    return Ok(Expr::Null);
                }
                if name.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Boolean(true));
                }
                if name.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Boolean(false));
                }
                if is_reserved(&name) {
                    return Err(CompileError::Parse(format!(
                        "Unexpected keyword {} in expression at position {}",
                        name.to_ascii_uppercase(),
                        token.position
                    )));
                }

                if self.consume(&Token::LeftParen)? {
                    let args = if self.check(&Token::RightParen)? {
                        Vec::new()
                    } else {
                        self.parse_expression_list()?
                    };
                    self.expect(Token::RightParen)?;
                    return Ok(Expr::Function {
                        name: name.to_ascii_uppercase(),
                        args,
                    });
                }

                if self.consume(&Token::Dot)? {
                    let mut path = self.expect_identifier()?;
                    while self.consume(&Token::Dot)? {
                        path.push('.');
                        path.push_str(&self.expect_identifier()?);
                    }
                    return Ok(Expr::Field(FieldRef::qualified(name, path)));
                }

                Ok(Expr::Field(FieldRef::new(name)))
            }
            other => Err(CompileError::Parse(format!(
                "Unexpected token in expression: {:?} at position {}",
                other, token.position
            ))),
        }
    }
}
