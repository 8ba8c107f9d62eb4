//! Recursive-descent SQL parser with precedence climbing for expressions

use crate::error::{Error, Result};
use crate::parsing::ast::{
    ColumnSpec, Direction, Expression, FromItem, Literal, Operator, SelectStatement, Statement,
};
use crate::parsing::lexer::{Keyword, Lexer, Token};
use crate::types::LogicalType;
use std::iter::Peekable;

/// The parser turns a token stream into a [`Statement`]. It only checks that
/// the syntax is well-formed; whether tables or columns exist is the
/// binder's job.
pub struct Parser<'a> {
    lexer: Peekable<Lexer<'a>>,
}

impl Parser<'_> {
    /// Parses the input string as a single statement, ending with an
    /// optional semicolon.
    pub fn parse(statement: &str) -> Result<Statement> {
        let mut parser = Parser {
            lexer: Lexer::new(statement).peekable(),
        };
        let statement = parser.parse_statement()?;
        parser.skip(Token::Semicolon);
        if let Some(token) = parser.lexer.next().transpose()? {
            return Err(Error::Syntax(format!("unexpected token {}", token)));
        }
        Ok(statement)
    }

    fn next(&mut self) -> Result<Token> {
        self.lexer
            .next()
            .transpose()?
            .ok_or_else(|| Error::Syntax("unexpected end of input".into()))
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        match self.lexer.peek() {
            Some(Ok(token)) => Ok(Some(token)),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }

    fn next_if(&mut self, predicate: impl Fn(&Token) -> bool) -> Option<Token> {
        self.peek().ok().flatten().filter(|&t| predicate(t))?;
        self.next().ok()
    }

    fn skip(&mut self, token: Token) -> bool {
        self.next_if(|t| *t == token).is_some()
    }

    fn skip_keyword(&mut self, keyword: Keyword) -> bool {
        self.skip(Token::Keyword(keyword))
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next()?;
        if token != expected {
            return Err(Error::Syntax(format!(
                "expected {}, found {}",
                expected, token
            )));
        }
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn next_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            token => Err(Error::Syntax(format!("expected identifier, found {}", token))),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek()? {
            Some(Token::Keyword(Keyword::Create)) => self.parse_create_table(),
            Some(Token::Keyword(Keyword::Drop)) => self.parse_drop_table(),
            Some(Token::Keyword(Keyword::Alter)) => self.parse_alter(),
            Some(Token::Keyword(Keyword::Insert)) => self.parse_insert(),
            Some(Token::Keyword(Keyword::Update)) => self.parse_update(),
            Some(Token::Keyword(Keyword::Delete)) => self.parse_delete(),
            Some(Token::Keyword(Keyword::Select)) => {
                Ok(Statement::Select(self.parse_select()?))
            }
            Some(Token::Keyword(Keyword::Begin)) => {
                self.next()?;
                Ok(Statement::Begin)
            }
            Some(Token::Keyword(Keyword::Commit)) => {
                self.next()?;
                Ok(Statement::Commit)
            }
            Some(Token::Keyword(Keyword::Rollback)) => {
                self.next()?;
                Ok(Statement::Rollback)
            }
            Some(Token::Keyword(Keyword::Prepare)) => self.parse_prepare(),
            Some(Token::Keyword(Keyword::Execute)) => self.parse_execute(),
            Some(Token::Keyword(Keyword::Deallocate)) => self.parse_deallocate(),
            Some(Token::Keyword(Keyword::Explain)) => {
                self.next()?;
                Ok(Statement::Explain(Box::new(self.parse_statement()?)))
            }
            Some(Token::Keyword(Keyword::Checkpoint)) => {
                self.next()?;
                Ok(Statement::Checkpoint)
            }
            Some(token) => Err(Error::Syntax(format!("unexpected token {}", token))),
            None => Err(Error::Syntax("empty statement".into())),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Create)?;
        self.expect_keyword(Keyword::Table)?;
        let name = self.next_ident()?;
        self.expect(Token::OpenParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column_spec()?);
            if !self.skip(Token::Comma) {
                break;
            }
        }
        self.expect(Token::CloseParen)?;
        Ok(Statement::CreateTable { name, columns })
    }

    fn parse_column_spec(&mut self) -> Result<ColumnSpec> {
        let name = self.next_ident()?;
        let datatype = self.parse_datatype()?;
        let mut nullable = true;
        let mut default = None;
        loop {
            if self.skip_keyword(Keyword::Not) {
                self.expect_keyword(Keyword::Null)?;
                nullable = false;
            } else if self.skip_keyword(Keyword::Default) {
                default = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        Ok(ColumnSpec {
            name,
            datatype,
            nullable,
            default,
        })
    }

    fn parse_datatype(&mut self) -> Result<LogicalType> {
        let token = self.next()?;
        let datatype = match token {
            Token::Keyword(Keyword::Boolean) => LogicalType::Boolean,
            Token::Keyword(Keyword::Tinyint) => LogicalType::TinyInt,
            Token::Keyword(Keyword::Smallint) => LogicalType::SmallInt,
            Token::Keyword(Keyword::Integer) => LogicalType::Integer,
            Token::Keyword(Keyword::Bigint) => LogicalType::BigInt,
            Token::Keyword(Keyword::Real) => LogicalType::Real,
            Token::Keyword(Keyword::Double) => LogicalType::Double,
            Token::Keyword(Keyword::Date) => LogicalType::Date,
            Token::Keyword(Keyword::Timestamp) => LogicalType::Timestamp,
            Token::Keyword(Keyword::Blob) => LogicalType::Blob,
            Token::Keyword(Keyword::Varchar) => {
                let mut width = None;
                if self.skip(Token::OpenParen) {
                    let n = match self.next()? {
                        Token::Number(n) => n
                            .parse::<usize>()
                            .map_err(|_| Error::Syntax(format!("invalid VARCHAR width {}", n)))?,
                        token => {
                            return Err(Error::Syntax(format!(
                                "expected width, found {}",
                                token
                            )))
                        }
                    };
                    self.expect(Token::CloseParen)?;
                    width = Some(n);
                }
                LogicalType::Varchar(width)
            }
            token => return Err(Error::Syntax(format!("expected data type, found {}", token))),
        };
        Ok(datatype)
    }

    fn parse_drop_table(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Drop)?;
        self.expect_keyword(Keyword::Table)?;
        let if_exists = if self.skip_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Exists)?;
            true
        } else {
            false
        };
        let name = self.next_ident()?;
        let cascade = self.skip_keyword(Keyword::Cascade);
        Ok(Statement::DropTable {
            name,
            if_exists,
            cascade,
        })
    }

    fn parse_alter(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Alter)?;
        self.expect_keyword(Keyword::Table)?;
        let table = self.next_ident()?;
        self.expect_keyword(Keyword::Rename)?;
        self.expect_keyword(Keyword::Column)?;
        let from = self.next_ident()?;
        self.expect_keyword(Keyword::To)?;
        let to = self.next_ident()?;
        Ok(Statement::RenameColumn { table, from, to })
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let table = self.next_ident()?;
        let mut columns = None;
        if self.skip(Token::OpenParen) {
            let mut names = Vec::new();
            loop {
                names.push(self.next_ident()?);
                if !self.skip(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseParen)?;
            columns = Some(names);
        }
        self.expect_keyword(Keyword::Values)?;
        let mut values = Vec::new();
        loop {
            self.expect(Token::OpenParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_expression()?);
                if !self.skip(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseParen)?;
            values.push(row);
            if !self.skip(Token::Comma) {
                break;
            }
        }
        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    fn parse_update(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Update)?;
        let table = self.next_ident()?;
        self.expect_keyword(Keyword::Set)?;
        let mut set = Vec::new();
        loop {
            let column = self.next_ident()?;
            self.expect(Token::Equal)?;
            set.push((column, self.parse_expression()?));
            if !self.skip(Token::Comma) {
                break;
            }
        }
        let predicate = if self.skip_keyword(Keyword::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Statement::Update {
            table,
            set,
            predicate,
        })
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let table = self.next_ident()?;
        let predicate = if self.skip_keyword(Keyword::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Statement::Delete { table, predicate })
    }

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect_keyword(Keyword::Select)?;
        let mut projection = Vec::new();
        loop {
            if self.skip(Token::Asterisk) {
                projection.push((Expression::Star, None));
            } else {
                let expr = self.parse_expression()?;
                let alias = if self.skip_keyword(Keyword::As) {
                    Some(self.next_ident()?)
                } else if let Some(Token::Ident(_)) = self.peek()? {
                    Some(self.next_ident()?)
                } else {
                    None
                };
                projection.push((expr, alias));
            }
            if !self.skip(Token::Comma) {
                break;
            }
        }

        let mut from = Vec::new();
        if self.skip_keyword(Keyword::From) {
            loop {
                from.push(self.parse_from_item()?);
                if !self.skip(Token::Comma) {
                    break;
                }
            }
        }

        let predicate = if self.skip_keyword(Keyword::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.skip_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            loop {
                group_by.push(self.parse_expression()?);
                if !self.skip(Token::Comma) {
                    break;
                }
            }
        }

        let mut order_by = Vec::new();
        if self.skip_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.parse_expression()?;
                let direction = if self.skip_keyword(Keyword::Desc) {
                    Direction::Descending
                } else {
                    self.skip_keyword(Keyword::Asc);
                    Direction::Ascending
                };
                order_by.push((expr, direction));
                if !self.skip(Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.skip_keyword(Keyword::Limit) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let offset = if self.skip_keyword(Keyword::Offset) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(SelectStatement {
            projection,
            from,
            predicate,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_from_item(&mut self) -> Result<FromItem> {
        let mut item = self.parse_table_ref()?;
        loop {
            let joined = if self.skip_keyword(Keyword::Inner) {
                self.expect_keyword(Keyword::Join)?;
                true
            } else {
                self.skip_keyword(Keyword::Join)
            };
            if !joined {
                break;
            }
            let right = self.parse_table_ref()?;
            let predicate = if self.skip_keyword(Keyword::On) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            item = FromItem::Join {
                left: Box::new(item),
                right: Box::new(right),
                predicate,
            };
        }
        Ok(item)
    }

    fn parse_table_ref(&mut self) -> Result<FromItem> {
        let name = self.next_ident()?;
        let alias = if self.skip_keyword(Keyword::As) {
            Some(self.next_ident()?)
        } else if let Some(Token::Ident(_)) = self.peek()? {
            Some(self.next_ident()?)
        } else {
            None
        };
        Ok(FromItem::Table { name, alias })
    }

    fn parse_prepare(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Prepare)?;
        let name = self.next_ident()?;
        self.expect_keyword(Keyword::As)?;
        let statement = Box::new(self.parse_statement()?);
        Ok(Statement::Prepare { name, statement })
    }

    fn parse_execute(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Execute)?;
        let name = self.next_ident()?;
        let mut arguments = Vec::new();
        if self.skip(Token::OpenParen) {
            if !self.skip(Token::CloseParen) {
                loop {
                    arguments.push(self.parse_expression()?);
                    if !self.skip(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::CloseParen)?;
            }
        }
        Ok(Statement::Execute { name, arguments })
    }

    fn parse_deallocate(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Deallocate)?;
        self.skip_keyword(Keyword::Prepare);
        let name = self.next_ident()?;
        Ok(Statement::Deallocate { name })
    }

    // Expression parsing, precedence climbing.

    pub fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_expression_at(0)
    }

    fn parse_expression_at(&mut self, min_precedence: u8) -> Result<Expression> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let Some(token) = self.peek()?.cloned() else {
                break;
            };
            let Some(precedence) = Self::infix_precedence(&token) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            lhs = self.parse_infix(lhs, precedence)?;
        }
        Ok(lhs)
    }

    fn infix_precedence(token: &Token) -> Option<u8> {
        Some(match token {
            Token::Keyword(Keyword::Or) => 1,
            Token::Keyword(Keyword::And) => 2,
            Token::Equal
            | Token::NotEqual
            | Token::GreaterThan
            | Token::GreaterThanOrEqual
            | Token::LessThan
            | Token::LessThanOrEqual
            | Token::Keyword(Keyword::Is)
            | Token::Keyword(Keyword::In)
            | Token::Keyword(Keyword::Not) => 4,
            Token::Plus | Token::Minus => 5,
            Token::Asterisk | Token::Slash | Token::Percent => 6,
            _ => return None,
        })
    }

    fn parse_infix(&mut self, lhs: Expression, precedence: u8) -> Result<Expression> {
        let token = self.next()?;
        let lhs = Box::new(lhs);
        // IS [NOT] NULL and [NOT] IN are postfix forms at comparison
        // precedence.
        match token {
            Token::Keyword(Keyword::Is) => {
                let negated = self.skip_keyword(Keyword::Not);
                self.expect_keyword(Keyword::Null)?;
                return Ok(Operator::IsNull { expr: lhs, negated }.into());
            }
            Token::Keyword(Keyword::Not) => {
                self.expect_keyword(Keyword::In)?;
                let list = self.parse_in_list()?;
                return Ok(Operator::InList {
                    expr: lhs,
                    list,
                    negated: true,
                }
                .into());
            }
            Token::Keyword(Keyword::In) => {
                let list = self.parse_in_list()?;
                return Ok(Operator::InList {
                    expr: lhs,
                    list,
                    negated: false,
                }
                .into());
            }
            _ => {}
        }
        let rhs = Box::new(self.parse_expression_at(precedence + 1)?);
        Ok(match token {
            Token::Keyword(Keyword::Or) => Operator::Or(lhs, rhs),
            Token::Keyword(Keyword::And) => Operator::And(lhs, rhs),
            Token::Equal => Operator::Equal(lhs, rhs),
            Token::NotEqual => Operator::NotEqual(lhs, rhs),
            Token::GreaterThan => Operator::GreaterThan(lhs, rhs),
            Token::GreaterThanOrEqual => Operator::GreaterThanOrEqual(lhs, rhs),
            Token::LessThan => Operator::LessThan(lhs, rhs),
            Token::LessThanOrEqual => Operator::LessThanOrEqual(lhs, rhs),
            Token::Plus => Operator::Add(lhs, rhs),
            Token::Minus => Operator::Subtract(lhs, rhs),
            Token::Asterisk => Operator::Multiply(lhs, rhs),
            Token::Slash => Operator::Divide(lhs, rhs),
            Token::Percent => Operator::Remainder(lhs, rhs),
            token => return Err(Error::Syntax(format!("unexpected operator {}", token))),
        }
        .into())
    }

    fn parse_in_list(&mut self) -> Result<Vec<Expression>> {
        self.expect(Token::OpenParen)?;
        let mut list = Vec::new();
        loop {
            list.push(self.parse_expression()?);
            if !self.skip(Token::Comma) {
                break;
            }
        }
        self.expect(Token::CloseParen)?;
        Ok(list)
    }

    fn parse_prefix(&mut self) -> Result<Expression> {
        let token = self.next()?;
        Ok(match token {
            Token::Keyword(Keyword::Not) => {
                Operator::Not(Box::new(self.parse_expression_at(3)?)).into()
            }
            Token::Minus => Operator::Negate(Box::new(self.parse_expression_at(7)?)).into(),
            Token::Plus => Operator::Identity(Box::new(self.parse_expression_at(7)?)).into(),
            Token::Number(n) => {
                if n.contains(['.', 'e', 'E']) {
                    Expression::Literal(Literal::Float(
                        n.parse()
                            .map_err(|_| Error::Syntax(format!("invalid number {}", n)))?,
                    ))
                } else {
                    Expression::Literal(Literal::Integer(
                        n.parse()
                            .map_err(|_| Error::Syntax(format!("invalid number {}", n)))?,
                    ))
                }
            }
            Token::String(s) => Expression::Literal(Literal::String(s)),
            Token::Keyword(Keyword::True) => Expression::Literal(Literal::Boolean(true)),
            Token::Keyword(Keyword::False) => Expression::Literal(Literal::Boolean(false)),
            Token::Keyword(Keyword::Null) => Expression::Literal(Literal::Null),
            Token::Parameter(index) => Expression::Parameter(index - 1),
            Token::Keyword(Keyword::Cast) => {
                self.expect(Token::OpenParen)?;
                let expr = Box::new(self.parse_expression()?);
                self.expect_keyword(Keyword::As)?;
                let datatype = self.parse_datatype()?;
                self.expect(Token::CloseParen)?;
                Expression::Cast { expr, datatype }
            }
            // Typed literals: DATE '...', TIMESTAMP '...'.
            Token::Keyword(Keyword::Date) => {
                let literal = self.parse_string_literal()?;
                Expression::Cast {
                    expr: Box::new(Expression::Literal(Literal::String(literal))),
                    datatype: LogicalType::Date,
                }
            }
            Token::Keyword(Keyword::Timestamp) => {
                let literal = self.parse_string_literal()?;
                Expression::Cast {
                    expr: Box::new(Expression::Literal(Literal::String(literal))),
                    datatype: LogicalType::Timestamp,
                }
            }
            Token::OpenParen => {
                if let Some(Token::Keyword(Keyword::Select)) = self.peek()? {
                    let select = self.parse_select()?;
                    self.expect(Token::CloseParen)?;
                    Expression::Subquery(Box::new(select))
                } else {
                    let expr = self.parse_expression()?;
                    self.expect(Token::CloseParen)?;
                    expr
                }
            }
            Token::Ident(ident) => {
                if self.skip(Token::OpenParen) {
                    let mut args = Vec::new();
                    if !self.skip(Token::CloseParen) {
                        loop {
                            if self.skip(Token::Asterisk) {
                                args.push(Expression::Star);
                            } else {
                                args.push(self.parse_expression()?);
                            }
                            if !self.skip(Token::Comma) {
                                break;
                            }
                        }
                        self.expect(Token::CloseParen)?;
                    }
                    Expression::Function(ident, args)
                } else if self.skip(Token::Period) {
                    let column = self.next_ident()?;
                    Expression::Column(Some(ident), column)
                } else {
                    Expression::Column(None, ident)
                }
            }
            token => return Err(Error::Syntax(format!("unexpected token {}", token))),
        })
    }

    fn parse_string_literal(&mut self) -> Result<String> {
        match self.next()? {
            Token::String(s) => Ok(s),
            token => Err(Error::Syntax(format!(
                "expected string literal, found {}",
                token
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_with_clauses() {
        let stmt = Parser::parse(
            "SELECT a, count(*) FROM t WHERE a > 1 GROUP BY a ORDER BY a DESC LIMIT 10;",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert_eq!(select.projection.len(), 2);
        assert!(select.predicate.is_some());
        assert_eq!(select.group_by.len(), 1);
        assert_eq!(select.order_by[0].1, Direction::Descending);
        assert!(select.limit.is_some());
    }

    #[test]
    fn parses_typed_literals() {
        let stmt = Parser::parse("SELECT AGE(TIMESTAMP '2001-04-10', TIMESTAMP '1957-06-13')");
        assert!(stmt.is_ok());
    }

    #[test]
    fn parses_prepare_execute() {
        let stmt = Parser::parse("PREPARE p AS INSERT INTO t VALUES ($1)").unwrap();
        let Statement::Prepare { name, statement } = stmt else {
            panic!("expected PREPARE");
        };
        assert_eq!(name, "p");
        assert!(matches!(*statement, Statement::Insert { .. }));

        let stmt = Parser::parse("EXECUTE p(42)").unwrap();
        assert!(matches!(stmt, Statement::Execute { .. }));
    }

    #[test]
    fn operator_precedence() {
        let expr = Parser::parse("SELECT 1 + 2 * 3 = 7 AND true").unwrap();
        let Statement::Select(select) = expr else {
            panic!()
        };
        // AND binds loosest: ((1 + (2 * 3)) = 7) AND true
        assert!(matches!(
            select.projection[0].0,
            Expression::Operator(Operator::And(_, _))
        ));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(Parser::parse("SELECT 1 SELECT 2").is_err());
    }
}
