//! SQL front-end: lexer, parser and the statement AST the binder consumes.

pub mod ast;
mod lexer;
mod parser;

pub use lexer::{Keyword, Lexer, Token};
pub use parser::Parser;

use crate::error::Result;

/// Parse a SQL string into a statement AST.
pub fn parse_sql(sql: &str) -> Result<ast::Statement> {
    Parser::parse(sql)
}
