//! Parsing SQL text into a query AST.
//!
//! Thin wrapper around sqlparser that enforces the single-query contract the
//! analysis relies on: exactly one statement, and that statement is a query.

use sqlparser::ast::{Query, Statement};
use sqlparser::parser::Parser;
use thiserror::Error;

use super::dialect::Dialect;

/// Errors that can occur while parsing SQL text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("SQL text is empty")]
    Empty,

    #[error("SQL syntax error ({dialect}): {message}")]
    Syntax { dialect: Dialect, message: String },

    #[error("Expected a single statement, found {0}")]
    MultipleStatements(usize),

    #[error("Expected a query statement, found: {0}")]
    NotAQuery(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse SQL text into a query AST.
///
/// A single trailing semicolon is accepted.
pub fn parse(sql: &str, dialect: Dialect) -> ParseResult<Query> {
    if sql.trim().trim_end_matches(';').trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let parser_dialect = dialect.parser_dialect();
    let mut statements =
        Parser::parse_sql(&*parser_dialect, sql).map_err(|e| ParseError::Syntax {
            dialect,
            message: e.to_string(),
        })?;

    if statements.len() != 1 {
        return Err(ParseError::MultipleStatements(statements.len()));
    }

    match statements.remove(0) {
        Statement::Query(query) => Ok(*query),
        other => Err(ParseError::NotAQuery(statement_summary(&other))),
    }
}

/// First few words of a statement, for error messages.
fn statement_summary(statement: &Statement) -> String {
    let text = statement.to_string();
    text.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_query() {
        let query = parse("select a from t", Dialect::Generic).unwrap();
        assert_eq!(query.to_string(), "SELECT a FROM t");
    }

    #[test]
    fn test_parse_trailing_semicolon() {
        assert!(parse("select a from t;", Dialect::Postgres).is_ok());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse("  ;  ", Dialect::Generic), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_syntax_error() {
        let err = parse("selects a from T", Dialect::Generic).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }), "got {err:?}");
    }

    #[test]
    fn test_parse_multiple_statements() {
        let err = parse("select 1; select 2", Dialect::Generic).unwrap_err();
        assert_eq!(err, ParseError::MultipleStatements(2));
    }

    #[test]
    fn test_parse_rejects_non_query() {
        let err = parse("delete from t where a = 1", Dialect::Generic).unwrap_err();
        assert!(matches!(err, ParseError::NotAQuery(_)), "got {err:?}");
    }
}
