//! SQL front end.
//!
//! Adapts sqlparser's AST into the scope model the analyses work on:
//!
//! - [`parse`] - SQL text to a single query AST
//! - [`scope`] - query AST to an arena of scopes ([`traverse_scope`])
//! - [`expr`] - the lowered expression enum scopes are made of
//! - [`qualify`] - best-effort column binding and star expansion
//! - [`schema`] - optional column-type schema
//! - [`dialect`] - parser dialect selection

pub mod dialect;
pub mod expr;
pub mod parse;
pub mod qualify;
pub mod schema;
pub mod scope;

pub use dialect::{Dialect, UnknownDialect};
pub use expr::{ColumnRef, Expr, Function, FunctionKind};
pub use parse::{parse, ParseError, ParseResult};
pub use qualify::{qualify, QualifyError, QualifyResult};
pub use schema::{Schema, TableSchema};
pub use scope::{
    traverse_scope, Clause, ClauseKind, Projection, Scope, ScopeId, ScopeKind, ScopeRole,
    ScopeTree, Source,
};

/// A parsed query lowered into scopes, qualified when possible.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub tree: ScopeTree,
    /// Set when qualification failed and `tree` is the unqualified tree.
    pub qualify_error: Option<QualifyError>,
}

impl ParsedQuery {
    pub fn is_qualified(&self) -> bool {
        self.qualify_error.is_none()
    }
}

/// Parse SQL, lower it into scopes and qualify it against `schema`.
///
/// Qualification failures are not fatal: the unqualified tree is returned
/// alongside the error.
pub fn build_scopes(
    sql: &str,
    schema: Option<&Schema>,
    dialect: Dialect,
) -> ParseResult<ParsedQuery> {
    let query = parse(sql, dialect)?;
    let tree = traverse_scope(&query);

    let Some(schema) = schema else {
        return Ok(ParsedQuery {
            tree,
            qualify_error: None,
        });
    };

    match qualify(&tree, schema) {
        Ok(qualified) => Ok(ParsedQuery {
            tree: qualified,
            qualify_error: None,
        }),
        Err(e) => {
            tracing::debug!(error = %e, "qualification failed, using unqualified scopes");
            Ok(ParsedQuery {
                tree,
                qualify_error: Some(e),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_scopes_without_schema() {
        let parsed = build_scopes("select a from t", None, Dialect::Generic).unwrap();
        assert!(parsed.is_qualified());
        assert_eq!(parsed.tree.len(), 1);
    }

    #[test]
    fn test_build_scopes_falls_back_on_qualify_error() {
        let schema = Schema::new().with_table("t", TableSchema::new().with_column("a", "int"));
        let parsed = build_scopes("select b from t", Some(&schema), Dialect::Generic).unwrap();
        assert!(!parsed.is_qualified());
        let col = parsed.tree.root().projections[0].expr.as_column().unwrap();
        assert_eq!(col, &ColumnRef::new("b"));
    }

    #[test]
    fn test_build_scopes_parse_error() {
        assert!(build_scopes("select a from", None, Dialect::Generic).is_err());
    }
}
