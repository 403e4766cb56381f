//! Best-effort qualification of a scope tree against a schema.
//!
//! Qualification does two things:
//!
//! 1. Binds unqualified columns to the one source that provides them, so the
//!    lineage engine does not have to fall back to "first source in FROM".
//! 2. Expands `*` / `t.*` over base tables whose columns the schema knows.
//!    Stars over CTEs and derived tables become `alias.*`, which downstream
//!    analyses inline from the child scope.
//!
//! Qualification is all-or-nothing: any unresolvable reference yields a
//! [`QualifyError`] and callers continue with the unqualified tree.

use thiserror::Error;

use super::expr::{ColumnRef, Expr};
use super::schema::Schema;
use super::scope::{ClauseKind, Projection, ScopeId, ScopeKind, ScopeTree, Source};

/// Errors raised while qualifying a scope tree.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QualifyError {
    #[error("Column '{column}' cannot be resolved in scope {scope}")]
    UnresolvedColumn { column: String, scope: ScopeId },

    #[error("Column '{column}' is ambiguous between sources {sources:?}")]
    AmbiguousColumn { column: String, sources: Vec<String> },

    #[error("Unknown source '{qualifier}' referenced by column '{column}'")]
    UnknownSource { qualifier: String, column: String },
}

pub type QualifyResult<T> = Result<T, QualifyError>;

/// Qualify a scope tree. Returns a new tree; the input is left untouched so
/// callers can fall back to it.
pub fn qualify(tree: &ScopeTree, schema: &Schema) -> QualifyResult<ScopeTree> {
    let mut qualified = tree.clone();
    if schema.is_empty() {
        return Ok(qualified);
    }

    for index in 0..qualified.len() {
        let id = ScopeId(index);
        if qualified[id].kind != ScopeKind::Select {
            continue;
        }
        let projections = expand_stars(&qualified, id, schema);
        qualified.scopes_mut()[index].projections = projections;
        qualify_columns(&mut qualified, id, schema)?;
    }

    Ok(qualified)
}

/// Output columns of a scope, if they are knowable.
pub(crate) fn output_columns(
    tree: &ScopeTree,
    id: ScopeId,
    schema: &Schema,
) -> Option<Vec<String>> {
    let scope = tree.get(id)?;
    match scope.kind {
        ScopeKind::Select => {
            let mut columns = Vec::new();
            for projection in &scope.projections {
                match &projection.expr {
                    Expr::Star { qualifier } => {
                        for (_, source) in scope.star_sources(qualifier.as_deref()) {
                            columns.extend(source_columns(tree, source, schema)?);
                        }
                    }
                    _ => columns.push(projection.name.clone()),
                }
            }
            Some(columns)
        }
        kind if kind.is_set_operation() => {
            let first = scope.members.first()?;
            output_columns(tree, *first, schema)
        }
        _ => None,
    }
}

fn source_columns(tree: &ScopeTree, source: &Source, schema: &Schema) -> Option<Vec<String>> {
    match source {
        Source::Table(name) => schema
            .table(name)
            .map(|table| table.columns().map(str::to_string).collect()),
        Source::Scope(child) => output_columns(tree, *child, schema),
    }
}

/// Does a source provide a column? `None` when its columns are unknown.
fn provides(tree: &ScopeTree, source: &Source, column: &str, schema: &Schema) -> Option<bool> {
    source_columns(tree, source, schema).map(|columns| columns.iter().any(|c| c == column))
}

fn expand_stars(tree: &ScopeTree, id: ScopeId, schema: &Schema) -> Vec<Projection> {
    let scope = &tree[id];
    let mut projections = Vec::with_capacity(scope.projections.len());

    for projection in &scope.projections {
        let Expr::Star { qualifier } = &projection.expr else {
            projections.push(projection.clone());
            continue;
        };

        let mut expanded = Vec::new();
        let mut complete = true;
        for (alias, source) in scope.star_sources(qualifier.as_deref()) {
            match source {
                Source::Table(name) => match schema.table(name) {
                    Some(table) => expanded.extend(table.columns().map(|column| {
                        Projection::new(column, Expr::Column(ColumnRef::qualified(alias, column)))
                    })),
                    None => complete = false,
                },
                Source::Scope(_) => {
                    let star = Expr::Star {
                        qualifier: Some(alias.to_string()),
                    };
                    expanded.push(Projection::new(star.to_string(), star));
                }
            }
        }

        if complete && !expanded.is_empty() {
            projections.extend(expanded);
        } else {
            projections.push(projection.clone());
        }
    }

    projections
}

fn qualify_columns(tree: &mut ScopeTree, id: ScopeId, schema: &Schema) -> QualifyResult<()> {
    let snapshot: &ScopeTree = tree;
    let scope = &snapshot[id];
    let outputs: Vec<&str> = scope.projections.iter().map(|p| p.name.as_str()).collect();

    let mut error = None;
    let mut qualify_expr = |expr: &mut Expr, clause: Option<ClauseKind>| {
        expr.for_each_column_mut(&mut |col| {
            if error.is_some() {
                return;
            }
            let sees_aliases = clause.is_some_and(|kind| kind.sees_output_aliases());
            let is_output_alias = sees_aliases && outputs.contains(&col.name.as_str());
            match resolve_qualifier(snapshot, id, col, schema, is_output_alias) {
                Ok(Some(alias)) => col.table = Some(alias),
                Ok(None) => {}
                Err(e) => error = Some(e),
            }
        });
    };

    let mut projections = scope.projections.clone();
    for projection in &mut projections {
        qualify_expr(&mut projection.expr, None);
    }
    let mut clauses = scope.clauses.clone();
    for clause in &mut clauses {
        qualify_expr(&mut clause.expr, Some(clause.kind));
    }

    if let Some(e) = error {
        return Err(e);
    }

    let scope = &mut tree.scopes_mut()[id.index()];
    scope.projections = projections;
    scope.clauses = clauses;
    Ok(())
}

/// Decide which alias an unqualified column belongs to.
///
/// `Ok(None)` leaves the column as it is.
fn resolve_qualifier(
    tree: &ScopeTree,
    id: ScopeId,
    col: &ColumnRef,
    schema: &Schema,
    is_output_alias: bool,
) -> QualifyResult<Option<String>> {
    if let Some(qualifier) = &col.table {
        return match tree.lookup_source(id, qualifier) {
            Some(_) => Ok(None),
            None => Err(QualifyError::UnknownSource {
                qualifier: qualifier.clone(),
                column: col.name.clone(),
            }),
        };
    }
    if is_output_alias {
        return Ok(None);
    }

    let scope = &tree[id];
    let mut providers = Vec::new();
    let mut unknown = false;
    for (alias, source) in &scope.sources {
        match provides(tree, source, &col.name, schema) {
            Some(true) => providers.push(alias.clone()),
            Some(false) => {}
            None => unknown = true,
        }
    }

    match providers.len() {
        1 => Ok(providers.pop()),
        0 if unknown || scope.sources.is_empty() || scope.outer.is_some() => Ok(None),
        0 => Err(QualifyError::UnresolvedColumn {
            column: col.name.clone(),
            scope: id,
        }),
        _ => Err(QualifyError::AmbiguousColumn {
            column: col.name.clone(),
            sources: providers,
        }),
    }
}
