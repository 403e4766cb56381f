//! Breaking-change classification between two versions of a query.
//!
//! Both versions are lowered into scope trees and walked pairwise,
//! bottom-up. Each scope pair gets a [`NodeChange`]; parents read their
//! children's verdicts from a memo instead of re-diffing them, so a column
//! modified deep inside a CTE shows up as a modified column of every scope
//! that passes it through.
//!
//! Classification never fails. SQL that cannot be parsed is classified as
//! [`ChangeCategory::Unknown`].

use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::sql::{
    build_scopes, Clause, ColumnRef, Dialect, Expr, ParseResult, Projection, Schema, Scope,
    ScopeId, ScopeKind, ScopeTree, Source,
};

use super::stats::AnalysisStats;

// =============================================================================
// Core Types
// =============================================================================

/// Severity of a change, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    /// Every existing output column keeps its values and rows.
    NonBreaking,
    /// Some output columns were removed or changed; rows are unaffected.
    PartialBreaking,
    /// Rows may differ; everything downstream is affected.
    Breaking,
    /// The change could not be analyzed.
    Unknown,
}

impl ChangeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::NonBreaking => "non_breaking",
            ChangeCategory::PartialBreaking => "partial_breaking",
            ChangeCategory::Breaking => "breaking",
            ChangeCategory::Unknown => "unknown",
        }
    }

    /// Breaking and unknown changes affect every downstream node.
    pub fn affects_all_downstream(&self) -> bool {
        matches!(self, ChangeCategory::Breaking | ChangeCategory::Unknown)
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one output column differs between versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnChangeStatus {
    Added,
    Removed,
    Modified,
}

impl ColumnChangeStatus {
    /// Removed and modified columns break readers of the column.
    pub fn breaks_readers(&self) -> bool {
        matches!(self, ColumnChangeStatus::Removed | ColumnChangeStatus::Modified)
    }
}

/// Classification of a change to one node (query).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    pub category: ChangeCategory,
    /// Output columns that differ, by name.
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnChangeStatus>,
}

impl NodeChange {
    pub fn new(category: ChangeCategory) -> Self {
        Self {
            category,
            columns: BTreeMap::new(),
        }
    }

    pub fn non_breaking() -> Self {
        Self::new(ChangeCategory::NonBreaking)
    }

    pub fn breaking() -> Self {
        Self::new(ChangeCategory::Breaking)
    }

    pub fn unknown() -> Self {
        Self::new(ChangeCategory::Unknown)
    }

    /// Raise the category; it is never lowered.
    pub fn escalate(&mut self, category: ChangeCategory) {
        self.category = self.category.max(category);
    }

    /// Record a column status, keeping an earlier status for the same column.
    pub fn mark(&mut self, column: impl Into<String>, status: ColumnChangeStatus) {
        self.columns.entry(column.into()).or_insert(status);
        if status.breaks_readers() {
            self.escalate(ChangeCategory::PartialBreaking);
        }
    }

    /// Nothing observable changed.
    pub fn is_unchanged(&self) -> bool {
        self.category == ChangeCategory::NonBreaking && self.columns.is_empty()
    }

    /// Does this change need to be looked at downstream at all?
    pub fn has_impact(&self) -> bool {
        !self.is_unchanged()
    }
}

/// One pair of SQL versions for [`classify_batch`].
#[derive(Debug, Clone, Copy)]
pub struct ChangePair<'a> {
    pub old_sql: &'a str,
    pub new_sql: &'a str,
    pub old_schema: Option<&'a Schema>,
    pub new_schema: Option<&'a Schema>,
}

impl<'a> ChangePair<'a> {
    pub fn new(old_sql: &'a str, new_sql: &'a str) -> Self {
        Self {
            old_sql,
            new_sql,
            old_schema: None,
            new_schema: None,
        }
    }

    pub fn with_schemas(
        mut self,
        old_schema: Option<&'a Schema>,
        new_schema: Option<&'a Schema>,
    ) -> Self {
        self.old_schema = old_schema;
        self.new_schema = new_schema;
        self
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Classify the change from `old_sql` to `new_sql`.
pub fn classify_change(
    old_sql: &str,
    new_sql: &str,
    old_schema: Option<&Schema>,
    new_schema: Option<&Schema>,
    dialect: Option<Dialect>,
) -> NodeChange {
    classify_change_with_stats(old_sql, new_sql, old_schema, new_schema, dialect).0
}

/// Same as [`classify_change`], also returning the analysis counters.
pub fn classify_change_with_stats(
    old_sql: &str,
    new_sql: &str,
    old_schema: Option<&Schema>,
    new_schema: Option<&Schema>,
    dialect: Option<Dialect>,
) -> (NodeChange, AnalysisStats) {
    let mut stats = AnalysisStats::new();
    if old_sql == new_sql {
        return (NodeChange::non_breaking(), stats);
    }

    let dialect = dialect.unwrap_or_default();
    let pair = build_pair(old_sql, new_sql, old_schema, new_schema, dialect, &mut stats);
    let (old, new) = match pair {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "could not parse query, change category unknown");
            return (NodeChange::unknown(), stats);
        }
    };

    let change = ChangeWalker::new(&old, &new).walk(&mut stats);
    tracing::debug!(
        category = %change.category,
        columns = change.columns.len(),
        "classified change"
    );
    (change, stats)
}

/// Classify many independent pairs in parallel. Results are in input order.
pub fn classify_batch(pairs: &[ChangePair<'_>], dialect: Option<Dialect>) -> Vec<NodeChange> {
    classify_batch_with_stats(pairs, dialect).0
}

/// Same as [`classify_batch`], also returning the counters summed over all pairs.
pub fn classify_batch_with_stats(
    pairs: &[ChangePair<'_>],
    dialect: Option<Dialect>,
) -> (Vec<NodeChange>, AnalysisStats) {
    let results: Vec<(NodeChange, AnalysisStats)> = pairs
        .par_iter()
        .map(|pair| {
            classify_change_with_stats(
                pair.old_sql,
                pair.new_sql,
                pair.old_schema,
                pair.new_schema,
                dialect,
            )
        })
        .collect();

    let mut total = AnalysisStats::new();
    let mut changes = Vec::with_capacity(results.len());
    for (change, stats) in results {
        total += stats;
        changes.push(change);
    }
    (changes, total)
}

/// Build both trees so they can be compared like for like: either both are
/// qualified against a schema or neither is.
fn build_pair(
    old_sql: &str,
    new_sql: &str,
    old_schema: Option<&Schema>,
    new_schema: Option<&Schema>,
    dialect: Dialect,
    stats: &mut AnalysisStats,
) -> ParseResult<(ScopeTree, ScopeTree)> {
    let old = build_scopes(old_sql, old_schema, dialect)?;
    let new = build_scopes(new_sql, new_schema, dialect)?;
    stats.qualify_fallbacks += usize::from(!old.is_qualified()) + usize::from(!new.is_qualified());

    let old_qualified = old_schema.is_some() && old.is_qualified();
    let new_qualified = new_schema.is_some() && new.is_qualified();
    if old_qualified == new_qualified {
        return Ok((old.tree, new.tree));
    }

    tracing::debug!("only one side qualified, comparing unqualified trees");
    if old_qualified {
        Ok((build_scopes(old_sql, None, dialect)?.tree, new.tree))
    } else {
        Ok((old.tree, build_scopes(new_sql, None, dialect)?.tree))
    }
}

// =============================================================================
// Scope Walk
// =============================================================================

struct ChangeWalker<'a> {
    old: &'a ScopeTree,
    new: &'a ScopeTree,
    /// Verdicts by new-scope id.
    memo: Vec<Option<NodeChange>>,
}

impl<'a> ChangeWalker<'a> {
    fn new(old: &'a ScopeTree, new: &'a ScopeTree) -> Self {
        Self {
            old,
            new,
            memo: vec![None; new.len()],
        }
    }

    fn walk(mut self, stats: &mut AnalysisStats) -> NodeChange {
        if self.old.len() != self.new.len() {
            tracing::debug!(old = self.old.len(), new = self.new.len(), "scope count differs");
            return NodeChange::breaking();
        }

        for (old_scope, new_scope) in self.old.iter().zip(self.new.iter()) {
            stats.scopes_visited += 1;
            let change = self.scope(old_scope, new_scope);
            tracing::trace!(scope = %new_scope.id, category = %change.category, "classified scope");

            if change.category.affects_all_downstream() {
                tracing::debug!(
                    scope = %new_scope.id,
                    category = %change.category,
                    "stopping walk"
                );
                return change;
            }
            self.memo[new_scope.id.index()] = Some(change);
        }

        self.memo
            .pop()
            .flatten()
            .unwrap_or_else(NodeChange::non_breaking)
    }

    fn memo(&self, id: ScopeId) -> Option<&NodeChange> {
        self.memo.get(id.index()).and_then(Option::as_ref)
    }

    fn is_unchanged(&self, id: ScopeId) -> bool {
        self.memo(id).is_some_and(NodeChange::is_unchanged)
    }

    fn scope(&self, old: &Scope, new: &Scope) -> NodeChange {
        if old.kind != new.kind {
            return NodeChange::breaking();
        }
        // Qualification rewrites projections without touching `sql`.
        if old.sql == new.sql
            && old.projections == new.projections
            && children(new).all(|child| self.is_unchanged(child))
        {
            return NodeChange::non_breaking();
        }

        match new.kind {
            ScopeKind::Select => self.select(old, new),
            kind if kind.is_set_operation() => self.set_operation(old, new),
            _ => NodeChange::breaking(),
        }
    }

    fn select(&self, old: &Scope, new: &Scope) -> NodeChange {
        // Breaking sources break their readers.
        let breaking_source = new.sources.iter().any(|(_, source)| match source {
            Source::Scope(child) => self
                .memo(*child)
                .map_or(true, |c| c.category.affects_all_downstream()),
            Source::Table(_) => false,
        });
        if breaking_source {
            return NodeChange::breaking();
        }

        // Row shape: DISTINCT, joins, filters, grouping, ordering, limits.
        if old.distinct != new.distinct || old.shape != new.shape || sources_swapped(old, new) {
            return NodeChange::breaking();
        }

        let mut change = NodeChange::non_breaking();

        for projection in &new.projections {
            if projection.is_star() {
                if old.projection(&projection.name).is_none() {
                    return NodeChange::breaking();
                }
                self.inline_star(new, &projection.expr, &mut change);
                continue;
            }

            match old.projection(&projection.name) {
                None => {
                    if new.distinct || projection.expr.contains_table_function() {
                        return NodeChange::breaking();
                    }
                    change.mark(projection.name.clone(), ColumnChangeStatus::Added);
                }
                Some(previous) => match diff_projection(previous, projection) {
                    ProjectionDiff::Breaking => return NodeChange::breaking(),
                    ProjectionDiff::Modified => {
                        tracing::trace!(
                            old = %previous.canonical(),
                            new = %projection.canonical(),
                            "projection modified"
                        );
                        change.mark(projection.name.clone(), ColumnChangeStatus::Modified)
                    }
                    ProjectionDiff::Same => {
                        if self.reads_changed(new.id, &projection.expr) {
                            change.mark(projection.name.clone(), ColumnChangeStatus::Modified);
                        }
                    }
                },
            }
        }

        for projection in &old.projections {
            if new.projection(&projection.name).is_some() {
                continue;
            }
            if projection.is_star() || old.distinct || projection.expr.contains_table_function() {
                return NodeChange::breaking();
            }
            change.mark(projection.name.clone(), ColumnChangeStatus::Removed);
        }

        if new
            .clauses
            .iter()
            .any(|clause| self.clause_reads_changed(new, clause, &change))
        {
            return NodeChange::breaking();
        }

        change
    }

    /// Carry the statuses of the columns a star expands to.
    fn inline_star(&self, scope: &Scope, star: &Expr, change: &mut NodeChange) {
        let Expr::Star { qualifier } = star else {
            return;
        };
        for (_, source) in scope.star_sources(qualifier.as_deref()) {
            let Source::Scope(child) = source else {
                continue;
            };
            if let Some(upstream) = self.memo(*child) {
                for (column, status) in &upstream.columns {
                    change.mark(column.clone(), *status);
                }
            }
        }
    }

    /// Status of the upstream column a reference reads, if it changed.
    fn upstream_status(&self, scope: ScopeId, col: &ColumnRef) -> Option<ColumnChangeStatus> {
        match self.new.resolve_column(scope, col)? {
            Source::Scope(child) => self.memo(*child)?.columns.get(&col.name).copied(),
            Source::Table(_) => None,
        }
    }

    /// Does an expression read a removed or modified upstream column, or a
    /// subquery that changed?
    fn reads_changed(&self, scope: ScopeId, expr: &Expr) -> bool {
        expr.columns()
            .into_iter()
            .any(|col| self.upstream_status(scope, col).is_some_and(|s| s.breaks_readers()))
            || expr.subqueries().into_iter().any(|sub| !self.is_unchanged(sub))
    }

    fn clause_reads_changed(&self, scope: &Scope, clause: &Clause, change: &NodeChange) -> bool {
        let sees_aliases = clause.kind.sees_output_aliases();
        for col in clause.expr.columns() {
            if sees_aliases && col.table.is_none() && scope.projection(&col.name).is_some() {
                if change.columns.contains_key(&col.name) {
                    return true;
                }
                continue;
            }
            if self
                .upstream_status(scope.id, col)
                .is_some_and(|s| s.breaks_readers())
            {
                return true;
            }
        }
        clause
            .expr
            .subqueries()
            .into_iter()
            .any(|sub| !self.is_unchanged(sub))
    }

    fn set_operation(&self, old: &Scope, new: &Scope) -> NodeChange {
        if old.shape != new.shape {
            return NodeChange::breaking();
        }

        let mut members = new.members.iter().map(|id| self.memo(*id));
        let Some(Some(base)) = members.next() else {
            return NodeChange::breaking();
        };
        let mut change = base.clone();

        for member in members {
            let Some(member) = member else {
                return NodeChange::breaking();
            };
            if member.category.affects_all_downstream() {
                return member.clone();
            }
            change.escalate(member.category);
            for (column, status) in &member.columns {
                change.columns.entry(column.clone()).or_insert(*status);
            }
        }

        change
    }
}

enum ProjectionDiff {
    Same,
    Modified,
    Breaking,
}

fn diff_projection(old: &Projection, new: &Projection) -> ProjectionDiff {
    if old.expr.to_string() == new.expr.to_string() {
        return ProjectionDiff::Same;
    }
    let both_generate_rows =
        old.expr.contains_table_function() && new.expr.contains_table_function();
    if both_generate_rows || old.expr.contains_aggregate() != new.expr.contains_aggregate() {
        ProjectionDiff::Breaking
    } else {
        ProjectionDiff::Modified
    }
}

/// Scopes whose verdict a scope depends on.
fn children(scope: &Scope) -> impl Iterator<Item = ScopeId> + '_ {
    let sources = scope.sources.iter().filter_map(|(_, source)| match source {
        Source::Scope(id) => Some(*id),
        Source::Table(_) => None,
    });
    sources
        .chain(scope.subqueries.iter().copied())
        .chain(scope.members.iter().copied())
}

/// Does any FROM position read a different table or scope? Aliases and CTE
/// names are ignored; scopes are matched by id, as in the walk.
fn sources_swapped(old: &Scope, new: &Scope) -> bool {
    if old.sources.len() != new.sources.len() {
        return true;
    }
    old.sources
        .iter()
        .zip(&new.sources)
        .any(|((_, before), (_, after))| match (before, after) {
            (Source::Table(a), Source::Table(b)) => a != b,
            (Source::Scope(a), Source::Scope(b)) => a != b,
            _ => true,
        })
}
