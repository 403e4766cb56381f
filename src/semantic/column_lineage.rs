//! Column-level lineage extraction.
//!
//! For one SQL query this computes, per output column, the base-table
//! columns it is derived from and how it is derived (c2c), plus the
//! base-table columns that shape the rows of the whole query through joins,
//! filters, grouping and ordering (m2c).
//!
//! Lineage is computed bottom-up over the scope arena: every child scope is
//! finished before the scope that reads from it, so a parent inlines its
//! children's results instead of re-analyzing them.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::sql::{
    build_scopes, ColumnRef, Dialect, Expr, Projection, Schema, Scope, ScopeId, ScopeKind,
    ScopeTree, Source,
};

use super::error::LineageResult;
use super::stats::AnalysisStats;

// =============================================================================
// Core Types
// =============================================================================

/// A column of an upstream node (base table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDependency {
    /// Node id: the dotted table name as written in the query.
    pub node: String,
    /// Column name
    pub column: String,
}

impl ColumnDependency {
    pub fn new(node: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.column)
    }
}

/// How an output column is produced from its dependencies.
///
/// Variants are ordered by severity; combining two types keeps the more
/// severe one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    /// Produced without reading any column (literals, `now()`, ...).
    Source,
    /// A column read unchanged under its own name.
    Passthrough,
    /// A column read unchanged under a new name.
    Renamed,
    /// Computed from one or more columns.
    Derived,
    /// Could not be resolved.
    Unknown,
}

impl TransformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::Source => "source",
            TransformationType::Passthrough => "passthrough",
            TransformationType::Renamed => "renamed",
            TransformationType::Derived => "derived",
            TransformationType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lineage of one output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLineageEntry {
    pub transformation_type: TransformationType,
    pub depends_on: Vec<ColumnDependency>,
}

impl ColumnLineageEntry {
    pub fn new(transformation_type: TransformationType, depends_on: Vec<ColumnDependency>) -> Self {
        Self {
            transformation_type,
            depends_on: dedup(depends_on),
        }
    }

    pub fn unknown() -> Self {
        Self::new(TransformationType::Unknown, Vec::new())
    }
}

/// Output column name to lineage, in projection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnLineageMap {
    entries: Vec<(String, ColumnLineageEntry)>,
}

impl ColumnLineageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; an existing entry of the same name is replaced in place.
    pub fn insert(&mut self, name: impl Into<String>, entry: ColumnLineageEntry) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = entry,
            None => self.entries.push((name, entry)),
        }
    }

    /// Insert an entry unless the name is already taken.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, entry: ColumnLineageEntry) {
        let name = name.into();
        if !self.contains(&name) {
            self.entries.push((name, entry));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnLineageEntry> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entry at the given output position.
    pub fn get_index(&self, index: usize) -> Option<(&str, &ColumnLineageEntry)> {
        self.entries.get(index).map(|(n, e)| (n.as_str(), e))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnLineageEntry)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lineage of a column read from this map by name.
    ///
    /// Names not present are looked up through an unexpanded star over a
    /// base table (`select * from raw` without a schema), which exposes any
    /// column of that table.
    pub fn resolve(&self, name: &str) -> Option<ColumnLineageEntry> {
        if let Some(entry) = self.get(name) {
            return Some(entry.clone());
        }
        self.entries
            .iter()
            .filter(|(n, _)| n.ends_with('*'))
            .flat_map(|(_, entry)| &entry.depends_on)
            .find(|dep| dep.column == "*")
            .map(|dep| {
                ColumnLineageEntry::new(
                    TransformationType::Passthrough,
                    vec![ColumnDependency::new(dep.node.clone(), name)],
                )
            })
    }
}

impl FromIterator<(String, ColumnLineageEntry)> for ColumnLineageMap {
    fn from_iter<I: IntoIterator<Item = (String, ColumnLineageEntry)>>(iter: I) -> Self {
        let mut map = ColumnLineageMap::new();
        for (name, entry) in iter {
            map.insert(name, entry);
        }
        map
    }
}

impl Serialize for ColumnLineageMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnLineageMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ColumnLineageMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to lineage entry")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = ColumnLineageMap::new();
                while let Some((name, entry)) = access.next_entry::<String, ColumnLineageEntry>()? {
                    map.insert(name, entry);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Lineage of a whole query (or of one scope of it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CllResult {
    /// Columns that affect which rows the query produces.
    pub m2c: Vec<ColumnDependency>,
    /// Per output column lineage.
    pub c2c: ColumnLineageMap,
}

impl CllResult {
    /// Every dependency of the query: m2c followed by all c2c dependencies.
    pub fn all_dependencies(&self) -> Vec<ColumnDependency> {
        let mut deps = self.m2c.clone();
        for (_, entry) in self.c2c.iter() {
            deps.extend(entry.depends_on.iter().cloned());
        }
        dedup(deps)
    }

    /// Does any output column or m2c entry read the given upstream column?
    pub fn references(&self, dep: &ColumnDependency) -> bool {
        self.m2c.contains(dep) || self.c2c.iter().any(|(_, e)| e.depends_on.contains(dep))
    }
}

/// Remove duplicate dependencies, keeping the first occurrence.
pub(crate) fn dedup(deps: Vec<ColumnDependency>) -> Vec<ColumnDependency> {
    let mut unique: Vec<ColumnDependency> = Vec::with_capacity(deps.len());
    for dep in deps {
        if !unique.contains(&dep) {
            unique.push(dep);
        }
    }
    unique
}

// =============================================================================
// Entry Points
// =============================================================================

/// Compute the column lineage of one SQL query.
///
/// With a schema, columns are bound to their sources and stars are expanded
/// before lineage is extracted. If that fails the query is analyzed
/// unqualified.
pub fn compute_lineage(
    sql: &str,
    schema: Option<&Schema>,
    dialect: Option<Dialect>,
) -> LineageResult<CllResult> {
    compute_lineage_with_stats(sql, schema, dialect).map(|(result, _)| result)
}

/// Same as [`compute_lineage`], also returning the analysis counters.
pub fn compute_lineage_with_stats(
    sql: &str,
    schema: Option<&Schema>,
    dialect: Option<Dialect>,
) -> LineageResult<(CllResult, AnalysisStats)> {
    let parsed = build_scopes(sql, schema, dialect.unwrap_or_default())?;
    let mut stats = AnalysisStats::new();
    if !parsed.is_qualified() {
        stats.qualify_fallbacks += 1;
    }

    let result = lineage_of_tree(&parsed.tree, &mut stats);
    tracing::debug!(
        columns = result.c2c.len(),
        m2c = result.m2c.len(),
        scopes = stats.scopes_visited,
        "computed column lineage"
    );
    Ok((result, stats))
}

/// Lineage of the root scope of an already built tree.
pub fn lineage_of_tree(tree: &ScopeTree, stats: &mut AnalysisStats) -> CllResult {
    let mut scopes = scope_lineages(tree, stats);
    scopes.pop().unwrap_or_default()
}

/// Lineage of every scope of a tree, indexed like the tree.
pub(crate) fn scope_lineages(tree: &ScopeTree, stats: &mut AnalysisStats) -> Vec<CllResult> {
    let mut builder = LineageBuilder {
        tree,
        done: Vec::with_capacity(tree.len()),
        stats,
    };
    for scope in tree {
        let lineage = builder.scope(scope);
        builder.stats.scopes_visited += 1;
        builder.done.push(lineage);
    }
    builder.done
}

// =============================================================================
// Scope Lineage
// =============================================================================

struct LineageBuilder<'a, 's> {
    tree: &'a ScopeTree,
    /// Lineage of scopes `0..done.len()`.
    done: Vec<CllResult>,
    stats: &'s mut AnalysisStats,
}

impl LineageBuilder<'_, '_> {
    fn scope(&mut self, scope: &Scope) -> CllResult {
        match scope.kind {
            ScopeKind::Select => self.select(scope),
            kind if kind.is_set_operation() => self.set_operation(scope),
            _ => CllResult::default(),
        }
    }

    fn child(&self, id: ScopeId) -> Option<&CllResult> {
        self.done.get(id.index())
    }

    /// Resolve one column reference inside `scope`.
    fn resolve(&mut self, scope: ScopeId, col: &ColumnRef) -> ColumnLineageEntry {
        let entry = match self.tree.resolve_column(scope, col) {
            Some(Source::Table(table)) => Some(ColumnLineageEntry::new(
                TransformationType::Passthrough,
                vec![ColumnDependency::new(table.clone(), col.name.clone())],
            )),
            Some(Source::Scope(child)) => self.child(*child).and_then(|c| c.c2c.resolve(&col.name)),
            None => None,
        };

        match entry {
            Some(entry) => {
                self.stats.columns_resolved += 1;
                entry
            }
            None => {
                tracing::trace!(column = %col, scope = %scope, "column not exposed by its source");
                ColumnLineageEntry::unknown()
            }
        }
    }

    fn select(&mut self, scope: &Scope) -> CllResult {
        let mut result = CllResult::default();

        // Row filters of child scopes still filter this scope.
        for (_, source) in &scope.sources {
            if let Source::Scope(child) = source {
                if let Some(lineage) = self.child(*child) {
                    result.m2c.extend(lineage.m2c.iter().cloned());
                }
            }
        }

        for projection in &scope.projections {
            match &projection.expr {
                Expr::Star { qualifier } => {
                    self.star(scope, qualifier.as_deref(), &projection.name, &mut result.c2c)
                }
                _ => {
                    let entry = self.projection(scope, projection);
                    result.c2c.insert(projection.name.clone(), entry);
                }
            }
        }

        for clause in &scope.clauses {
            let sees_aliases = clause.kind.sees_output_aliases();
            for col in clause.expr.columns() {
                if sees_aliases && col.table.is_none() && scope.projection(&col.name).is_some() {
                    continue;
                }
                let resolved = self.resolve(scope.id, col);
                result.m2c.extend(resolved.depends_on);
            }
            for subquery in clause.expr.subqueries() {
                if let Some(lineage) = self.child(subquery) {
                    result.m2c.extend(lineage.all_dependencies());
                }
            }
        }

        result.m2c = dedup(result.m2c);
        result
    }

    fn projection(&mut self, scope: &Scope, projection: &Projection) -> ColumnLineageEntry {
        let expr = &projection.expr;
        let columns = expr.columns();
        let subqueries = expr.subqueries();
        if columns.is_empty() && subqueries.is_empty() {
            return ColumnLineageEntry::new(TransformationType::Source, Vec::new());
        }

        let mut transformation = match expr.as_column() {
            Some(col) if col.name == projection.name => TransformationType::Passthrough,
            Some(_) => TransformationType::Renamed,
            None => TransformationType::Derived,
        };

        let mut depends_on = Vec::new();
        for col in columns {
            let resolved = self.resolve(scope.id, col);
            transformation = transformation.max(resolved.transformation_type);
            depends_on.extend(resolved.depends_on);
        }
        for subquery in subqueries {
            transformation = transformation.max(TransformationType::Derived);
            if let Some(lineage) = self.child(subquery) {
                depends_on.extend(lineage.all_dependencies());
            }
        }

        ColumnLineageEntry::new(transformation, depends_on)
    }

    /// Inline the columns a star projection expands to.
    fn star(&self, scope: &Scope, qualifier: Option<&str>, name: &str, c2c: &mut ColumnLineageMap) {
        for (_, source) in scope.star_sources(qualifier) {
            match source {
                Source::Scope(child) => {
                    if let Some(lineage) = self.child(*child) {
                        for (column, entry) in lineage.c2c.iter() {
                            c2c.insert_if_absent(column, entry.clone());
                        }
                    }
                }
                Source::Table(table) => {
                    // Columns unknown without a schema: keep the whole table.
                    let dep = ColumnDependency::new(table.clone(), "*");
                    let mut entry = c2c
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| {
                            ColumnLineageEntry::new(TransformationType::Passthrough, Vec::new())
                        });
                    entry.depends_on.push(dep);
                    entry.depends_on = dedup(entry.depends_on);
                    c2c.insert(name, entry);
                }
            }
        }
    }

    fn set_operation(&mut self, scope: &Scope) -> CllResult {
        let members: Vec<&CllResult> =
            scope.members.iter().filter_map(|id| self.child(*id)).collect();
        let mut result = CllResult::default();

        for member in &members {
            result.m2c.extend(member.m2c.iter().cloned());
        }
        for subquery in &scope.subqueries {
            if let Some(lineage) = self.child(*subquery) {
                result.m2c.extend(lineage.all_dependencies());
            }
        }

        let Some(first) = members.first() else {
            return result;
        };
        for (position, (name, _)) in first.c2c.iter().enumerate() {
            let contributing: Vec<&ColumnLineageEntry> = members
                .iter()
                .filter_map(|member| member.c2c.get_index(position).map(|(_, entry)| entry))
                .collect();

            let transformation = match contributing.as_slice() {
                [single] => single.transformation_type,
                _ => TransformationType::Derived,
            };
            let depends_on = contributing
                .iter()
                .flat_map(|entry| entry.depends_on.iter().cloned())
                .collect();
            result
                .c2c
                .insert(name, ColumnLineageEntry::new(transformation, depends_on));
        }

        result.m2c = dedup(result.m2c);
        result
    }
}
