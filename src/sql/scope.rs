//! Scope resolution: lowering a parsed query into an arena of scopes.
//!
//! A scope is one SELECT, set operation, or VALUES unit. CTE bodies, derived
//! tables, subqueries and set-operation members each get their own scope.
//! Scopes are stored bottom-up: every scope a query depends on is pushed
//! before the scope that uses it, and the root is always last. Analyses walk
//! the arena in index order and address scopes by [`ScopeId`].

use std::fmt;
use std::ops::{ControlFlow, Index};

use sqlparser::ast::{self as ast, Visit, Visitor};

use super::expr::{ColumnRef, Expr, Function, FunctionKind, Opaque};

/// Index of a scope inside a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The expression kind of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Select,
    Union,
    Intersect,
    Except,
    Values,
    /// Anything else sqlparser can put in a query body (`TABLE t`, ...).
    Other,
}

impl ScopeKind {
    pub fn is_set_operation(&self) -> bool {
        matches!(
            self,
            ScopeKind::Union | ScopeKind::Intersect | ScopeKind::Except
        )
    }
}

/// How a scope is used by its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRole {
    Root,
    Cte(String),
    DerivedTable,
    Subquery,
    SetMember,
}

/// What a FROM alias refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A base table, named by its dotted identifier path.
    Table(String),
    /// A CTE or derived table.
    Scope(ScopeId),
}

/// One item of a SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Output column name (`*` / `t.*` for star projections).
    pub name: String,
    pub expr: Expr,
}

impl Projection {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    pub fn is_star(&self) -> bool {
        self.expr.is_star()
    }

    /// Canonical rendering including the output name.
    pub fn canonical(&self) -> String {
        if self.is_star() {
            return self.expr.to_string();
        }
        let rendered = self.expr.to_string();
        match self.expr.as_column() {
            Some(col) if col.name == self.name => rendered,
            _ if rendered == self.name => rendered,
            _ => format!("{} AS {}", rendered, self.name),
        }
    }
}

/// Where a non-projection expression appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Join,
    Where,
    GroupBy,
    Having,
    Qualify,
    OrderBy,
}

impl ClauseKind {
    /// Clauses where an unqualified name may refer to a SELECT-list alias.
    pub fn sees_output_aliases(&self) -> bool {
        matches!(self, ClauseKind::Having | ClauseKind::OrderBy)
    }
}

/// An expression in a JOIN/WHERE/GROUP BY/HAVING/QUALIFY/ORDER BY clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub expr: Expr,
}

/// One SELECT / set-operation / VALUES unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub role: ScopeRole,
    /// Rendered SQL of the whole unit, including nested scopes.
    pub sql: String,
    /// FROM/JOIN sources in order of appearance, keyed by alias.
    pub sources: Vec<(String, Source)>,
    pub projections: Vec<Projection>,
    pub clauses: Vec<Clause>,
    pub distinct: bool,
    /// Rendered text of every clause outside the projections, CTE
    /// definitions and FROM. Two versions with different shapes filter,
    /// group or order rows differently.
    pub shape: Vec<String>,
    /// Set-operation members, left to right.
    pub members: Vec<ScopeId>,
    /// Subqueries embedded in projections and clauses.
    pub subqueries: Vec<ScopeId>,
    /// CTEs defined by this scope's WITH clause.
    pub ctes: Vec<ScopeId>,
    /// Enclosing scope, for subqueries that may reference it.
    pub outer: Option<ScopeId>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            id: ScopeId(0),
            kind,
            role: ScopeRole::Subquery,
            sql: String::new(),
            sources: Vec::new(),
            projections: Vec::new(),
            clauses: Vec::new(),
            distinct: false,
            shape: Vec::new(),
            members: Vec::new(),
            subqueries: Vec::new(),
            ctes: Vec::new(),
            outer: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.role == ScopeRole::Root
    }

    /// Look up a source by alias.
    pub fn source(&self, alias: &str) -> Option<&Source> {
        self.sources
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, source)| source)
    }

    /// The first source in FROM, used for unqualified columns.
    pub fn default_source(&self) -> Option<(&str, &Source)> {
        self.sources
            .first()
            .map(|(name, source)| (name.as_str(), source))
    }

    /// Sources a star projection expands over: all of them, or only the
    /// qualified one for `t.*`.
    pub fn star_sources(&self, qualifier: Option<&str>) -> Vec<(&str, &Source)> {
        self.sources
            .iter()
            .filter(|(alias, _)| qualifier.map_or(true, |q| alias.as_str() == q))
            .map(|(alias, source)| (alias.as_str(), source))
            .collect()
    }

    pub fn projection(&self, name: &str) -> Option<&Projection> {
        self.projections.iter().find(|p| p.name == name)
    }

    fn attach_tail(&mut self, tail: QueryTail) {
        self.clauses.extend(tail.order_by.into_iter().map(|expr| Clause {
            kind: ClauseKind::OrderBy,
            expr,
        }));
        self.shape.extend(tail.shape);
        self.subqueries.extend(tail.subqueries);
    }
}

/// The scopes of one parsed query, children before parents.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn root(&self) -> &Scope {
        // Every query yields at least one scope.
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scope> {
        self.scopes.iter()
    }

    pub(crate) fn scopes_mut(&mut self) -> &mut [Scope] {
        &mut self.scopes
    }

    /// Find the source an alias refers to, searching enclosing scopes for
    /// correlated references.
    pub fn lookup_source(&self, scope: ScopeId, alias: &str) -> Option<(ScopeId, &Source)> {
        let mut current = self.get(scope);
        while let Some(s) = current {
            if let Some(source) = s.source(alias) {
                return Some((s.id, source));
            }
            current = s.outer.and_then(|id| self.get(id));
        }
        None
    }

    /// Resolve the source a column reference reads from.
    ///
    /// Qualified columns go through the alias map. Unqualified columns
    /// default to the first FROM source of the nearest scope that has one.
    pub fn resolve_column(&self, scope: ScopeId, col: &ColumnRef) -> Option<&Source> {
        match &col.table {
            Some(alias) => self.lookup_source(scope, alias).map(|(_, source)| source),
            None => {
                let mut current = self.get(scope);
                while let Some(s) = current {
                    if let Some((_, source)) = s.default_source() {
                        return Some(source);
                    }
                    current = s.outer.and_then(|id| self.get(id));
                }
                None
            }
        }
    }
}

impl Index<ScopeId> for ScopeTree {
    type Output = Scope;

    fn index(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }
}

impl<'a> IntoIterator for &'a ScopeTree {
    type Item = &'a Scope;
    type IntoIter = std::slice::Iter<'a, Scope>;

    fn into_iter(self) -> Self::IntoIter {
        self.scopes.iter()
    }
}

/// Lower a parsed query into its scope tree.
pub fn traverse_scope(query: &ast::Query) -> ScopeTree {
    let mut builder = ScopeBuilder::default();
    let root = builder.build_query(query);
    builder.scopes[root.0].role = ScopeRole::Root;
    let tree = ScopeTree {
        scopes: builder.scopes,
    };
    tracing::trace!(scopes = tree.len(), "traversed query scopes");
    tree
}

/// Normalize an identifier: unquoted names are case-insensitive.
pub(crate) fn normalize_ident(ident: &ast::Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

fn object_name_parts(name: &ast::ObjectName) -> Vec<String> {
    name.0.iter().map(normalize_ident).collect()
}

/// ORDER BY and row-limiting clauses attached to a query body.
#[derive(Default)]
struct QueryTail {
    order_by: Vec<Expr>,
    shape: Vec<String>,
    subqueries: Vec<ScopeId>,
}

#[derive(Default)]
struct ScopeBuilder {
    scopes: Vec<Scope>,
    /// Visible CTEs, innermost last.
    ctes: Vec<(String, ScopeId)>,
    /// Subqueries lowered while building the current scope.
    pending_subqueries: Vec<ScopeId>,
}

impl ScopeBuilder {
    fn push(&mut self, mut scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        scope.id = id;
        for child in scope.subqueries.clone() {
            self.scopes[child.0].outer = Some(id);
        }
        self.scopes.push(scope);
        id
    }

    fn build_query(&mut self, query: &ast::Query) -> ScopeId {
        let mark = self.ctes.len();
        let mut cte_ids = Vec::new();

        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let id = self.build_query(&cte.query);
                let name = normalize_ident(&cte.alias.name);
                self.scopes[id.0].role = ScopeRole::Cte(name.clone());
                self.ctes.push((name, id));
                cte_ids.push(id);
            }
        }

        let tail = self.lower_tail(query);
        let id = self.build_set_expr(&query.body, tail);

        let scope = &mut self.scopes[id.0];
        scope.sql = query.to_string();
        scope.ctes.extend(cte_ids);

        self.ctes.truncate(mark);
        id
    }

    fn lower_tail(&mut self, query: &ast::Query) -> QueryTail {
        let saved = std::mem::take(&mut self.pending_subqueries);
        let mut tail = QueryTail::default();

        if let Some(order_by) = &query.order_by {
            for item in &order_by.exprs {
                tail.order_by.push(self.lower_expr(&item.expr));
            }
            tail.shape.push(order_by.to_string());
        }
        if let Some(limit) = &query.limit {
            tail.shape.push(format!("LIMIT {limit}"));
        }
        if let Some(offset) = &query.offset {
            tail.shape.push(offset.to_string());
        }
        if let Some(fetch) = &query.fetch {
            tail.shape.push(fetch.to_string());
        }

        tail.subqueries = std::mem::replace(&mut self.pending_subqueries, saved);
        tail
    }

    fn build_set_expr(&mut self, body: &ast::SetExpr, tail: QueryTail) -> ScopeId {
        match body {
            ast::SetExpr::Select(select) => self.build_select(select, body.to_string(), tail),
            ast::SetExpr::Query(inner) => {
                let id = self.build_query(inner);
                self.scopes[id.0].attach_tail(tail);
                id
            }
            ast::SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
                ..
            } => {
                let left_id = self.build_member(left);
                let right_id = self.build_member(right);
                let kind = match op {
                    ast::SetOperator::Union => ScopeKind::Union,
                    ast::SetOperator::Intersect => ScopeKind::Intersect,
                    _ => ScopeKind::Except,
                };

                let mut scope = Scope::new(kind);
                scope.sql = body.to_string();
                scope.members = vec![left_id, right_id];
                scope.shape.push(format!("{op} {set_quantifier}"));
                scope.attach_tail(tail);
                self.push(scope)
            }
            ast::SetExpr::Values(_) => {
                let mut scope = Scope::new(ScopeKind::Values);
                scope.sql = body.to_string();
                scope.attach_tail(tail);
                self.push(scope)
            }
            _ => {
                let mut scope = Scope::new(ScopeKind::Other);
                scope.sql = body.to_string();
                scope.attach_tail(tail);
                self.push(scope)
            }
        }
    }

    fn build_member(&mut self, expr: &ast::SetExpr) -> ScopeId {
        let id = self.build_set_expr(expr, QueryTail::default());
        self.scopes[id.0].role = ScopeRole::SetMember;
        id
    }

    fn build_select(&mut self, select: &ast::Select, sql: String, tail: QueryTail) -> ScopeId {
        let saved = std::mem::take(&mut self.pending_subqueries);
        let mut scope = Scope::new(ScopeKind::Select);
        scope.sql = sql;
        scope.distinct = select.distinct.is_some();

        for table in &select.from {
            self.register_factor(&table.relation, &mut scope);
            self.register_joins(&table.joins, &mut scope);
        }

        for item in &select.projection {
            let projection = self.lower_select_item(item);
            scope.projections.push(projection);
        }

        if let Some(selection) = &select.selection {
            let expr = self.lower_expr(selection);
            scope.clauses.push(Clause {
                kind: ClauseKind::Where,
                expr,
            });
        }
        if let ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for group in exprs {
                let expr = self.lower_expr(group);
                scope.clauses.push(Clause {
                    kind: ClauseKind::GroupBy,
                    expr,
                });
            }
        }
        if let Some(having) = &select.having {
            let expr = self.lower_expr(having);
            scope.clauses.push(Clause {
                kind: ClauseKind::Having,
                expr,
            });
        }
        if let Some(qualify) = &select.qualify {
            let expr = self.lower_expr(qualify);
            scope.clauses.push(Clause {
                kind: ClauseKind::Qualify,
                expr,
            });
        }

        scope.shape = select_shape(select);
        scope.subqueries = std::mem::replace(&mut self.pending_subqueries, saved);
        scope.attach_tail(tail);
        self.push(scope)
    }

    fn register_joins(&mut self, joins: &[ast::Join], scope: &mut Scope) {
        for join in joins {
            self.register_factor(&join.relation, scope);
            let expr = self.lower_opaque(&join.join_operator, String::new());
            if let Expr::Opaque(opaque) = &expr {
                if opaque.args.is_empty() {
                    continue;
                }
            }
            scope.clauses.push(Clause {
                kind: ClauseKind::Join,
                expr,
            });
        }
    }

    fn register_factor(&mut self, factor: &ast::TableFactor, scope: &mut Scope) {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => {
                let parts = object_name_parts(name);
                let Some(last) = parts.last().cloned() else {
                    return;
                };
                let alias = alias
                    .as_ref()
                    .map(|a| normalize_ident(&a.name))
                    .unwrap_or_else(|| last.clone());

                let cte = (parts.len() == 1)
                    .then(|| self.ctes.iter().rev().find(|(n, _)| *n == last))
                    .flatten();
                let source = match cte {
                    Some((_, id)) => Source::Scope(*id),
                    None => Source::Table(parts.join(".")),
                };
                scope.sources.push((alias, source));
            }
            ast::TableFactor::Derived {
                subquery, alias, ..
            } => {
                let id = self.build_query(subquery);
                self.scopes[id.0].role = ScopeRole::DerivedTable;
                let alias = alias
                    .as_ref()
                    .map(|a| normalize_ident(&a.name))
                    .unwrap_or_else(|| format!("_subquery_{}", id.0));
                scope.sources.push((alias, Source::Scope(id)));
            }
            ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.register_factor(&table_with_joins.relation, scope);
                self.register_joins(&table_with_joins.joins, scope);
            }
            other => {
                // Table functions, UNNEST, PIVOT...: keep their column references.
                let expr = self.lower_opaque(other, other.to_string());
                scope.clauses.push(Clause {
                    kind: ClauseKind::Join,
                    expr,
                });
            }
        }
    }

    fn lower_select_item(&mut self, item: &ast::SelectItem) -> Projection {
        match item {
            ast::SelectItem::UnnamedExpr(expr) => {
                let lowered = self.lower_expr(expr);
                let name = output_name(expr).unwrap_or_else(|| lowered.to_string());
                Projection::new(name, lowered)
            }
            ast::SelectItem::ExprWithAlias { expr, alias } => {
                Projection::new(normalize_ident(alias), self.lower_expr(expr))
            }
            ast::SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = object_name_parts(name).pop();
                let expr = Expr::Star { qualifier };
                Projection::new(expr.to_string(), expr)
            }
            ast::SelectItem::Wildcard(_) => Projection::new("*", Expr::Star { qualifier: None }),
        }
    }

    fn lower_subquery(&mut self, query: &ast::Query) -> Expr {
        let id = self.build_query(query);
        self.pending_subqueries.push(id);
        Expr::Subquery(id)
    }

    fn lower_expr(&mut self, expr: &ast::Expr) -> Expr {
        match expr {
            ast::Expr::Identifier(ident) => Expr::Column(ColumnRef::new(normalize_ident(ident))),
            ast::Expr::CompoundIdentifier(idents) => {
                let mut parts: Vec<String> = idents.iter().map(normalize_ident).collect();
                let Some(name) = parts.pop() else {
                    return Expr::Literal(expr.to_string());
                };
                match parts.pop() {
                    Some(table) => Expr::Column(ColumnRef::qualified(table, name)),
                    None => Expr::Column(ColumnRef::new(name)),
                }
            }
            ast::Expr::Value(_) | ast::Expr::TypedString { .. } => Expr::Literal(expr.to_string()),
            ast::Expr::Nested(inner) => self.lower_expr(inner),
            ast::Expr::BinaryOp { left, op, right } => Expr::Binary {
                op: op.to_string(),
                left: Box::new(self.lower_expr(left)),
                right: Box::new(self.lower_expr(right)),
            },
            ast::Expr::UnaryOp { op, expr: inner } => Expr::Unary {
                op: op.to_string(),
                expr: Box::new(self.lower_expr(inner)),
            },
            ast::Expr::Cast {
                expr: inner,
                data_type,
                ..
            } => Expr::Cast {
                expr: Box::new(self.lower_expr(inner)),
                data_type: data_type.to_string(),
            },
            ast::Expr::Case {
                operand,
                conditions,
                results,
                else_result,
                ..
            } => {
                let operand = operand.as_ref().map(|op| Box::new(self.lower_expr(op)));
                let branches = conditions
                    .iter()
                    .zip(results)
                    .map(|(condition, result)| {
                        (self.lower_expr(condition), self.lower_expr(result))
                    })
                    .collect();
                let else_result = else_result.as_ref().map(|e| Box::new(self.lower_expr(e)));
                Expr::Case {
                    operand,
                    branches,
                    else_result,
                }
            }
            ast::Expr::Function(func) => self.lower_function(func),
            ast::Expr::Subquery(query) => self.lower_subquery(query),
            other => self.lower_opaque(other, other.to_string()),
        }
    }

    fn lower_function(&mut self, func: &ast::Function) -> Expr {
        let name = object_name_parts(&func.name).join(".");
        let windowed = func.over.is_some();
        let kind = FunctionKind::classify(&name, windowed);

        let mut args = Vec::new();
        match &func.args {
            ast::FunctionArguments::None => {}
            ast::FunctionArguments::Subquery(query) => args.push(self.lower_subquery(query)),
            ast::FunctionArguments::List(list) => {
                for arg in &list.args {
                    let arg_expr = match arg {
                        ast::FunctionArg::Unnamed(arg) | ast::FunctionArg::Named { arg, .. } => arg,
                        #[allow(unreachable_patterns)]
                        _ => {
                            args.push(self.lower_opaque(arg, arg.to_string()));
                            continue;
                        }
                    };
                    let lowered = match arg_expr {
                        ast::FunctionArgExpr::Expr(e) => self.lower_expr(e),
                        ast::FunctionArgExpr::QualifiedWildcard(q) => Expr::Star {
                            qualifier: object_name_parts(q).pop(),
                        },
                        ast::FunctionArgExpr::Wildcard => Expr::Star { qualifier: None },
                    };
                    args.push(lowered);
                }
            }
        }

        let mut modifiers = Vec::new();
        if let Some(filter) = &func.filter {
            modifiers.push(self.lower_expr(filter));
        }
        if let Some(ast::WindowType::WindowSpec(spec)) = &func.over {
            for partition in &spec.partition_by {
                modifiers.push(self.lower_expr(partition));
            }
            for order in &spec.order_by {
                modifiers.push(self.lower_expr(&order.expr));
            }
        }
        for order in &func.within_group {
            modifiers.push(self.lower_expr(&order.expr));
        }

        Expr::Function(Function {
            name,
            kind,
            args,
            modifiers,
        })
    }

    /// Lower any AST node into an opaque expression holding its top-level
    /// column references and subqueries.
    fn lower_opaque<N: Visit>(&mut self, node: &N, sql: String) -> Expr {
        let mut collector = ReferenceCollector::default();
        let _ = node.visit(&mut collector);

        let mut args: Vec<Expr> = collector
            .columns
            .into_iter()
            .map(Expr::Column)
            .collect();
        for query in &collector.subqueries {
            args.push(self.lower_subquery(query));
        }

        Expr::Opaque(Opaque {
            sql,
            args,
            aggregate: collector.aggregate,
            table_generating: collector.table_generating,
        })
    }
}

/// Collects column references and subqueries outside nested queries.
#[derive(Default)]
struct ReferenceCollector {
    depth: usize,
    columns: Vec<ColumnRef>,
    subqueries: Vec<ast::Query>,
    aggregate: bool,
    table_generating: bool,
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &ast::Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            self.subqueries.push(query.clone());
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &ast::Query) -> ControlFlow<Self::Break> {
        self.depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &ast::Expr) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        match expr {
            ast::Expr::Identifier(ident) => {
                self.columns.push(ColumnRef::new(normalize_ident(ident)));
            }
            ast::Expr::CompoundIdentifier(idents) => {
                let mut parts: Vec<String> = idents.iter().map(normalize_ident).collect();
                if let Some(name) = parts.pop() {
                    self.columns.push(ColumnRef {
                        table: parts.pop(),
                        name,
                    });
                }
            }
            ast::Expr::Function(func) => {
                let name = object_name_parts(&func.name).join(".");
                match FunctionKind::classify(&name, func.over.is_some()) {
                    FunctionKind::TableGenerating => self.table_generating = true,
                    kind if kind.is_aggregate() => self.aggregate = true,
                    _ => {}
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Output name of an unaliased column SELECT item.
///
/// Other unaliased items are named by their canonical rendering.
fn output_name(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Identifier(ident) => Some(normalize_ident(ident)),
        ast::Expr::CompoundIdentifier(idents) => idents.last().map(normalize_ident),
        ast::Expr::Nested(inner) => output_name(inner),
        _ => None,
    }
}

/// Render every SELECT clause except projections, CTEs and FROM.
fn select_shape(select: &ast::Select) -> Vec<String> {
    let mut shape = Vec::new();
    if let Some(distinct) = &select.distinct {
        shape.push(distinct.to_string());
    }
    if let Some(top) = &select.top {
        shape.push(top.to_string());
    }
    for table in &select.from {
        shape.extend(table.joins.iter().map(|join| join.to_string()));
    }
    shape.extend(select.lateral_views.iter().map(|view| view.to_string()));
    if let Some(selection) = &select.selection {
        shape.push(format!("WHERE {selection}"));
    }
    match &select.group_by {
        ast::GroupByExpr::Expressions(exprs, _) if exprs.is_empty() => {}
        group_by => shape.push(group_by.to_string()),
    }
    if let Some(having) = &select.having {
        shape.push(format!("HAVING {having}"));
    }
    for window in &select.named_window {
        shape.push(format!("WINDOW {window}"));
    }
    if let Some(qualify) = &select.qualify {
        shape.push(format!("QUALIFY {qualify}"));
    }
    shape
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{parse, Dialect};

    fn tree(sql: &str) -> ScopeTree {
        traverse_scope(&parse(sql, Dialect::Generic).unwrap())
    }

    #[test]
    fn test_single_select() {
        let tree = tree("select a, b as c from t");
        assert_eq!(tree.len(), 1);
        let root = tree.root();
        assert!(root.is_root());
        assert_eq!(root.kind, ScopeKind::Select);
        assert_eq!(root.sources, vec![("t".to_string(), Source::Table("t".into()))]);
        let names: Vec<_> = root.projections.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_cte_scopes_come_first() {
        let tree = tree("with c as (select a from t) select a from c");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[ScopeId(0)].role, ScopeRole::Cte("c".into()));
        assert_eq!(tree.root().source("c"), Some(&Source::Scope(ScopeId(0))));
        assert_eq!(tree.root().ctes, vec![ScopeId(0)]);
    }

    #[test]
    fn test_later_cte_sees_earlier_cte() {
        let tree = tree("with a as (select x from t), b as (select x from a) select x from b");
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[ScopeId(1)].source("a"), Some(&Source::Scope(ScopeId(0))));
    }

    #[test]
    fn test_union_members() {
        let tree = tree("select a from t union all select a from u");
        assert_eq!(tree.len(), 3);
        let root = tree.root();
        assert_eq!(root.kind, ScopeKind::Union);
        assert_eq!(root.members, vec![ScopeId(0), ScopeId(1)]);
        assert_eq!(tree[ScopeId(0)].role, ScopeRole::SetMember);
    }

    #[test]
    fn test_where_subquery_links_outer() {
        let tree = tree("select a from t where a in (select b from u)");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.root().subqueries, vec![ScopeId(0)]);
        assert_eq!(tree[ScopeId(0)].outer, Some(ScopeId(1)));
    }

    #[test]
    fn test_derived_table_and_join() {
        let tree = tree("select s.a, u.b from (select a, id from t) s join u on s.id = u.id");
        let root = tree.root();
        assert_eq!(root.sources.len(), 2);
        assert_eq!(root.source("s"), Some(&Source::Scope(ScopeId(0))));
        assert_eq!(root.source("u"), Some(&Source::Table("u".into())));
        let join = root
            .clauses
            .iter()
            .find(|c| c.kind == ClauseKind::Join)
            .unwrap();
        assert_eq!(join.expr.columns().len(), 2);
        assert_eq!(root.shape.len(), 1);
    }

    #[test]
    fn test_order_by_attaches_to_body() {
        let tree = tree("select a from t order by a limit 10");
        let root = tree.root();
        assert!(root.clauses.iter().any(|c| c.kind == ClauseKind::OrderBy));
        assert_eq!(root.shape.len(), 2);
    }

    #[test]
    fn test_unquoted_identifiers_lowercased() {
        let tree = tree(r#"select A, "B" from T"#);
        let names: Vec<_> = tree.root().projections.iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["a".to_string(), "B".to_string()]);
        assert_eq!(tree.root().source("t"), Some(&Source::Table("t".into())));
    }

    #[test]
    fn test_opaque_expression_keeps_columns() {
        let tree = tree("select a from t where b between 1 and c");
        let clause = &tree.root().clauses[0];
        let names: Vec<_> = clause.expr.columns().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_projection_canonical() {
        let tree = tree("select t.a, b as c, count(*) from t");
        let rendered: Vec<_> = tree.root().projections.iter().map(|p| p.canonical()).collect();
        assert_eq!(rendered[0], "t.a");
        assert_eq!(rendered[1], "b AS c");
        assert_eq!(rendered[2], "count(*)");
    }
}
