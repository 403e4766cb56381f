use sqldelta::sql::{
    build_scopes, parse, traverse_scope, ClauseKind, Dialect, Expr, ParseError, Schema, ScopeId,
    ScopeKind, ScopeRole, ScopeTree, Source, TableSchema,
};

fn tree(sql: &str) -> ScopeTree {
    build_scopes(sql, None, Dialect::Generic).unwrap().tree
}

fn projection_names(tree: &ScopeTree, id: ScopeId) -> Vec<String> {
    tree[id].projections.iter().map(|p| p.name.clone()).collect()
}

// =============================================================================
// Parsing
// =============================================================================

#[test]
fn test_parse_rejects_non_queries() {
    let err = parse("create table t (a int)", Dialect::Generic).unwrap_err();
    assert!(matches!(err, ParseError::NotAQuery(_)));

    let err = parse("select 1; select 2", Dialect::Generic).unwrap_err();
    assert_eq!(err, ParseError::MultipleStatements(2));
}

#[test]
fn test_parse_error_names_dialect() {
    let err = parse("select a from", Dialect::Postgres).unwrap_err();
    assert!(err.to_string().starts_with("SQL syntax error (postgres)"));
}

#[test]
fn test_dialect_specific_syntax() {
    let query = parse("select top 5 [order id] from [dbo].[orders]", Dialect::TSql).unwrap();
    let tree = traverse_scope(&query);
    assert_eq!(
        tree.root().source("orders"),
        Some(&Source::Table("dbo.orders".into()))
    );
    assert_eq!(projection_names(&tree, ScopeId(0)), vec!["order id"]);
}

// =============================================================================
// Scope layout
// =============================================================================

#[test]
fn test_children_before_parents() {
    let tree = tree(
        "with a as (select x from t), b as (select x from a) \
         select b.x, (select max(y) from u) as m from b",
    );
    assert_eq!(tree.len(), 4);
    for scope in &tree {
        for child in scope.subqueries.iter().chain(&scope.ctes) {
            assert!(child.index() < scope.id.index());
        }
    }
    assert!(tree.root().is_root());
    assert_eq!(tree.root().ctes, vec![ScopeId(0), ScopeId(1)]);
    assert_eq!(tree.root().subqueries.len(), 1);
}

#[test]
fn test_roles() {
    let tree = tree(
        "with c as (select a from t) \
         select s.a from (select a from c) s where s.a in (select a from u)",
    );
    let roles: Vec<ScopeRole> = tree.iter().map(|s| s.role.clone()).collect();
    assert_eq!(
        roles,
        vec![
            ScopeRole::Cte("c".into()),
            ScopeRole::DerivedTable,
            ScopeRole::Subquery,
            ScopeRole::Root,
        ]
    );
}

#[test]
fn test_nested_set_operations() {
    let tree = tree("select a from t union select a from u except select a from v");
    let root = tree.root();
    assert_eq!(root.kind, ScopeKind::Except);
    assert_eq!(root.members.len(), 2);
    assert_eq!(tree[root.members[0]].kind, ScopeKind::Union);
}

#[test]
fn test_correlated_column_resolves_to_outer_source() {
    let tree = tree("select a from t where exists (select 1 from u where u.id = t.id)");
    let sub = ScopeId(0);
    let clause = &tree[sub].clauses[0];
    assert_eq!(clause.kind, ClauseKind::Where);

    let outer_col = clause
        .expr
        .columns()
        .into_iter()
        .find(|c| c.table.as_deref() == Some("t"))
        .unwrap();
    assert_eq!(
        tree.resolve_column(sub, outer_col),
        Some(&Source::Table("t".into()))
    );
}

#[test]
fn test_unaliased_expression_named_by_rendering() {
    let tree = tree("select a + 1, upper(b) from t");
    let root = tree.root();
    assert_eq!(root.projections.len(), 2);
    for projection in &root.projections {
        assert_eq!(projection.name, projection.expr.to_string());
        assert_eq!(projection.canonical(), projection.name);
    }
}

// =============================================================================
// Qualification
// =============================================================================

#[test]
fn test_build_scopes_expands_star_with_schema() {
    let schema = Schema::new().with_table(
        "t",
        TableSchema::new().with_column("id", "int").with_column("Name", "text"),
    );
    let parsed = build_scopes("select * from t", Some(&schema), Dialect::Generic).unwrap();
    assert!(parsed.is_qualified());
    assert_eq!(projection_names(&parsed.tree, ScopeId(0)), vec!["id", "name"]);
    assert!(parsed
        .tree
        .root()
        .projections
        .iter()
        .all(|p| matches!(&p.expr, Expr::Column(c) if c.table.as_deref() == Some("t"))));
}

#[test]
fn test_build_scopes_reports_ambiguity() {
    let schema = Schema::new()
        .with_table("t", TableSchema::new().with_column("id", "int"))
        .with_table("u", TableSchema::new().with_column("id", "int"));
    let parsed =
        build_scopes("select id from t join u on t.id = u.id", Some(&schema), Dialect::Generic)
            .unwrap();
    assert!(!parsed.is_qualified());
    assert!(parsed.qualify_error.is_some());
}
