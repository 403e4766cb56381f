use sqldelta::semantic::{
    classify_batch, classify_batch_with_stats, classify_change, ChangeCategory, ChangePair,
    ColumnChangeStatus, NodeChange,
};
use sqldelta::sql::{Dialect, Schema, TableSchema};

fn classify(old: &str, new: &str) -> NodeChange {
    classify_change(old, new, None, None, None)
}

fn statuses(change: &NodeChange) -> Vec<(&str, ColumnChangeStatus)> {
    change
        .columns
        .iter()
        .map(|(name, status)| (name.as_str(), *status))
        .collect()
}

// =============================================================================
// Basic properties
// =============================================================================

#[test]
fn test_identity_is_non_breaking() {
    let sql = "with c as (select a, sum(b) as b from t group by a) select * from c";
    let change = classify(sql, sql);
    assert_eq!(change.category, ChangeCategory::NonBreaking);
    assert!(change.columns.is_empty());
}

#[test]
fn test_formatting_only_change() {
    let change = classify("select a,b from T", "select a,\nb from T");
    assert_eq!(change.category, ChangeCategory::NonBreaking);
    assert!(change.columns.is_empty());
}

#[test]
fn test_added_column() {
    let change = classify("select a from T", "select a,b from T");
    assert_eq!(change.category, ChangeCategory::NonBreaking);
    assert_eq!(statuses(&change), vec![("b", ColumnChangeStatus::Added)]);
}

#[test]
fn test_removed_column() {
    let change = classify("select a,b from T", "select b from T");
    assert_eq!(change.category, ChangeCategory::PartialBreaking);
    assert_eq!(statuses(&change), vec![("a", ColumnChangeStatus::Removed)]);
}

#[test]
fn test_reordered_columns() {
    let change = classify("select a,b from T", "select b,a from T");
    assert_eq!(change.category, ChangeCategory::NonBreaking);
    assert!(change.columns.is_empty());
}

#[test]
fn test_renamed_column() {
    let change = classify("select a from T", "select a as a2 from T");
    assert_eq!(change.category, ChangeCategory::PartialBreaking);
    assert_eq!(
        statuses(&change),
        vec![
            ("a", ColumnChangeStatus::Removed),
            ("a2", ColumnChangeStatus::Added)
        ]
    );
}

#[test]
fn test_added_filter_is_breaking() {
    let change = classify("select a from T", "select a from T where a > 100");
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_added_udtf_is_breaking() {
    let change = classify("select a from T", "select a, unnest(a) as b from T");
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_expression_becoming_udtf_is_modified() {
    let change = classify("select a as b from t", "select unnest(a) as b from t");
    assert_eq!(change.category, ChangeCategory::PartialBreaking);
    assert_eq!(statuses(&change), vec![("b", ColumnChangeStatus::Modified)]);
}

#[test]
fn test_modified_udtf_is_breaking() {
    let change = classify("select unnest(a) as b from t", "select unnest(c) as b from t");
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_table_alias_rename_is_non_breaking() {
    let change = classify("select a from t", "select a from t as x");
    assert!(change.is_unchanged(), "got {change:?}");
}

#[test]
fn test_cte_rename_is_non_breaking() {
    let change = classify(
        "with c as (select a from t) select a from c",
        "with d as (select a from t) select a from d",
    );
    assert!(change.is_unchanged(), "got {change:?}");
}

#[test]
fn test_malformed_new_sql_never_raises() {
    let change = classify("select a from T", "selects a from T");
    assert!(matches!(
        change.category,
        ChangeCategory::Breaking | ChangeCategory::Unknown
    ));
}

#[test]
fn test_malformed_old_sql_is_unknown() {
    let change = classify("select a from", "select a from T");
    assert_eq!(change.category, ChangeCategory::Unknown);
}

// =============================================================================
// Shape changes
// =============================================================================

#[test]
fn test_shape_changes_are_breaking() {
    let base = "select a from t";
    for changed in [
        "select distinct a from t",
        "select a from t join u on t.id = u.id",
        "select a from t group by a",
        "select a from t order by a",
        "select a from t limit 10",
    ] {
        let change = classify(base, changed);
        assert_eq!(change.category, ChangeCategory::Breaking, "{changed}");
    }
}

#[test]
fn test_join_condition_change_is_breaking() {
    let change = classify(
        "select t.a from t join u on t.id = u.id",
        "select t.a from t left join u on t.id = u.id",
    );
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_modified_expression_is_partial() {
    let change = classify("select a, b + 1 as c from t", "select a, b + 2 as c from t");
    assert_eq!(change.category, ChangeCategory::PartialBreaking);
    assert_eq!(statuses(&change), vec![("c", ColumnChangeStatus::Modified)]);
}

#[test]
fn test_removed_column_under_distinct_is_breaking() {
    let change = classify("select distinct a, b from t", "select distinct a from t");
    assert_eq!(change.category, ChangeCategory::Breaking);
}

// =============================================================================
// Propagation through scopes
// =============================================================================

#[test]
fn test_change_in_derived_table_reaches_reader() {
    let change = classify(
        "select s.x from (select a as x from t) s",
        "select s.x from (select cast(a as int) as x from t) s",
    );
    assert_eq!(change.category, ChangeCategory::PartialBreaking);
    assert_eq!(statuses(&change), vec![("x", ColumnChangeStatus::Modified)]);
}

#[test]
fn test_breaking_cte_breaks_query() {
    let change = classify(
        "with c as (select a from t) select a from c",
        "with c as (select a from t where a is not null) select a from c",
    );
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_join_on_modified_cte_column_is_breaking() {
    let change = classify(
        "with c as (select id, a from t) select u.b from u join c on u.id = c.id",
        "with c as (select id + 1 as id, a from t) select u.b from u join c on u.id = c.id",
    );
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_added_cte_column_is_not_breaking() {
    let change = classify(
        "with c as (select a from t) select * from c",
        "with c as (select a, b from t) select * from c",
    );
    assert_eq!(change.category, ChangeCategory::NonBreaking);
    assert_eq!(statuses(&change), vec![("b", ColumnChangeStatus::Added)]);
}

#[test]
fn test_breaking_union_member_breaks_union() {
    let change = classify(
        "select a from t union all select a from u",
        "select a from t union all select a from u where a > 0",
    );
    assert_eq!(change.category, ChangeCategory::Breaking);
}

#[test]
fn test_union_merge_keeps_first_member_status() {
    // Member 0 adds `b`; member 1 modifies it.
    let change = classify(
        "select a from t union all select a, b from u",
        "select a, b from t union all select a, b + 1 as b from u",
    );
    assert_eq!(change.category, ChangeCategory::PartialBreaking);
    assert_eq!(statuses(&change), vec![("b", ColumnChangeStatus::Added)]);
}

// =============================================================================
// Schema and batch
// =============================================================================

#[test]
fn test_schema_qualified_star_expansion() {
    let old_schema = Schema::new().with_table(
        "t",
        TableSchema::new().with_column("a", "int").with_column("b", "int"),
    );
    let new_schema = Schema::new().with_table(
        "t",
        TableSchema::new()
            .with_column("a", "int")
            .with_column("b", "int")
            .with_column("c", "text"),
    );
    let change = classify_change(
        "select * from t",
        "select * from t ",
        Some(&old_schema),
        Some(&new_schema),
        Some(Dialect::Postgres),
    );
    assert_eq!(change.category, ChangeCategory::NonBreaking);
    assert_eq!(statuses(&change), vec![("c", ColumnChangeStatus::Added)]);
}

#[test]
fn test_classify_batch_preserves_order() {
    let pairs = [
        ChangePair::new("select a from t", "select a from t where a > 1"),
        ChangePair::new("select a from t", "select a, b from t"),
        ChangePair::new("select a, b from t", "select a from t"),
        ChangePair::new("select a from t", "not sql at all"),
    ];
    let categories: Vec<ChangeCategory> = classify_batch(&pairs, None)
        .into_iter()
        .map(|change| change.category)
        .collect();
    assert_eq!(
        categories,
        vec![
            ChangeCategory::Breaking,
            ChangeCategory::NonBreaking,
            ChangeCategory::PartialBreaking,
            ChangeCategory::Unknown,
        ]
    );
}

#[test]
fn test_classify_batch_sums_stats() {
    let pairs = [
        ChangePair::new("select a from t", "select a, b from t"),
        ChangePair::new("select a from t", "select a from t"),
        ChangePair::new(
            "with c as (select a from t) select a from c",
            "with c as (select a from t) select a, 1 as one from c",
        ),
    ];
    let (changes, stats) = classify_batch_with_stats(&pairs, None);
    assert_eq!(changes.len(), 3);
    assert!(changes[1].is_unchanged());
    assert_eq!(stats.scopes_visited, 3);
    assert_eq!(stats.qualify_fallbacks, 0);
}
