use std::collections::BTreeSet;

use sqldelta::semantic::{compute_lineage, CllResult, ColumnDependency, TransformationType};
use sqldelta::sql::{Dialect, Schema, TableSchema};

fn deps(items: &[ColumnDependency]) -> BTreeSet<String> {
    items.iter().map(ToString::to_string).collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn lineage(sql: &str) -> CllResult {
    compute_lineage(sql, None, None).unwrap()
}

const ORDERS_MODEL: &str = r#"
with orders as (
    select id, customer_id, amount
    from raw.orders
    where status = 'complete'
),
customers as (
    select id, name from raw.customers
)
select c.name, sum(o.amount) as total
from orders o
join customers c on o.customer_id = c.id
group by c.name
"#;

// =============================================================================
// Models
// =============================================================================

#[test]
fn test_model_with_ctes_and_join() {
    let result = lineage(ORDERS_MODEL);

    assert_eq!(result.c2c.names().collect::<Vec<_>>(), vec!["name", "total"]);

    let name = result.c2c.get("name").unwrap();
    assert_eq!(name.transformation_type, TransformationType::Passthrough);
    assert_eq!(deps(&name.depends_on), set(&["raw.customers.name"]));

    let total = result.c2c.get("total").unwrap();
    assert_eq!(total.transformation_type, TransformationType::Derived);
    assert_eq!(deps(&total.depends_on), set(&["raw.orders.amount"]));

    assert_eq!(
        deps(&result.m2c),
        set(&[
            "raw.orders.status",
            "raw.orders.customer_id",
            "raw.customers.id",
            "raw.customers.name",
        ])
    );
}

#[test]
fn test_all_dependencies_covers_rows_and_columns() {
    let result = lineage(ORDERS_MODEL);
    let all = deps(&result.all_dependencies());
    assert!(all.contains("raw.orders.amount"));
    assert!(all.contains("raw.orders.status"));
    assert!(result.references(&ColumnDependency::new("raw.customers", "name")));
    assert!(!result.references(&ColumnDependency::new("raw.orders", "id")));
}

#[test]
fn test_every_output_column_has_an_entry() {
    let result = lineage("select a, 1 as one, upper(b) as ub, (select max(x) from u) as mx from t");
    assert_eq!(result.c2c.len(), 4);
    assert_eq!(
        result.c2c.get("one").unwrap().transformation_type,
        TransformationType::Source
    );
}

// =============================================================================
// Schema qualification
// =============================================================================

#[test]
fn test_schema_binds_unqualified_column_to_its_table() {
    let schema = Schema::new()
        .with_table(
            "orders",
            TableSchema::new().with_column("id", "int").with_column("cid", "int"),
        )
        .with_table(
            "customers",
            TableSchema::new().with_column("id", "int").with_column("name", "text"),
        );
    let sql = "select name from orders o join customers c on o.cid = c.id";

    let result = compute_lineage(sql, Some(&schema), None).unwrap();
    let name = result.c2c.get("name").unwrap();
    assert_eq!(deps(&name.depends_on), set(&["customers.name"]));
}

#[test]
fn test_unresolvable_schema_falls_back_to_unqualified() {
    let schema = Schema::new().with_table("t", TableSchema::new().with_column("a", "int"));
    let result = compute_lineage("select missing from t", Some(&schema), None).unwrap();
    let missing = result.c2c.get("missing").unwrap();
    assert_eq!(deps(&missing.depends_on), set(&["t.missing"]));
}

// =============================================================================
// Dialects and errors
// =============================================================================

#[test]
fn test_dialect_by_name() {
    let dialect: Dialect = "snowflake".parse().unwrap();
    let result = compute_lineage("select a as b from db.sch.t", None, Some(dialect)).unwrap();
    let b = result.c2c.get("b").unwrap();
    assert_eq!(b.transformation_type, TransformationType::Renamed);
    assert_eq!(deps(&b.depends_on), set(&["db.sch.t.a"]));
}

#[test]
fn test_malformed_sql_is_an_error() {
    assert!(compute_lineage("select a from", None, None).is_err());
    assert!(compute_lineage("", None, None).is_err());
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn test_pretty_json() {
    let result = lineage("select b as c from t");
    insta::assert_snapshot!(serde_json::to_string_pretty(&result).unwrap(), @r#"
    {
      "m2c": [],
      "c2c": {
        "c": {
          "transformation_type": "renamed",
          "depends_on": [
            {
              "node": "t",
              "column": "b"
            }
          ]
        }
      }
    }
    "#);
}
