//! Optional column-type schema used to qualify queries.
//!
//! A schema maps table names to their ordered columns and types. It is
//! loaded from JSON of the form:
//!
//! ```json
//! {
//!   "orders": { "order_id": "int", "customer_id": "int", "total": "decimal" },
//!   "raw.customers": { "customer_id": "int", "name": "text" }
//! }
//! ```
//!
//! Column order is the document order, which is the order `select *`
//! expands into.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Columns of one table, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<(String, String)>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.push(name.into(), data_type.into());
        self
    }

    fn push(&mut self, name: String, data_type: String) {
        let name = name.to_lowercase();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = data_type,
            None => self.columns.push((name, data_type)),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == column)
    }

    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(n, _)| n == column)
            .map(|(_, t)| t.as_str())
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for TableSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, data_type) in &self.columns {
            map.serialize_entry(name, data_type)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ColumnsVisitor;

        impl<'de> Visitor<'de> for ColumnsVisitor {
            type Value = TableSchema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to column type")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut table = TableSchema::new();
                while let Some((name, data_type)) = access.next_entry::<String, String>()? {
                    table.push(name, data_type);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}

/// Column-type schema for a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: HashMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, table: TableSchema) -> Self {
        self.tables.insert(name.into().to_lowercase(), table);
        self
    }

    /// Parse a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let schema: Schema = serde_json::from_str(json)?;
        // Table names are matched case-insensitively.
        let tables = schema
            .tables
            .into_iter()
            .map(|(name, table)| (name.to_lowercase(), table))
            .collect();
        Ok(Self { tables })
    }

    /// Look up a table by its dotted name, falling back to the last part
    /// (`analytics.orders` matches a schema entry for `orders` and vice versa).
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        if let Some(table) = self.tables.get(name) {
            return Some(table);
        }
        let short = name.rsplit('.').next().unwrap_or(name);
        self.tables.get(short).or_else(|| {
            self.tables
                .iter()
                .find(|(key, _)| key.rsplit('.').next() == Some(short))
                .map(|(_, table)| table)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_preserves_column_order() {
        let schema = Schema::from_json(r#"{"Orders": {"z": "int", "a": "text", "m": "date"}}"#)
            .unwrap();
        let table = schema.table("orders").unwrap();
        assert_eq!(table.columns().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(table.column_type("a"), Some("text"));
    }

    #[test]
    fn test_table_lookup_by_short_name() {
        let schema = Schema::new().with_table(
            "analytics.orders",
            TableSchema::new().with_column("id", "int"),
        );
        assert!(schema.table("analytics.orders").is_some());
        assert!(schema.table("orders").is_some());
        assert!(schema.table("prod.analytics.orders").is_some());
        assert!(schema.table("customers").is_none());
    }

    #[test]
    fn test_column_names_are_lowercased() {
        let table = TableSchema::new().with_column("OrderId", "int");
        assert!(table.contains("orderid"));
    }

    #[test]
    fn test_serialize_round_trip() {
        let schema = Schema::new().with_table(
            "t",
            TableSchema::new().with_column("b", "int").with_column("a", "int"),
        );
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"{"t":{"b":"int","a":"int"}}"#);
        assert_eq!(Schema::from_json(&json).unwrap(), schema);
    }
}
