//! SQL dialect selection.
//!
//! The analysis never emits SQL, so a dialect only decides which grammar the
//! parser accepts. Each variant maps onto one of sqlparser's dialect objects:
//!
//! | Dialect | Parser grammar |
//! |---------|----------------|
//! | Generic | `GenericDialect` |
//! | Postgres | `PostgreSqlDialect` |
//! | DuckDb | `DuckDbDialect` |
//! | MySql | `MySqlDialect` |
//! | TSql | `MsSqlDialect` |
//! | Snowflake | `SnowflakeDialect` |
//! | BigQuery | `BigQueryDialect` |
//! | Redshift | `RedshiftSqlDialect` |
//! | Databricks | `DatabricksDialect` |
//! | Hive | `HiveDialect` |
//! | Sqlite | `SQLiteDialect` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    BigQueryDialect, DatabricksDialect, DuckDbDialect, GenericDialect, HiveDialect, MsSqlDialect,
    MySqlDialect, PostgreSqlDialect, RedshiftSqlDialect, SQLiteDialect, SnowflakeDialect,
};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Generic,
    Postgres,
    DuckDb,
    MySql,
    TSql,
    Snowflake,
    BigQuery,
    Redshift,
    Databricks,
    Hive,
    Sqlite,
}

impl Dialect {
    /// All dialects, in declaration order.
    pub const ALL: [Dialect; 11] = [
        Dialect::Generic,
        Dialect::Postgres,
        Dialect::DuckDb,
        Dialect::MySql,
        Dialect::TSql,
        Dialect::Snowflake,
        Dialect::BigQuery,
        Dialect::Redshift,
        Dialect::Databricks,
        Dialect::Hive,
        Dialect::Sqlite,
    ];

    /// Dialect name for display/logging.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Generic => "generic",
            Dialect::Postgres => "postgres",
            Dialect::DuckDb => "duckdb",
            Dialect::MySql => "mysql",
            Dialect::TSql => "tsql",
            Dialect::Snowflake => "snowflake",
            Dialect::BigQuery => "bigquery",
            Dialect::Redshift => "redshift",
            Dialect::Databricks => "databricks",
            Dialect::Hive => "hive",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// The sqlparser grammar used to parse this dialect.
    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Dialect::Generic => Box::new(GenericDialect {}),
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
            Dialect::DuckDb => Box::new(DuckDbDialect {}),
            Dialect::MySql => Box::new(MySqlDialect {}),
            Dialect::TSql => Box::new(MsSqlDialect {}),
            Dialect::Snowflake => Box::new(SnowflakeDialect {}),
            Dialect::BigQuery => Box::new(BigQueryDialect {}),
            Dialect::Redshift => Box::new(RedshiftSqlDialect {}),
            Dialect::Databricks => Box::new(DatabricksDialect {}),
            Dialect::Hive => Box::new(HiveDialect {}),
            Dialect::Sqlite => Box::new(SQLiteDialect {}),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a dialect name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown SQL dialect: '{0}'")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dialect = match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "ansi" => Dialect::Generic,
            "postgres" | "postgresql" => Dialect::Postgres,
            "duckdb" => Dialect::DuckDb,
            "mysql" => Dialect::MySql,
            "tsql" | "mssql" | "sqlserver" => Dialect::TSql,
            "snowflake" => Dialect::Snowflake,
            "bigquery" => Dialect::BigQuery,
            "redshift" => Dialect::Redshift,
            "databricks" | "spark" => Dialect::Databricks,
            "hive" => Dialect::Hive,
            "sqlite" => Dialect::Sqlite,
            _ => return Err(UnknownDialect(s.to_string())),
        };
        Ok(dialect)
    }
}
