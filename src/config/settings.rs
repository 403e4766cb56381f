//! TOML-based configuration for sqldelta.
//!
//! Supports a config file (sqldelta.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [analysis]
//! dialect = "snowflake"
//! schema_path = "${PROJECT_DIR}/target/schema.json"
//!
//! [impact]
//! column_level = true
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sql::{Dialect, Schema};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse schema file: {0}")]
    SchemaError(#[from] serde_json::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// How queries are parsed and qualified.
    pub analysis: AnalysisSettings,

    /// How impact is computed.
    pub impact: ImpactSettings,
}

/// Analysis configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// SQL dialect name (postgres, snowflake, tsql, ...).
    pub dialect: Option<String>,

    /// Path to a JSON column-type schema (supports ${ENV_VAR} expansion).
    pub schema_path: Option<String>,
}

impl AnalysisSettings {
    /// Get the dialect, defaulting to the generic grammar.
    pub fn dialect(&self) -> Result<Dialect, SettingsError> {
        match &self.dialect {
            Some(name) => name
                .parse()
                .map_err(|_| SettingsError::UnsupportedDialect(name.clone())),
            None => Ok(Dialect::default()),
        }
    }

    /// Get the schema path with environment variables expanded.
    pub fn resolved_schema_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.schema_path
            .as_deref()
            .map(|path| expand_env_vars(path).map(PathBuf::from))
            .transpose()
    }

    /// Load the configured schema, if any.
    pub fn schema(&self) -> Result<Option<Schema>, SettingsError> {
        match self.resolved_schema_path()? {
            Some(path) => load_schema(path).map(Some),
            None => Ok(None),
        }
    }
}

/// Impact configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImpactSettings {
    /// Use column lineage to narrow impact when it is available.
    pub column_level: bool,
}

impl Default for ImpactSettings {
    fn default() -> Self {
        Self { column_level: true }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SQLDELTA_CONFIG`
    /// 2. `./sqldelta.toml`
    /// 3. `~/.config/sqldelta/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SQLDELTA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("sqldelta.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqldelta").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }
}

/// Load a JSON column-type schema file.
pub fn load_schema<P: AsRef<Path>>(path: P) -> Result<Schema, SettingsError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SettingsError::FileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    Ok(Schema::from_json(&content)?)
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.next_if_eq(&'{').is_some() {
            chars.by_ref().take_while(|&ch| ch != '}').collect()
        } else {
            // $VAR ends at the first non-alphanumeric/underscore
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
            name
        };

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
