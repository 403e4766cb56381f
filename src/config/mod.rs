//! Configuration module for sqldelta.
//!
//! Handles the settings file, environment variables and schema files.

mod settings;

pub use settings::{
    expand_env_vars, load_schema, AnalysisSettings, ImpactSettings, Settings, SettingsError,
};
