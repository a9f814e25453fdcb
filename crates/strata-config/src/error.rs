use std::path::PathBuf;

use thiserror::Error;

/// Failure to load a whole configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` would embed a source excerpt.
        Self::Toml(err.message().to_string())
    }
}

/// Why a single option could not be applied.
///
/// Carries the offending value so the client can be told exactly what was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionError {
    #[error("invalid type {found} for {expected} option {name:?}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid value {value} for option {name:?}: {message}")]
    InvalidValue {
        name: String,
        value: serde_json::Value,
        message: String,
    },
    #[error("invalid options type {found}; expected an object")]
    NotAnObject { found: &'static str },
}

pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
