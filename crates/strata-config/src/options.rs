use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{json_type_name, ConfigError, OptionError};
use crate::logging::LoggingConfig;

/// Per-view configuration.
///
/// `env` and `build_flags` can change package resolution itself, so they are part of every
/// package key (see [`Options::build_fingerprint`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Extra environment passed to the build system.
    pub env: BTreeMap<String, String>,
    /// Extra flags passed to the build system.
    pub build_flags: Vec<String>,
    /// Analyzers that are never run.
    pub disabled_analyzers: BTreeSet<String>,
    pub verbose_output: bool,
    /// Warm every workspace package in the background after a view loads.
    pub preload_workspace: bool,
    pub logging: LoggingConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            build_flags: Vec::new(),
            disabled_analyzers: BTreeSet::new(),
            verbose_output: false,
            preload_workspace: true,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionState {
    Handled,
    /// Recognized but no longer honored; `replacement` names the option to use instead.
    Deprecated { replacement: Option<&'static str> },
    Unexpected,
}

/// Outcome of applying one option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionResult {
    pub name: String,
    pub value: Value,
    pub error: Option<OptionError>,
    pub state: OptionState,
}

impl OptionResult {
    fn new(name: &str, value: &Value) -> Self {
        Self {
            name: name.to_string(),
            value: value.clone(),
            error: None,
            state: OptionState::Handled,
        }
    }

    fn wrong_type(&mut self, expected: &'static str) {
        self.error = Some(OptionError::WrongType {
            name: self.name.clone(),
            expected,
            found: json_type_name(&self.value),
        });
    }

    fn as_bool(&mut self) -> Option<bool> {
        match self.value {
            Value::Bool(value) => Some(value),
            _ => {
                self.wrong_type("bool");
                None
            }
        }
    }

    fn as_string_list(&mut self) -> Option<Vec<String>> {
        let Value::Array(items) = &self.value else {
            self.wrong_type("[]string");
            return None;
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match scalar_to_string(item) {
                Some(item) => out.push(item),
                None => {
                    self.error = Some(OptionError::InvalidValue {
                        name: self.name.clone(),
                        value: item.clone(),
                        message: "list entries must be strings".to_string(),
                    });
                    return None;
                }
            }
        }
        Some(out)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Results of applying a batch of options, one entry per option.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionResults(pub Vec<OptionResult>);

impl OptionResults {
    pub fn iter(&self) -> std::slice::Iter<'_, OptionResult> {
        self.0.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &OptionResult> {
        self.0.iter().filter(|result| result.error.is_some())
    }

    pub fn get(&self, name: &str) -> Option<&OptionResult> {
        self.0.iter().find(|result| result.name == name)
    }

    pub fn is_ok(&self) -> bool {
        self.0.iter().all(OptionResult::is_ok)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a OptionResults {
    type Item = &'a OptionResult;
    type IntoIter = std::slice::Iter<'a, OptionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Options {
    /// Applies a JSON options object, one option at a time.
    ///
    /// An invalid value for one option is reported in its result and does not stop the
    /// remaining options from being applied. `null` applies nothing.
    pub fn apply(&mut self, options: &Value) -> OptionResults {
        let mut results = Vec::new();
        match options {
            Value::Null => {}
            Value::Object(map) => {
                for (name, value) in map {
                    results.push(self.set(name, value));
                }
            }
            other => results.push(OptionResult {
                name: String::new(),
                value: other.clone(),
                error: Some(OptionError::NotAnObject {
                    found: json_type_name(other),
                }),
                state: OptionState::Handled,
            }),
        }

        for result in &results {
            match (&result.error, result.state) {
                (Some(err), _) => tracing::warn!(
                    target: "strata.config",
                    option = %result.name,
                    error = %err,
                    "failed to apply option"
                ),
                (None, OptionState::Deprecated { replacement }) => tracing::warn!(
                    target: "strata.config",
                    option = %result.name,
                    replacement = replacement.unwrap_or(""),
                    "deprecated option ignored"
                ),
                (None, OptionState::Unexpected) => tracing::debug!(
                    target: "strata.config",
                    option = %result.name,
                    "unexpected option ignored"
                ),
                (None, OptionState::Handled) => {}
            }
        }
        OptionResults(results)
    }

    /// Applies a single option.
    pub fn set(&mut self, name: &str, value: &Value) -> OptionResult {
        let mut result = OptionResult::new(name, value);
        match name {
            "env" => {
                let Value::Object(entries) = value else {
                    result.wrong_type("map[string]string");
                    return result;
                };
                let mut env = BTreeMap::new();
                for (key, entry) in entries {
                    let Some(entry) = scalar_to_string(entry) else {
                        result.error = Some(OptionError::InvalidValue {
                            name: name.to_string(),
                            value: entry.clone(),
                            message: format!("environment variable {key} must be a scalar"),
                        });
                        return result;
                    };
                    env.insert(key.clone(), entry);
                }
                self.env = env;
            }
            "build_flags" => {
                if let Some(flags) = result.as_string_list() {
                    self.build_flags = flags;
                }
            }
            "disabled_analyzers" => {
                if let Some(names) = result.as_string_list() {
                    self.disabled_analyzers = names.into_iter().collect();
                }
            }
            "verbose_output" => {
                if let Some(value) = result.as_bool() {
                    self.verbose_output = value;
                }
            }
            "preload_workspace" => {
                if let Some(value) = result.as_bool() {
                    self.preload_workspace = value;
                }
            }
            "logging" => match serde_json::from_value::<LoggingConfig>(value.clone()) {
                Ok(logging) => self.logging = logging,
                Err(err) => {
                    result.error = Some(OptionError::InvalidValue {
                        name: name.to_string(),
                        value: value.clone(),
                        message: err.to_string(),
                    });
                }
            },

            // Deprecated settings.
            "verbose" => {
                result.state = OptionState::Deprecated {
                    replacement: Some("verbose_output"),
                };
            }
            "experimental_disabled_analyses" => {
                result.state = OptionState::Deprecated {
                    replacement: Some("disabled_analyzers"),
                };
            }
            "want_suggested_fixes" => {
                result.state = OptionState::Deprecated { replacement: None };
            }

            _ => result.state = OptionState::Unexpected,
        }
        result
    }

    /// Parses options from TOML, applying them over the defaults through [`Options::apply`].
    pub fn from_toml_str(text: &str) -> Result<(Self, OptionResults), ConfigError> {
        let table: toml::Table = toml::from_str(text)?;
        let value = serde_json::to_value(table).map_err(|err| ConfigError::Toml(err.to_string()))?;
        let mut options = Options::default();
        let results = options.apply(&value);
        Ok((options, results))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<(Self, OptionResults), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Stable bytes of the options that affect package resolution and type checking.
    pub fn build_fingerprint(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in &self.env {
            push_field(&mut out, key.as_bytes());
            push_field(&mut out, value.as_bytes());
        }
        out.push(0xff);
        for flag in &self.build_flags {
            push_field(&mut out, flag.as_bytes());
        }
        out
    }

    pub fn analyzer_enabled(&self, name: &str) -> bool {
        !self.disabled_analyzers.contains(name)
    }
}

fn push_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Bool(value) => Some(value.to_string()),
        Value::Number(value) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
