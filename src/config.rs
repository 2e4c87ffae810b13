//! Session configuration consulted by the optimizer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::planner::Resolver;

/// Reserved prefix of session keys that carry index hints. The remainder of
/// the key names a table or alias.
pub const USE_INDEX_PREFIX: &str = "use_index.";

/// Session key toggling case-sensitive identifier resolution.
pub const CASE_SENSITIVE_KEY: &str = "case_sensitive";

/// Session key bounding optimizer iterations.
pub const MAX_ITERATIONS_KEY: &str = "optimizer.max_iterations";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("index hint key '{0}' names no table or alias")]
    EmptyHintTarget(String),

    #[error("index hint for '{0}' names no index")]
    EmptyHintIndex(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// An explicit "use this index for this table/alias" directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHint {
    /// Table name or alias the hint applies to.
    pub target: String,
    /// Name of the index relation to use.
    pub index: String,
}

/// Per-session optimizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Compare identifiers case-sensitively.
    pub case_sensitive: bool,
    /// Upper bound on optimizer fixpoint iterations.
    pub optimizer_max_iterations: usize,
    /// Index hints, in the order they were set.
    pub hints: Vec<IndexHint>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            optimizer_max_iterations: 10,
            hints: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from raw session settings. Unknown keys are
    /// ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Parse a JSON document with the same shape as this struct.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        for hint in &config.hints {
            validate_hint(&hint.target, &hint.index)?;
        }
        Ok(config)
    }

    /// Apply one session setting.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        if let Some(target) = strip_prefix_ignore_case(key, USE_INDEX_PREFIX) {
            validate_hint(target, value)?;
            self.hints.push(IndexHint {
                target: target.trim().to_string(),
                index: value.to_string(),
            });
        } else if key.eq_ignore_ascii_case(CASE_SENSITIVE_KEY) {
            self.case_sensitive = value.parse().map_err(|_| invalid(key, value))?;
        } else if key.eq_ignore_ascii_case(MAX_ITERATIONS_KEY) {
            self.optimizer_max_iterations = value.parse().map_err(|_| invalid(key, value))?;
        }
        Ok(())
    }

    /// Add an index hint.
    pub fn with_hint(mut self, target: impl Into<String>, index: impl Into<String>) -> Self {
        self.hints.push(IndexHint {
            target: target.into(),
            index: index.into(),
        });
        self
    }

    /// Set case sensitivity.
    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = value;
        self
    }

    pub fn has_hints(&self) -> bool {
        !self.hints.is_empty()
    }

    /// Identifier comparison policy for this session.
    pub fn resolver(&self) -> Resolver {
        if self.case_sensitive {
            Resolver::CaseSensitive
        } else {
            Resolver::CaseInsensitive
        }
    }
}

fn strip_prefix_ignore_case<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    let head = key.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        key.get(prefix.len()..)
    } else {
        None
    }
}

fn validate_hint(target: &str, index: &str) -> Result<(), ConfigError> {
    if target.trim().is_empty() {
        return Err(ConfigError::EmptyHintTarget(format!("{}{}", USE_INDEX_PREFIX, target)));
    }
    if index.trim().is_empty() {
        return Err(ConfigError::EmptyHintIndex(target.to_string()));
    }
    Ok(())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
