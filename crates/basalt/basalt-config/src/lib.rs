//! Shared configuration error type and JSON helpers.
//!
//! Every configurable component (nodes, paths, hooks, formats, mappings)
//! parses itself out of a `serde_json::Value` and fails with a
//! [`ConfigError`]. Parsing is fail-fast: nothing starts if any part of the
//! configuration is rejected.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),

    #[error("missing setting '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{setting}': {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },

    #[error("unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },
}

impl ConfigError {
    pub fn invalid(setting: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            setting,
            reason: reason.into(),
        }
    }

    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        ConfigError::Unknown {
            kind,
            name: name.into(),
        }
    }
}

/// Deserializes a typed config struct out of a JSON value.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, ConfigError> {
    Ok(serde_json::from_value(value.clone())?)
}

/// Reads and parses a whole JSON config file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Value, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Rounds a queue length up to the next power of two, if needed.
pub fn pow2_ceil(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow2_ceil_rounds_up() {
        assert_eq!(pow2_ceil(0), 1);
        assert_eq!(pow2_ceil(1), 1);
        assert_eq!(pow2_ceil(2), 2);
        assert_eq!(pow2_ceil(3), 4);
        assert_eq!(pow2_ceil(1000), 1024);
        assert_eq!(pow2_ceil(1024), 1024);
    }

    #[test]
    fn from_value_reports_type_errors() {
        #[derive(serde::Deserialize)]
        struct Cfg {
            #[allow(dead_code)]
            rate: f64,
        }

        let good: Result<Cfg, _> = from_value(&serde_json::json!({ "rate": 10.0 }));
        assert!(good.is_ok());

        let bad: Result<Cfg, _> = from_value(&serde_json::json!({ "rate": "fast" }));
        assert!(bad.is_err());
    }
}
