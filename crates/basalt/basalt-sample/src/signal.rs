use basalt_config::ConfigError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::data::SignalData;

/// Value type of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SignalType {
    Boolean,
    Integer,
    #[default]
    Float,
    Complex,
}

impl SignalType {
    /// Parses both the long names used in configs and the single-character
    /// codes used in type strings like `"64f"`.
    pub fn from_str(s: &str) -> Option<SignalType> {
        match s {
            "boolean" | "b" => Some(SignalType::Boolean),
            "integer" | "i" => Some(SignalType::Integer),
            "float" | "f" => Some(SignalType::Float),
            "complex" | "c" => Some(SignalType::Complex),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::Boolean => "boolean",
            SignalType::Integer => "integer",
            SignalType::Float => "float",
            SignalType::Complex => "complex",
        }
    }

    /// Infers the type from a JSON scalar, used when a signal declares an
    /// `init` value but no explicit type.
    pub fn detect(value: &Value) -> SignalType {
        match value {
            Value::Bool(_) => SignalType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => SignalType::Integer,
            Value::Number(_) => SignalType::Float,
            Value::Object(_) => SignalType::Complex,
            _ => SignalType::Float,
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed, named channel of a sample.
///
/// Immutable once constructed; shared between the owning list and any
/// derived lists (mappings reuse the source descriptors directly).
#[derive(Clone, Debug)]
pub struct Signal {
    pub name: String,
    pub unit: String,
    pub ty: SignalType,
    pub init: SignalData,
}

impl Signal {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, ty: SignalType) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            ty,
            init: SignalData::default(),
        }
    }

    /// Name shown in headers and logs; falls back to the positional name
    /// for anonymous signals.
    pub fn display_name(&self, index: usize) -> String {
        if self.name.is_empty() {
            format!("signal{index}")
        } else {
            self.name.clone()
        }
    }
}

/// JSON shape of one signal declaration.
///
/// `count` expands the declaration into that many equally-typed signals,
/// numbered by suffix.
#[derive(Debug, Deserialize)]
pub struct SignalConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub init: Option<Value>,
    #[serde(default)]
    pub count: Option<usize>,
}

impl SignalConfig {
    pub fn build(&self) -> Result<Signal, ConfigError> {
        let ty = match &self.ty {
            Some(s) => SignalType::from_str(s)
                .ok_or_else(|| ConfigError::unknown("signal type", s.clone()))?,
            None => match &self.init {
                Some(v) => SignalType::detect(v),
                None => SignalType::Float,
            },
        };

        let init = match &self.init {
            Some(v) => SignalData::from_json(ty, v)
                .map_err(|reason| ConfigError::invalid("init", reason))?,
            None => SignalData::default(),
        };

        Ok(Signal {
            name: self.name.clone().unwrap_or_default(),
            unit: self.unit.clone().unwrap_or_default(),
            ty,
            init,
        })
    }

    /// Expands into `count` signals (or one if unset).
    pub fn expand(&self) -> Result<Vec<Arc<Signal>>, ConfigError> {
        let base = self.build()?;
        let count = self.count.unwrap_or(1);
        if count == 0 {
            return Err(ConfigError::invalid("count", "must be at least 1"));
        }

        if count == 1 {
            return Ok(vec![Arc::new(base)]);
        }

        Ok((0..count)
            .map(|i| {
                let mut sig = base.clone();
                if !sig.name.is_empty() {
                    sig.name = format!("{}{}", sig.name, i);
                }
                Arc::new(sig)
            })
            .collect())
    }
}
