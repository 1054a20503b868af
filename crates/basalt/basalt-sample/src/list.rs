use basalt_config::ConfigError;
use serde_json::Value;
use std::sync::Arc;

use crate::signal::{Signal, SignalConfig, SignalType};

/// Ordered set of signal descriptors.
///
/// The position in this list is the sole key into sample data: `data[i]`
/// is interpreted per `signals[i].ty`. Lists are built while parsing and
/// preparing, then frozen behind an `Arc` and shared by every sample that
/// flows against them.
#[derive(Clone, Debug, Default)]
pub struct SignalList {
    sigs: Vec<Arc<Signal>>,
}

impl SignalList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Arc<SignalList> {
        Arc::new(Self::default())
    }

    pub fn from_signals(sigs: Vec<Arc<Signal>>) -> Self {
        Self { sigs }
    }

    /// `count` anonymous float channels, the default shape when a node
    /// config does not declare its signals.
    pub fn floats(count: usize) -> Self {
        Self {
            sigs: (0..count)
                .map(|_| Arc::new(Signal::new("", "", SignalType::Float)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Signal>> {
        self.sigs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Signal>> {
        self.sigs.iter()
    }

    pub fn push(&mut self, sig: Arc<Signal>) {
        self.sigs.push(sig);
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.sigs.iter().position(|s| s.name == name)
    }

    /// Places `sig` at `index`, growing the list with anonymous floats if
    /// needed. Used when compiling mappings, which may fill a list out of
    /// order.
    pub fn set(&mut self, index: usize, sig: Arc<Signal>) {
        if index >= self.sigs.len() {
            self.sigs
                .resize_with(index + 1, || Arc::new(Signal::new("", "", SignalType::Float)));
        }
        self.sigs[index] = sig;
    }

    /// Parses the `signals` setting of a node direction. Accepted shapes:
    ///
    /// - an array of signal objects (each optionally with `count`),
    /// - an integer: that many anonymous floats,
    /// - a type string like `"64f"` or `"3i2f"`,
    /// - a single signal object.
    pub fn parse(value: &Value) -> Result<SignalList, ConfigError> {
        match value {
            Value::Array(entries) => {
                let mut list = SignalList::new();
                for entry in entries {
                    let cfg: SignalConfig = basalt_config::from_value(entry)?;
                    for sig in cfg.expand()? {
                        list.push(sig);
                    }
                }
                Ok(list)
            }
            Value::Number(n) => {
                let count = n
                    .as_u64()
                    .ok_or_else(|| ConfigError::invalid("signals", "count must be unsigned"))?;
                Ok(SignalList::floats(count as usize))
            }
            Value::String(s) => SignalList::from_type_str(s),
            Value::Object(_) => {
                let cfg: SignalConfig = basalt_config::from_value(value)?;
                Ok(SignalList::from_signals(cfg.expand()?))
            }
            _ => Err(ConfigError::invalid(
                "signals",
                "expected array, count, type string or object",
            )),
        }
    }

    /// Parses compact type strings: a run of digits followed by a type
    /// code, repeated. `"64f"` is 64 floats, `"2i1c"` two integers and a
    /// complex.
    pub fn from_type_str(s: &str) -> Result<SignalList, ConfigError> {
        let mut list = SignalList::new();
        let mut count = 0usize;
        let mut have_digits = false;

        for ch in s.chars() {
            if let Some(d) = ch.to_digit(10) {
                count = count * 10 + d as usize;
                have_digits = true;
                continue;
            }

            let ty = SignalType::from_str(&ch.to_string())
                .ok_or_else(|| ConfigError::unknown("signal type code", ch.to_string()))?;
            let n = if have_digits { count } else { 1 };
            for _ in 0..n {
                list.push(Arc::new(Signal::new("", "", ty)));
            }
            count = 0;
            have_digits = false;
        }

        if have_digits {
            return Err(ConfigError::invalid(
                "signals",
                format!("trailing count without type code in '{s}'"),
            ));
        }

        Ok(list)
    }

    /// One-line description for startup logging.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .sigs
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}({})", s.display_name(i), s.ty))
            .collect();
        parts.join(", ")
    }
}

impl std::ops::Index<usize> for SignalList {
    type Output = Arc<Signal>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.sigs[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_count_shorthand() {
        let list = SignalList::parse(&json!(4)).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list[0].ty, SignalType::Float);
    }

    #[test]
    fn parse_type_string_mixed() {
        let list = SignalList::from_type_str("2i1c3f").unwrap();
        assert_eq!(list.len(), 6);
        assert_eq!(list[0].ty, SignalType::Integer);
        assert_eq!(list[2].ty, SignalType::Complex);
        assert_eq!(list[5].ty, SignalType::Float);
    }

    #[test]
    fn parse_type_string_without_count() {
        let list = SignalList::from_type_str("fib").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].ty, SignalType::Integer);
        assert_eq!(list[2].ty, SignalType::Boolean);
    }

    #[test]
    fn parse_rejects_trailing_digits() {
        assert!(SignalList::from_type_str("3f2").is_err());
    }

    #[test]
    fn parse_array_with_names() {
        let list = SignalList::parse(&json!([
            { "name": "voltage", "unit": "V", "type": "float" },
            { "name": "current", "type": "float", "count": 2 },
        ]))
        .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].name, "voltage");
        assert_eq!(list[0].unit, "V");
        assert_eq!(list.index_of("current1"), Some(2));
    }

    #[test]
    fn set_grows_with_anonymous_floats() {
        let mut list = SignalList::new();
        list.set(2, Arc::new(Signal::new("x", "", SignalType::Integer)));
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].ty, SignalType::Float);
        assert_eq!(list[2].name, "x");
    }
}
