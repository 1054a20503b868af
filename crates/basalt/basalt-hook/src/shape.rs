//! Hooks that reshape the signal list: they are the reason `prepare`
//! threads the list through the chain and the shape freezes at start.

use basalt_config::ConfigError;
use basalt_sample::{Sample, Signal, SignalData, SignalList, SignalType, SignalValue};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::{Hook, HookError, HookReason};

/// Appends one float channel carrying the mean of the selected signals.
pub struct AverageHook {
    names: Vec<String>,
    /// Resolved input indexes and the output slot, fixed at prepare.
    indexes: Vec<usize>,
    out_index: usize,
}

#[derive(Deserialize)]
struct AverageConfig {
    signals: Vec<String>,
}

impl AverageHook {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            indexes: Vec::new(),
            out_index: 0,
        }
    }
}

impl Default for AverageHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for AverageHook {
    fn name(&self) -> &'static str {
        "average"
    }

    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: AverageConfig = basalt_config::from_value(cfg)?;
        if cfg.signals.is_empty() {
            return Err(ConfigError::invalid("signals", "select at least one signal"));
        }
        self.names = cfg.signals;
        Ok(())
    }

    fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>, HookError> {
        self.indexes.clear();
        for name in &self.names {
            let idx = signals.index_of(name).ok_or_else(|| HookError::Failed {
                hook: "average",
                reason: format!("no signal named '{name}'"),
            })?;
            self.indexes.push(idx);
        }

        // Grow the list by one: the averaged channel rides at the end.
        let mut reshaped = (*signals).clone();
        self.out_index = reshaped.len();
        reshaped.push(Arc::new(Signal::new(
            format!("average({})", self.names.join(",")),
            "",
            SignalType::Float,
        )));

        Ok(Arc::new(reshaped))
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        if self.out_index >= smp.capacity() {
            return HookReason::Ok;
        }

        let mut sum = 0.0;
        let mut n = 0usize;
        for &idx in &self.indexes {
            if idx >= smp.len() {
                continue;
            }
            let v = match smp.data()[idx].get(smp.signal_type(idx)) {
                SignalValue::Float(f) => f,
                SignalValue::Integer(i) => i as f64,
                SignalValue::Boolean(b) => b as u8 as f64,
                SignalValue::Complex(re, _) => re as f64,
            };
            sum += v;
            n += 1;
        }

        let mean = if n > 0 { sum / n as f64 } else { 0.0 };
        smp.data_mut()[self.out_index] = SignalData::float(mean);
        smp.set_len(smp.len().max(self.out_index + 1));
        HookReason::Ok
    }
}

/// Rewrites one channel's descriptor (type, name, unit) and converts its
/// values with the usual numeric cast rules.
pub struct CastHook {
    signal: String,
    new_type: Option<SignalType>,
    new_name: Option<String>,
    new_unit: Option<String>,
    /// Resolved at prepare.
    index: usize,
    old_type: SignalType,
}

#[derive(Deserialize)]
struct CastConfig {
    signal: String,
    #[serde(default)]
    new_type: Option<String>,
    #[serde(default)]
    new_name: Option<String>,
    #[serde(default)]
    new_unit: Option<String>,
}

impl CastHook {
    pub fn new() -> Self {
        Self {
            signal: String::new(),
            new_type: None,
            new_name: None,
            new_unit: None,
            index: 0,
            old_type: SignalType::Float,
        }
    }
}

impl Default for CastHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for CastHook {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: CastConfig = basalt_config::from_value(cfg)?;

        self.new_type = match &cfg.new_type {
            Some(s) => Some(
                SignalType::from_str(s)
                    .ok_or_else(|| ConfigError::unknown("signal type", s.clone()))?,
            ),
            None => None,
        };

        if self.new_type.is_none() && cfg.new_name.is_none() && cfg.new_unit.is_none() {
            return Err(ConfigError::invalid(
                "cast",
                "set at least one of new_type, new_name, new_unit",
            ));
        }

        self.signal = cfg.signal;
        self.new_name = cfg.new_name;
        self.new_unit = cfg.new_unit;
        Ok(())
    }

    fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>, HookError> {
        let index = signals.index_of(&self.signal).ok_or_else(|| HookError::Failed {
            hook: "cast",
            reason: format!("no signal named '{}'", self.signal),
        })?;

        let old = &signals[index];
        self.index = index;
        self.old_type = old.ty;

        let mut replacement = Signal::new(
            self.new_name.clone().unwrap_or_else(|| old.name.clone()),
            self.new_unit.clone().unwrap_or_else(|| old.unit.clone()),
            self.new_type.unwrap_or(old.ty),
        );
        replacement.init = old.init.cast(old.ty, replacement.ty);

        let mut reshaped = (*signals).clone();
        reshaped.set(index, Arc::new(replacement));
        Ok(Arc::new(reshaped))
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        if let Some(to) = self.new_type {
            if self.index < smp.len() {
                let value = smp.data()[self.index];
                smp.data_mut()[self.index] = value.cast(self.old_type, to);
            }
        }
        HookReason::Ok
    }
}
