//! Configurable sample transformations: linear scaling, decimation,
//! warm-up skipping and rate limiting.

use basalt_config::ConfigError;
use basalt_sample::{Sample, SampleFlags, SignalData, SignalList, SignalType};
use basalt_util::TimeSpec;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::{Hook, HookError, HookReason};

/// `y = scale * x + offset` over one signal or every numeric signal.
pub struct ScaleHook {
    scale: f64,
    offset: f64,
    signal: Option<String>,
    /// Resolved during prepare; `None` applies to all numeric signals.
    index: Option<usize>,
}

#[derive(Deserialize)]
struct ScaleConfig {
    #[serde(default = "defaults::scale")]
    scale: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    signal: Option<String>,
}

mod defaults {
    pub fn scale() -> f64 {
        1.0
    }

    pub fn ratio() -> usize {
        1
    }

    pub fn mode() -> super::DecimateMode {
        super::DecimateMode::Keep
    }
}

impl ScaleHook {
    pub fn new() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
            signal: None,
            index: None,
        }
    }

    fn apply(&self, ty: SignalType, value: SignalData) -> SignalData {
        match ty {
            SignalType::Float => SignalData::float(value.as_float() * self.scale + self.offset),
            SignalType::Integer => {
                SignalData::integer((value.as_int() as f64 * self.scale + self.offset) as i64)
            }
            _ => value,
        }
    }
}

impl Default for ScaleHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for ScaleHook {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: ScaleConfig = basalt_config::from_value(cfg)?;
        self.scale = cfg.scale;
        self.offset = cfg.offset;
        self.signal = cfg.signal;
        Ok(())
    }

    fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>, HookError> {
        if let Some(name) = &self.signal {
            self.index = Some(signals.index_of(name).ok_or_else(|| HookError::Failed {
                hook: "scale",
                reason: format!("no signal named '{name}'"),
            })?);
        }
        Ok(signals)
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        match self.index {
            Some(i) if i < smp.len() => {
                let ty = smp.signal_type(i);
                smp.data_mut()[i] = self.apply(ty, smp.data()[i]);
            }
            Some(_) => {}
            None => {
                for i in 0..smp.len() {
                    let ty = smp.signal_type(i);
                    smp.data_mut()[i] = self.apply(ty, smp.data()[i]);
                }
            }
        }
        HookReason::Ok
    }
}

/// Thins the stream by a fixed ratio.
///
/// `mode = "keep"` (the default) keeps every `ratio`-th sample and drops
/// the rest, the classic downsampler. `mode = "drop"` is the complement:
/// it drops every `ratio`-th sample and passes the others, so ratio 3
/// over sequences 0..30 yields `0,1,3,4,6,...` with 20 survivors.
pub struct DecimateHook {
    ratio: usize,
    mode: DecimateMode,
    counter: usize,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecimateMode {
    Keep,
    Drop,
}

#[derive(Deserialize)]
struct DecimateConfig {
    #[serde(default = "defaults::ratio")]
    ratio: usize,
    #[serde(default = "defaults::mode")]
    mode: DecimateMode,
}

impl DecimateHook {
    pub fn new() -> Self {
        Self {
            ratio: 1,
            mode: DecimateMode::Keep,
            counter: 0,
        }
    }
}

impl Default for DecimateHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for DecimateHook {
    fn name(&self) -> &'static str {
        "decimate"
    }

    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: DecimateConfig = basalt_config::from_value(cfg)?;
        if cfg.ratio == 0 {
            return Err(ConfigError::invalid("ratio", "must be at least 1"));
        }
        self.ratio = cfg.ratio;
        self.mode = cfg.mode;
        Ok(())
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.counter = 0;
        Ok(())
    }

    fn process(&mut self, _smp: &mut Sample) -> HookReason {
        let slot = self.counter % self.ratio;
        self.counter += 1;

        let keep = match self.mode {
            DecimateMode::Keep => slot == 0,
            DecimateMode::Drop => slot != self.ratio - 1,
        };
        if keep {
            HookReason::Ok
        } else {
            HookReason::SkipSample
        }
    }
}

/// Swallows the first `samples` records or `seconds` of stream warm-up.
pub struct SkipFirstHook {
    samples: Option<u64>,
    seconds: Option<f64>,
    seen: u64,
    until: Option<TimeSpec>,
}

#[derive(Deserialize)]
struct SkipFirstConfig {
    #[serde(default)]
    samples: Option<u64>,
    #[serde(default)]
    seconds: Option<f64>,
}

impl SkipFirstHook {
    pub fn new() -> Self {
        Self {
            samples: None,
            seconds: None,
            seen: 0,
            until: None,
        }
    }
}

impl Default for SkipFirstHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for SkipFirstHook {
    fn name(&self) -> &'static str {
        "skip_first"
    }

    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: SkipFirstConfig = basalt_config::from_value(cfg)?;
        if cfg.samples.is_none() && cfg.seconds.is_none() {
            return Err(ConfigError::invalid(
                "skip_first",
                "set 'samples' or 'seconds'",
            ));
        }
        self.samples = cfg.samples;
        self.seconds = cfg.seconds;
        Ok(())
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.seen = 0;
        self.until = self
            .seconds
            .map(|s| TimeSpec::now().add(TimeSpec::from_f64(s)));
        Ok(())
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        if let Some(limit) = self.samples {
            if self.seen < limit {
                self.seen += 1;
                return HookReason::SkipSample;
            }
        }

        if let Some(until) = self.until {
            let t = if smp.flags.contains(SampleFlags::TS_RECEIVED) {
                smp.ts.received
            } else {
                TimeSpec::now()
            };
            if t.diff(until).sec < 0 {
                return HookReason::SkipSample;
            }
        }

        HookReason::Ok
    }
}

/// Drops samples arriving faster than `rate`.
pub struct LimitRateHook {
    period: f64,
    last: Option<TimeSpec>,
}

#[derive(Deserialize)]
struct LimitRateConfig {
    rate: f64,
}

impl LimitRateHook {
    pub fn new() -> Self {
        Self {
            period: 0.0,
            last: None,
        }
    }
}

impl Default for LimitRateHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for LimitRateHook {
    fn name(&self) -> &'static str {
        "limit_rate"
    }

    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: LimitRateConfig = basalt_config::from_value(cfg)?;
        if cfg.rate <= 0.0 {
            return Err(ConfigError::invalid("rate", "must be positive"));
        }
        self.period = 1.0 / cfg.rate;
        Ok(())
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.last = None;
        Ok(())
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        let t = if smp.flags.contains(SampleFlags::TS_RECEIVED) {
            smp.ts.received
        } else {
            TimeSpec::now()
        };

        if let Some(last) = self.last {
            if t.diff(last).to_f64() < self.period {
                return HookReason::SkipSample;
            }
        }

        self.last = Some(t);
        HookReason::Ok
    }
}
