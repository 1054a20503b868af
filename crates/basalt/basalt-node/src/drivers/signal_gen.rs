//! Synthetic waveform generator.
//!
//! Produces samples at a fixed rate from a timer descriptor, which makes
//! it a natural citizen of polled paths. The signal list is defined by
//! the driver itself (`PROVIDES_SIGNALS`): one float channel per
//! configured waveform.

use basalt_config::ConfigError;
use basalt_icc::SampleBox;
use basalt_sample::{SampleFlags, Signal, SignalData, SignalList, SignalType};
use basalt_util::{TimeSpec, TimerFd};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::Value;
use std::os::unix::io::RawFd;

use crate::NodeError;
use crate::node::{DriverContext, NodeDriver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Wave {
    Sine,
    Square,
    Triangle,
    Ramp,
    Counter,
    Random,
    Constant,
}

impl Wave {
    fn from_str(s: &str) -> Result<Wave, ConfigError> {
        match s {
            "sine" => Ok(Wave::Sine),
            "square" => Ok(Wave::Square),
            "triangle" => Ok(Wave::Triangle),
            "ramp" => Ok(Wave::Ramp),
            "counter" => Ok(Wave::Counter),
            "random" => Ok(Wave::Random),
            "constant" => Ok(Wave::Constant),
            other => Err(ConfigError::unknown("signal type", other)),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Wave::Sine => "sine",
            Wave::Square => "square",
            Wave::Triangle => "triangle",
            Wave::Ramp => "ramp",
            Wave::Counter => "counter",
            Wave::Random => "random",
            Wave::Constant => "constant",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignalConfig {
    #[serde(default)]
    signal: Option<Value>,
    #[serde(default)]
    values: Option<usize>,
    #[serde(default = "defaults::rate")]
    rate: f64,
    #[serde(default = "defaults::frequency")]
    frequency: f64,
    #[serde(default = "defaults::amplitude")]
    amplitude: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default = "defaults::stddev")]
    stddev: f64,
    #[serde(default)]
    limit: Option<u64>,
}

mod defaults {
    pub fn rate() -> f64 {
        10.0
    }

    pub fn frequency() -> f64 {
        1.0
    }

    pub fn amplitude() -> f64 {
        1.0
    }

    pub fn stddev() -> f64 {
        0.2
    }
}

pub struct SignalDriver {
    waves: Vec<Wave>,
    rate: f64,
    frequency: f64,
    amplitude: f64,
    offset: f64,
    stddev: f64,
    limit: Option<u64>,

    timer: Option<TimerFd>,
    counter: u64,
    rng: StdRng,
}

impl SignalDriver {
    pub fn new() -> Self {
        Self {
            waves: vec![Wave::Sine],
            rate: defaults::rate(),
            frequency: defaults::frequency(),
            amplitude: defaults::amplitude(),
            offset: 0.0,
            stddev: defaults::stddev(),
            limit: None,
            timer: None,
            counter: 0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Standard-normal draw via Box-Muller.
    fn gauss(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn value(&mut self, wave: Wave, t: f64) -> f64 {
        use std::f64::consts::TAU;

        match wave {
            Wave::Sine => self.offset + self.amplitude * (TAU * self.frequency * t).sin(),
            Wave::Square => {
                let s = (TAU * self.frequency * t).sin();
                self.offset + self.amplitude * if s >= 0.0 { 1.0 } else { -1.0 }
            }
            Wave::Triangle => {
                let phase = (t * self.frequency).fract();
                self.offset + self.amplitude * (1.0 - 4.0 * (phase - 0.5).abs())
            }
            Wave::Ramp => {
                let phase = (t * self.frequency).fract();
                self.offset + self.amplitude * phase
            }
            Wave::Counter => self.counter as f64,
            Wave::Random => {
                let g = self.gauss();
                self.offset + self.stddev * g
            }
            Wave::Constant => self.offset,
        }
    }

    fn emit(&mut self, smp: &mut SampleBox) {
        let t = self.counter as f64 / self.rate;

        let len = self.waves.len().min(smp.capacity());
        for i in 0..len {
            let v = self.value(self.waves[i], t);
            smp.data_mut()[i] = SignalData::float(v);
        }
        smp.set_len(len);

        smp.sequence = self.counter;
        smp.ts.origin = TimeSpec::now();
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA;

        self.counter += 1;
    }
}

impl Default for SignalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDriver for SignalDriver {
    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: SignalConfig = basalt_config::from_value(cfg)?;

        let mut waves = match &cfg.signal {
            None => vec![Wave::Sine],
            Some(Value::String(s)) => vec![Wave::from_str(s)?],
            Some(Value::Array(list)) => {
                let mut waves = Vec::new();
                for entry in list {
                    let s = entry.as_str().ok_or_else(|| {
                        ConfigError::invalid("signal", "array entries must be type names")
                    })?;
                    waves.push(Wave::from_str(s)?);
                }
                waves
            }
            Some(_) => {
                return Err(ConfigError::invalid(
                    "signal",
                    "expected a type name or an array of them",
                ));
            }
        };

        // A scalar `signal` plus `values` replicates the waveform.
        if let Some(values) = cfg.values {
            if values == 0 {
                return Err(ConfigError::invalid("values", "must be at least 1"));
            }
            if waves.len() == 1 && values > 1 {
                waves = vec![waves[0]; values];
            } else if waves.len() != values {
                return Err(ConfigError::invalid(
                    "values",
                    "contradicts the length of 'signal'",
                ));
            }
        }

        if cfg.rate <= 0.0 {
            return Err(ConfigError::invalid("rate", "must be positive"));
        }

        self.waves = waves;
        self.rate = cfg.rate;
        self.frequency = cfg.frequency;
        self.amplitude = cfg.amplitude;
        self.offset = cfg.offset;
        self.stddev = cfg.stddev;
        self.limit = cfg.limit;
        Ok(())
    }

    fn start(&mut self, _ctx: &DriverContext) -> Result<(), NodeError> {
        let timer = TimerFd::new()?;
        timer.set_rate(self.rate)?;
        self.timer = Some(timer);
        self.counter = 0;
        self.rng = StdRng::seed_from_u64(basalt_util::now_ns());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        if let Some(timer) = self.timer.take() {
            let _ = timer.stop();
        }
        Ok(())
    }

    fn read(&mut self, smps: &mut [SampleBox]) -> Result<usize, NodeError> {
        if let Some(limit) = self.limit {
            if self.counter >= limit {
                return Err(NodeError::Stopping);
            }
        }

        let Some(timer) = self.timer.as_ref() else {
            return Err(NodeError::driver("signal node not started"));
        };

        let due = timer.expirations() as usize;
        if due == 0 {
            return Ok(0);
        }

        let mut budget = due.min(smps.len());
        if let Some(limit) = self.limit {
            budget = budget.min((limit - self.counter) as usize);
        }

        for smp in smps.iter_mut().take(budget) {
            self.emit(smp);
        }

        Ok(budget)
    }

    fn write(&mut self, _smps: &[SampleBox]) -> Result<usize, NodeError> {
        Err(NodeError::Unsupported)
    }

    fn poll_fds(&self) -> Vec<RawFd> {
        match &self.timer {
            Some(timer) => vec![timer.fd()],
            None => Vec::new(),
        }
    }

    fn provided_signals(&self) -> Option<SignalList> {
        use std::collections::HashMap;

        let mut total: HashMap<&'static str, usize> = HashMap::new();
        for w in &self.waves {
            *total.entry(w.as_str()).or_insert(0) += 1;
        }

        // Duplicate waveforms get a numeric suffix, unique ones keep the
        // bare name.
        let mut seen: HashMap<&'static str, usize> = HashMap::new();
        let sigs = self
            .waves
            .iter()
            .map(|w| {
                let name = if total[w.as_str()] > 1 {
                    let i = seen.entry(w.as_str()).or_insert(0);
                    let name = format!("{}{}", w.as_str(), *i);
                    *i += 1;
                    name
                } else {
                    w.as_str().to_string()
                };
                std::sync::Arc::new(Signal::new(name, "", SignalType::Float))
            })
            .collect();
        Some(SignalList::from_signals(sigs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_icc::{PoolConfig, SamplePool};

    fn ctx() -> DriverContext {
        DriverContext {
            in_signals: SignalList::empty(),
            out_signals: SignalList::empty(),
        }
    }

    fn driver(cfg: serde_json::Value) -> SignalDriver {
        let mut d = SignalDriver::new();
        d.parse(&cfg).unwrap();
        d
    }

    #[test]
    fn provides_one_channel_per_waveform() {
        let d = driver(serde_json::json!({ "signal": ["sine", "counter"] }));
        let signals = d.provided_signals().unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].name, "sine");
        assert_eq!(signals[1].name, "counter");
    }

    #[test]
    fn values_replicates_a_scalar_signal() {
        let d = driver(serde_json::json!({ "signal": "sine", "values": 3 }));
        assert_eq!(d.provided_signals().unwrap().len(), 3);
        assert_eq!(d.provided_signals().unwrap()[1].name, "sine1");
    }

    #[test]
    fn contradictory_values_rejected() {
        let mut d = SignalDriver::new();
        assert!(
            d.parse(&serde_json::json!({ "signal": ["sine", "ramp"], "values": 3 }))
                .is_err()
        );
    }

    #[test]
    fn waveform_math_is_deterministic() {
        let mut d = driver(serde_json::json!({
            "signal": "sine",
            "rate": 4.0,
            "frequency": 1.0,
            "amplitude": 2.0,
            "offset": 1.0,
        }));

        // Quarter-period points of a 1 Hz sine at 4 Hz sampling.
        d.counter = 1;
        assert!((d.value(Wave::Sine, 0.25) - 3.0).abs() < 1e-12);
        assert!((d.value(Wave::Sine, 0.0) - 1.0).abs() < 1e-12);
        assert!((d.value(Wave::Ramp, 0.5) - 2.0).abs() < 1e-12);
        assert!((d.value(Wave::Triangle, 0.5) - 3.0).abs() < 1e-12);
        assert!((d.value(Wave::Counter, 0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn produces_at_the_configured_rate() {
        let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();
        let mut d = driver(serde_json::json!({ "signal": "counter", "rate": 1000.0 }));
        d.start(&ctx()).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(300);
        let mut got = 0usize;
        while std::time::Instant::now() < deadline && got < 100 {
            let mut smps = Vec::new();
            pool.acquire_many(&mut smps, 32);
            match d.read(&mut smps) {
                Ok(n) => {
                    if n > 0 {
                        assert_eq!(smps[0].sequence as usize, got);
                    }
                    got += n;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert!(got >= 100, "expected at least 100 samples, got {got}");
        d.stop().unwrap();
    }

    #[test]
    fn limit_requests_shutdown() {
        let pool = SamplePool::new(&PoolConfig::heap(16, 4)).unwrap();
        let mut d = driver(serde_json::json!({
            "signal": "counter",
            "rate": 10000.0,
            "limit": 5,
        }));
        d.start(&ctx()).unwrap();

        let mut total = 0;
        loop {
            let mut smps = Vec::new();
            pool.acquire_many(&mut smps, 8);
            match d.read(&mut smps) {
                Ok(n) => total += n,
                Err(NodeError::Stopping) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert_eq!(total, 5);
    }
}
