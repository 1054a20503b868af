//! In-line sample processors.
//!
//! Hooks sit on node directions and on paths; a chain runs them in
//! priority order over every sample. A hook can pass a sample on, drop
//! it, cut the rest of the chain for it, or fail the whole path. Hooks
//! may reshape the signal list, but only during `prepare`; once the chain
//! is started the exposed output list is frozen until the next start.

use basalt_config::ConfigError;
use basalt_icc::SampleBox;
use basalt_sample::{Sample, SignalList};
use basalt_stats::Stats;
use serde_json::Value;
use std::sync::Arc;

pub mod builtin;
pub mod shape;
pub mod transform;

pub use builtin::{DropHook, FixHook, GuardHook, StatsHook};
pub use shape::{AverageHook, CastHook};
pub use transform::{DecimateHook, DecimateMode, LimitRateHook, ScaleHook, SkipFirstHook};

/// Outcome of processing one sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookReason {
    /// Pass the sample to the next hook.
    Ok,
    /// Drop the sample and release its reference.
    SkipSample,
    /// Emit the sample as-is, without running the remaining hooks.
    StopProcessing,
    /// Fail; the owning path goes faulty.
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook '{hook}' failed: {reason}")]
    Failed { hook: &'static str, reason: String },

    #[error("hook '{hook}' rejected a sample batch")]
    Process { hook: &'static str },
}

/// One sample processor.
///
/// `parse` receives the hook's JSON config; `prepare` sees the input
/// signal list and returns the (possibly reshaped) output list; `process`
/// is the per-sample hot path and must not allocate or block.
pub trait Hook: Send {
    fn name(&self) -> &'static str;

    fn parse(&mut self, _cfg: &Value) -> Result<(), ConfigError> {
        Ok(())
    }

    fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>, HookError> {
        Ok(signals)
    }

    fn start(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn stop(&mut self) {}

    /// Invoked on the supervisor's tick while the owner is running.
    fn periodic(&mut self) {}

    fn process(&mut self, smp: &mut Sample) -> HookReason;
}

/// What a chain hands to hooks that report somewhere: the owning
/// component's statistics table.
#[derive(Clone)]
pub struct HookContext {
    pub stats: Arc<Stats>,
}

impl HookContext {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self { stats }
    }
}

/// Builds a hook by type name, returning it with its default priority.
pub fn make(name: &str, ctx: &HookContext) -> Result<(Box<dyn Hook>, i32), ConfigError> {
    match name {
        "fix" => Ok((Box::new(FixHook::new()), 100)),
        "drop" => Ok((Box::new(DropHook::new(ctx.stats.clone())), 200)),
        "guard" => Ok((Box::new(GuardHook::new(ctx.stats.clone())), 300)),
        "stats" => Ok((Box::new(StatsHook::new(ctx.stats.clone())), 400)),
        "scale" => Ok((Box::new(ScaleHook::new()), 500)),
        "decimate" => Ok((Box::new(DecimateHook::new()), 500)),
        "skip_first" => Ok((Box::new(SkipFirstHook::new()), 500)),
        "limit_rate" => Ok((Box::new(LimitRateHook::new()), 500)),
        "average" => Ok((Box::new(AverageHook::new()), 500)),
        "cast" => Ok((Box::new(CastHook::new()), 500)),
        other => Err(ConfigError::unknown("hook", other)),
    }
}

struct HookSlot {
    priority: i32,
    /// Insertion order; ties in priority resolve first-added-first.
    order: usize,
    hook: Box<dyn Hook>,
}

/// Priority-ordered hook pipeline.
#[derive(Default)]
pub struct HookChain {
    slots: Vec<HookSlot>,
    signals: Option<Arc<SignalList>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether a hook of the given type is already installed.
    pub fn has(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.hook.name() == name)
    }

    pub fn add(&mut self, hook: Box<dyn Hook>, priority: i32) {
        let order = self.slots.len();
        self.slots.push(HookSlot {
            priority,
            order,
            hook,
        });
    }

    /// Parses the `hooks` array of a node direction or path. Entries are
    /// a bare type name or an object `{ "type": ..., "priority": ...,
    /// ...params }`.
    pub fn parse(&mut self, value: &Value, ctx: &HookContext) -> Result<(), ConfigError> {
        let entries = value
            .as_array()
            .ok_or_else(|| ConfigError::invalid("hooks", "expected an array"))?;

        for entry in entries {
            let (name, cfg) = match entry {
                Value::String(name) => (name.clone(), Value::Object(Default::default())),
                Value::Object(map) => {
                    let name = map
                        .get("type")
                        .and_then(Value::as_str)
                        .ok_or(ConfigError::Missing("type"))?
                        .to_string();
                    (name, entry.clone())
                }
                _ => {
                    return Err(ConfigError::invalid(
                        "hooks",
                        "entries are names or objects",
                    ));
                }
            };

            let (mut hook, default_priority) = make(&name, ctx)?;
            hook.parse(&cfg)?;

            let priority = cfg
                .get("priority")
                .and_then(Value::as_i64)
                .map(|p| p as i32)
                .unwrap_or(default_priority);

            self.add(hook, priority);
        }

        Ok(())
    }

    /// Installs the standard hook set (fix, drop, guard, stats) unless a
    /// hook of that type was configured explicitly.
    pub fn add_builtins(&mut self, ctx: &HookContext) {
        for name in ["fix", "drop", "guard", "stats"] {
            if self.slots.iter().any(|s| s.hook.name() == name) {
                continue;
            }
            // Names are known-good here.
            if let Ok((hook, priority)) = make(name, ctx) {
                self.add(hook, priority);
            }
        }
    }

    /// Sorts by priority and threads the signal list through every hook.
    pub fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>, HookError> {
        self.slots
            .sort_by_key(|slot| (slot.priority, slot.order));

        let mut signals = signals;
        for slot in &mut self.slots {
            signals = slot.hook.prepare(signals)?;
        }

        self.signals = Some(signals.clone());
        Ok(signals)
    }

    /// Output signal list after all hooks; input list if the chain is
    /// empty or unprepared.
    pub fn signals(&self) -> Option<Arc<SignalList>> {
        self.signals.clone()
    }

    pub fn start(&mut self) -> Result<(), HookError> {
        for slot in &mut self.slots {
            slot.hook.start()?;
        }
        Ok(())
    }

    /// Stops in reverse start order.
    pub fn stop(&mut self) {
        for slot in self.slots.iter_mut().rev() {
            slot.hook.stop();
        }
    }

    pub fn periodic(&mut self) {
        for slot in &mut self.slots {
            slot.hook.periodic();
        }
    }

    /// Runs the chain over a batch, compacting dropped samples out of the
    /// vector (their references are released on the spot). Returns the
    /// number of samples dropped.
    pub fn process(&mut self, smps: &mut Vec<SampleBox>) -> Result<usize, HookError> {
        if self.slots.is_empty() {
            return Ok(0);
        }

        let mut dropped = 0;
        let mut i = 0;

        'sample: while i < smps.len() {
            for slot in &mut self.slots {
                match slot.hook.process(&mut smps[i]) {
                    HookReason::Ok => continue,
                    HookReason::StopProcessing => break,
                    HookReason::SkipSample => {
                        smps.remove(i);
                        dropped += 1;
                        continue 'sample;
                    }
                    HookReason::Error => {
                        return Err(HookError::Process {
                            hook: slot.hook.name(),
                        });
                    }
                }
            }
            i += 1;
        }

        Ok(dropped)
    }
}
