use basalt_config::ConfigError;
use basalt_hook::{HookChain, HookContext};
use basalt_icc::{SampleBox, SamplePool, SignalledQueue};
use basalt_sample::SignalList;
use basalt_stats::{Metric, Stats};
use basalt_util::State;
use serde::Deserialize;
use serde_json::Value;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::NodeError;
use crate::factory::{FactoryFlags, NodeRegistry};

/// Signal lists a driver sees when it opens its endpoint. Built at
/// `start`, after paths had their chance to shape the output side.
pub struct DriverContext {
    pub in_signals: Arc<SignalList>,
    pub out_signals: Arc<SignalList>,
}

/// The driver half of a node: everything specific to one endpoint type.
///
/// Drivers are single-threaded from their own point of view; the owning
/// [`Node`] serializes access. `read`/`write` must never block longer
/// than one batch worth of I/O and signal backpressure by short counts.
pub trait NodeDriver: Send {
    fn parse(&mut self, _cfg: &Value) -> Result<(), ConfigError> {
        Ok(())
    }

    fn check(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Allocate queues and pools; no I/O yet.
    fn prepare(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Open endpoints, arm timers.
    fn start(&mut self, _ctx: &DriverContext) -> Result<(), NodeError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Fills the provided fresh samples; returns how many were produced.
    /// `Ok(0)` means no data right now, try again.
    fn read(&mut self, smps: &mut [SampleBox]) -> Result<usize, NodeError>;

    /// Accepts a batch; a short count signals backpressure.
    fn write(&mut self, smps: &[SampleBox]) -> Result<usize, NodeError>;

    fn poll_fds(&self) -> Vec<RawFd> {
        Vec::new()
    }

    fn netem_fds(&self) -> Vec<RawFd> {
        Vec::new()
    }

    fn reverse(&mut self) -> Result<(), NodeError> {
        Err(NodeError::Unsupported)
    }

    /// For drivers that define their own signal list
    /// (`FactoryFlags::PROVIDES_SIGNALS`).
    fn provided_signals(&self) -> Option<SignalList> {
        None
    }
}

/// Per-direction node state.
pub struct Direction {
    pub vectorize: usize,
    pub builtin: bool,
    pub signals: Arc<SignalList>,
    pub hooks: HookChain,
    /// Egress shaping config, kept opaque for the external collaborator.
    pub netem: Option<Value>,
}

impl Direction {
    fn new() -> Self {
        Self {
            vectorize: 1,
            builtin: true,
            signals: SignalList::empty(),
            hooks: HookChain::new(),
            netem: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct DirectionConfig {
    #[serde(default)]
    vectorize: Option<usize>,
    #[serde(default)]
    signals: Option<Value>,
    #[serde(default)]
    hooks: Option<Value>,
    #[serde(default)]
    builtin: Option<bool>,
    #[serde(default)]
    netem: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NodeConfig {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default = "defaults::enabled")]
    enabled: bool,
    #[serde(rename = "in", default)]
    input: Option<DirectionConfig>,
    #[serde(rename = "out", default)]
    output: Option<DirectionConfig>,
}

mod defaults {
    pub fn enabled() -> bool {
        true
    }
}

struct NodeInner {
    state: State,
    driver: Box<dyn NodeDriver>,
    input: Direction,
    output: Direction,
}

/// Which paths are wired to this node.
#[derive(Default)]
struct Wiring {
    /// The single path whose worker reads this node.
    master: Option<Uuid>,
    /// Queues feeding further paths that share this node's samples.
    fanout: Vec<Arc<SignalledQueue>>,
    /// The single path writing to this node.
    writer: Option<Uuid>,
}

/// One endpoint of the graph.
pub struct Node {
    name: String,
    uuid: Uuid,
    kind: &'static str,
    enabled: bool,
    flags: u32,
    stats: Arc<Stats>,
    inner: Mutex<NodeInner>,
    wiring: Mutex<Wiring>,
}

impl Node {
    /// Parses one entry of the `nodes` config table.
    pub fn parse(
        name: &str,
        cfg: &Value,
        sn_uuid: Uuid,
        registry: &NodeRegistry,
    ) -> Result<Arc<Node>, ConfigError> {
        let common: NodeConfig = basalt_config::from_value(cfg)?;

        let factory = registry
            .lookup(&common.ty)
            .ok_or_else(|| ConfigError::unknown("node type", common.ty.clone()))?;

        let mut driver = (factory.make)();
        driver.parse(cfg)?;

        let uuid = match &common.uuid {
            Some(s) => Uuid::parse_str(s)
                .map_err(|e| ConfigError::invalid("uuid", e.to_string()))?,
            None => {
                // Same config, same supervisor, same identity.
                let canonical = format!("{name}:{}", serde_json::to_string(cfg)?);
                Uuid::new_v5(&sn_uuid, canonical.as_bytes())
            }
        };

        let stats = Arc::new(Stats::new());
        let ctx = HookContext::new(stats.clone());

        let mut input = Direction::new();
        let mut output = Direction::new();

        if let Some(dcfg) = &common.input {
            apply_direction(&mut input, dcfg, &ctx)?;
        }
        if let Some(dcfg) = &common.output {
            apply_direction(&mut output, dcfg, &ctx)?;
        }

        // Ingress header repair and statistics are part of the contract
        // unless explicitly disabled.
        if input.builtin {
            for hook_name in ["fix", "stats"] {
                if !input.hooks.has(hook_name) {
                    let (hook, priority) = basalt_hook::make(hook_name, &ctx)?;
                    input.hooks.add(hook, priority);
                }
            }
        }

        Ok(Arc::new(Node {
            name: name.to_string(),
            uuid,
            kind: factory.name,
            enabled: common.enabled,
            flags: factory.flags,
            stats,
            inner: Mutex::new(NodeInner {
                state: State::Parsed,
                driver,
                input,
                output,
            }),
            wiring: Mutex::new(Wiring::default()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Decorated name for logs: `name(type)`.
    pub fn name_full(&self) -> String {
        format!("{}({})", self.name, self.kind)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn supports(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    /// Input signal shape as the path engine sees it: after the ingress
    /// hook chain, once prepared.
    pub fn input_signals(&self) -> Arc<SignalList> {
        let inner = self.inner.lock().unwrap();
        inner
            .input
            .hooks
            .signals()
            .unwrap_or_else(|| inner.input.signals.clone())
    }

    pub fn output_signals(&self) -> Arc<SignalList> {
        self.inner.lock().unwrap().output.signals.clone()
    }

    pub fn input_vectorize(&self) -> usize {
        self.inner.lock().unwrap().input.vectorize.max(1)
    }

    pub fn output_vectorize(&self) -> usize {
        self.inner.lock().unwrap().output.vectorize.max(1)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, State::Parsed, "check() out of order");
        inner.driver.check()?;
        inner.state = State::Checked;
        Ok(())
    }

    pub fn prepare(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Checked {
            return Err(NodeError::InvalidState(inner.state));
        }

        if self.flags & FactoryFlags::PROVIDES_SIGNALS != 0 {
            if let Some(signals) = inner.driver.provided_signals() {
                inner.input.signals = Arc::new(signals);
            }
        } else if inner.input.signals.is_empty() {
            // Unspecified inputs default to a generous float window.
            inner.input.signals = Arc::new(SignalList::floats(64));
        }

        let in_signals = inner.input.signals.clone();
        inner
            .input
            .hooks
            .prepare(in_signals)
            .map_err(|e| NodeError::driver(e.to_string()))?;

        inner.driver.prepare()?;
        inner.state = State::Prepared;

        debug!(
            "prepared node {name} ({kind}): signals=[{desc}]",
            name = self.name,
            kind = self.kind,
            desc = self.input_signals_of(&inner).describe()
        );
        Ok(())
    }

    fn input_signals_of(&self, inner: &NodeInner) -> Arc<SignalList> {
        inner
            .input
            .hooks
            .signals()
            .unwrap_or_else(|| inner.input.signals.clone())
    }

    /// Called by the destination path once its output shape is known,
    /// before `start`.
    pub fn prepare_output(&self, signals: Arc<SignalList>) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.output.signals = signals.clone();
        inner
            .output
            .hooks
            .prepare(signals)
            .map_err(|e| NodeError::driver(e.to_string()))?;
        Ok(())
    }

    pub fn start(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Prepared | State::Stopped => {}
            s => return Err(NodeError::InvalidState(s)),
        }

        let ctx = DriverContext {
            in_signals: inner.input.signals.clone(),
            out_signals: inner.output.signals.clone(),
        };

        inner
            .input
            .hooks
            .start()
            .map_err(|e| NodeError::driver(e.to_string()))?;
        inner
            .output
            .hooks
            .start()
            .map_err(|e| NodeError::driver(e.to_string()))?;
        inner.driver.start(&ctx)?;
        inner.state = State::Started;

        info!("started node {name}", name = self.name_full());
        Ok(())
    }

    pub fn stop(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Started | State::Paused | State::Stopping => {}
            _ => return Ok(()),
        }

        inner.driver.stop()?;
        inner.output.hooks.stop();
        inner.input.hooks.stop();
        inner.state = State::Stopped;

        info!("stopped node {name}", name = self.name);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Started {
            return Err(NodeError::InvalidState(inner.state));
        }
        inner.driver.pause()?;
        inner.state = State::Paused;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Paused {
            return Err(NodeError::InvalidState(inner.state));
        }
        inner.driver.resume()?;
        inner.state = State::Started;
        Ok(())
    }

    pub fn restart(&self) -> Result<(), NodeError> {
        self.stop()?;
        self.start()
    }

    /// Flags the node as winding down without tearing the driver yet; a
    /// fatal read error uses this so other paths drain cleanly.
    pub fn request_stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Started || inner.state == State::Paused {
            inner.state = State::Stopping;
        }
    }

    /// Reads a batch into freshly acquired samples and runs the ingress
    /// hook chain. `smps` arrives full of writable samples and leaves
    /// holding only the survivors.
    pub fn read(&self, smps: &mut Vec<SampleBox>) -> Result<usize, NodeError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Started => {}
            State::Stopping | State::Stopped => return Err(NodeError::Stopping),
            s => return Err(NodeError::InvalidState(s)),
        }

        let produced = inner.driver.read(smps)?;
        smps.truncate(produced);

        if produced > 0 {
            let signals = self.input_signals_of(&inner);
            for smp in smps.iter_mut() {
                if smp.signals().is_empty() {
                    smp.set_signals(signals.clone());
                }
            }

            inner
                .input
                .hooks
                .process(smps)
                .map_err(|e| NodeError::driver(e.to_string()))?;
        }

        Ok(smps.len())
    }

    /// Runs the egress hook chain and hands the batch to the driver in
    /// `out.vectorize`-sized slices. Shared samples are unshared through
    /// `scratch` before any mutating hook sees them.
    pub fn write(
        &self,
        smps: &mut Vec<SampleBox>,
        scratch: Option<&SamplePool>,
    ) -> Result<usize, NodeError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Started => {}
            State::Stopping | State::Stopped => return Err(NodeError::Stopping),
            s => return Err(NodeError::InvalidState(s)),
        }

        if !inner.output.hooks.is_empty() {
            let mut i = 0;
            while i < smps.len() {
                if smps[i].is_unique() {
                    i += 1;
                    continue;
                }
                let ok = scratch
                    .and_then(|pool| smps[i].make_unique(pool).map(|_| ()))
                    .is_some();
                if ok {
                    i += 1;
                } else {
                    self.stats.count(Metric::PoolUnderrun);
                    smps.remove(i);
                }
            }

            inner
                .output
                .hooks
                .process(smps)
                .map_err(|e| NodeError::driver(e.to_string()))?;
        }

        let vectorize = inner.output.vectorize.max(1);
        let mut written = 0;
        while written < smps.len() {
            let hi = (written + vectorize).min(smps.len());
            let chunk = hi - written;
            let accepted = inner.driver.write(&smps[written..hi])?;
            written += accepted;
            if accepted < chunk {
                // Short write: the endpoint is backpressuring.
                break;
            }
        }

        Ok(written)
    }

    pub fn poll_fds(&self) -> Vec<RawFd> {
        self.inner.lock().unwrap().driver.poll_fds()
    }

    pub fn netem_fds(&self) -> Vec<RawFd> {
        self.inner.lock().unwrap().driver.netem_fds()
    }

    /// Swaps the two directions, for pipe-style testing.
    pub fn reverse(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Started {
            return Err(NodeError::InvalidState(inner.state));
        }

        inner.driver.reverse()?;
        let inner = &mut *inner;
        std::mem::swap(&mut inner.input, &mut inner.output);
        Ok(())
    }

    // Path wiring ------------------------------------------------------

    /// Claims the read side for a path. The first caller becomes the
    /// master and owns the node's read pump; later paths attach through
    /// fan-out queues.
    pub fn claim_master(&self, path: Uuid) -> bool {
        let mut wiring = self.wiring.lock().unwrap();
        match wiring.master {
            None => {
                wiring.master = Some(path);
                true
            }
            Some(existing) => existing == path,
        }
    }

    pub fn add_fanout(&self, queue: Arc<SignalledQueue>) {
        self.wiring.lock().unwrap().fanout.push(queue);
    }

    /// Snapshot of the fan-out set, taken by the master worker at start.
    pub fn fanout(&self) -> Vec<Arc<SignalledQueue>> {
        self.wiring.lock().unwrap().fanout.clone()
    }

    /// Claims the write side; every node accepts at most one writing
    /// path.
    pub fn claim_writer(&self, path: Uuid) -> Result<(), ConfigError> {
        let mut wiring = self.wiring.lock().unwrap();
        match wiring.writer {
            None => {
                wiring.writer = Some(path);
                Ok(())
            }
            Some(p) if p == path => Ok(()),
            Some(_) => Err(ConfigError::invalid(
                "out",
                format!("node '{}' is already written to by another path", self.name),
            )),
        }
    }

    /// Clears path wiring so the graph can be re-prepared after a stop.
    pub fn reset_wiring(&self) {
        let mut wiring = self.wiring.lock().unwrap();
        wiring.master = None;
        wiring.writer = None;
        wiring.fanout.clear();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({}, type={}, uuid={})", self.name, self.kind, self.uuid)
    }
}

fn apply_direction(
    dir: &mut Direction,
    cfg: &DirectionConfig,
    ctx: &HookContext,
) -> Result<(), ConfigError> {
    if let Some(v) = cfg.vectorize {
        if v == 0 {
            return Err(ConfigError::invalid("vectorize", "must be at least 1"));
        }
        dir.vectorize = v;
    }

    if let Some(signals) = &cfg.signals {
        dir.signals = Arc::new(SignalList::parse(signals)?);
    }

    if let Some(hooks) = &cfg.hooks {
        dir.hooks.parse(hooks, ctx)?;
    }

    if let Some(builtin) = cfg.builtin {
        dir.builtin = builtin;
    }

    dir.netem = cfg.netem.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_builtins()
    }

    fn parse(name: &str, cfg: Value) -> Arc<Node> {
        Node::parse(name, &cfg, Uuid::nil(), &registry()).unwrap()
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Node::parse(
            "n1",
            &json!({ "type": "quantum-tunnel" }),
            Uuid::nil(),
            &registry(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn uuid_derivation_is_deterministic() {
        let cfg = json!({ "type": "loopback", "queuelen": 64 });
        let a = parse("n1", cfg.clone());
        let b = parse("n1", cfg.clone());
        let c = parse("n2", cfg);

        assert_eq!(a.uuid(), b.uuid());
        assert_ne!(a.uuid(), c.uuid());
    }

    #[test]
    fn explicit_uuid_wins() {
        let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let node = parse("n1", json!({ "type": "loopback", "uuid": id }));
        assert_eq!(node.uuid().to_string(), id);
    }

    #[test]
    fn signals_parse_into_the_input_direction() {
        let node = parse(
            "n1",
            json!({
                "type": "loopback",
                "in": { "vectorize": 8, "signals": "2f1i" },
            }),
        );
        node.check().unwrap();
        node.prepare().unwrap();

        assert_eq!(node.input_vectorize(), 8);
        assert_eq!(node.input_signals().len(), 3);
    }

    #[test]
    fn unspecified_signals_default_to_float_window() {
        let node = parse("n1", json!({ "type": "loopback" }));
        node.check().unwrap();
        node.prepare().unwrap();
        assert_eq!(node.input_signals().len(), 64);
    }

    #[test]
    fn lifecycle_enforces_order() {
        let node = parse("n1", json!({ "type": "loopback" }));
        assert!(matches!(node.start(), Err(NodeError::InvalidState(_))));

        node.check().unwrap();
        node.prepare().unwrap();
        node.start().unwrap();
        assert_eq!(node.state(), State::Started);

        node.pause().unwrap();
        assert_eq!(node.state(), State::Paused);
        node.resume().unwrap();

        node.stop().unwrap();
        assert_eq!(node.state(), State::Stopped);

        // Stopped nodes may start again.
        node.start().unwrap();
        node.stop().unwrap();
    }

    #[test]
    fn master_claim_is_exclusive() {
        let node = parse("n1", json!({ "type": "loopback" }));
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();

        assert!(node.claim_master(p1));
        assert!(node.claim_master(p1));
        assert!(!node.claim_master(p2));
    }

    #[test]
    fn single_writer_enforced() {
        let node = parse("n1", json!({ "type": "loopback" }));
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();

        node.claim_writer(p1).unwrap();
        assert!(node.claim_writer(p2).is_err());
    }

    #[test]
    fn reverse_swaps_directions() {
        let node = parse(
            "n1",
            json!({
                "type": "loopback",
                "in": { "vectorize": 4 },
                "out": { "vectorize": 9 },
            }),
        );
        node.reverse().unwrap();
        assert_eq!(node.input_vectorize(), 9);
        assert_eq!(node.output_vectorize(), 4);

        node.reverse().unwrap();
        assert_eq!(node.input_vectorize(), 4);
        assert_eq!(node.output_vectorize(), 9);
    }
}
