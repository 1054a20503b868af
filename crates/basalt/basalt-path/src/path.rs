use basalt_config::ConfigError;
use basalt_hook::{HookChain, HookContext};
use basalt_icc::{ArenaKind, PoolConfig, SampleBox, SamplePool, SignalledQueue};
use basalt_mapping::Mapping;
use basalt_node::NodeList;
use basalt_sample::{SampleFlags, SignalList};
use basalt_stats::{Metric, Stats};
use basalt_util::fd::{poll, pollfd_read};
use basalt_util::{EventFd, State, TimeSpec, TimerFd, rt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::destination::PathDestination;
use crate::source::{PathSource, ReadOutcome};
use crate::PathError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Emit on every arriving sample.
    Any,
    /// Emit once every masked source contributed a fresh sample.
    All,
}

#[derive(Debug, Deserialize)]
struct PathConfig {
    #[serde(rename = "in")]
    input: Value,
    #[serde(default)]
    out: Option<Value>,
    #[serde(default)]
    hooks: Option<Value>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default = "defaults::yes")]
    enabled: bool,
    #[serde(default = "defaults::yes")]
    builtin: bool,
    #[serde(default)]
    reverse: bool,
    #[serde(default = "defaults::poll")]
    poll: i32,
    #[serde(default)]
    rate: f64,
    #[serde(default = "defaults::queuelen")]
    queuelen: usize,
    #[serde(default)]
    mask: Option<Vec<String>>,
    #[serde(default)]
    original_sequence_no: Option<bool>,
    #[serde(default)]
    affinity: u64,
}

mod defaults {
    pub fn yes() -> bool {
        true
    }

    pub fn poll() -> i32 {
        -1
    }

    pub fn queuelen() -> usize {
        1024
    }
}

/// Everything the worker thread owns. Built during `prepare`, moved into
/// the thread at `start` and handed back at `stop` so the path can start
/// again.
struct Worker {
    uuid: Uuid,
    mode: Mode,
    poll: bool,
    rate: f64,
    affinity: u64,

    sources: Vec<PathSource>,
    destinations: Vec<PathDestination>,
    hooks: HookChain,
    mapping: Mapping,
    pool: SamplePool,
    signals: Arc<SignalList>,

    mask: u64,
    arrived: u64,
    latest: Vec<Option<SampleBox>>,
    last_sample: Option<SampleBox>,
    seq_counter: u64,
    original_sequence_no: bool,
    /// Index of the designated sequence source (the first mapping
    /// source).
    seq_source: usize,

    timer: Option<TimerFd>,
    cancel: Arc<EventFd>,
    state: Arc<AtomicU8>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Stats>,

    read_buf: Vec<SampleBox>,
    hook_buf: Vec<SampleBox>,
    fired: Vec<usize>,
    last_tick: Instant,
}

impl Worker {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn run(&mut self) {
        if self.affinity != 0 {
            if let Err(e) = rt::set_thread_affinity(self.affinity) {
                warn!("path {}: failed to pin worker: {e}", self.uuid);
            }
        }

        self.arrived = 0;
        self.seq_counter = 0;
        self.latest.iter_mut().for_each(|slot| *slot = None);
        self.last_tick = Instant::now();

        for source in &mut self.sources {
            source.snapshot_fanout();
        }

        if let Err(e) = self.seed_last_sample() {
            error!("path {}: failed to seed initial sample: {e}", self.uuid);
            self.state.store(State::Stopped.to_u8(), Ordering::Release);
            return;
        }

        let result = if self.poll {
            self.run_poll()
        } else {
            self.run_single()
        };

        if let Err(e) = result {
            // A faulty path stops itself; the rest of the graph lives on.
            error!("path {} faulty: {e}", self.uuid);
        }

        for i in 0..self.destinations.len() {
            self.destinations[i].flush(&self.pool, &self.stats);
        }

        self.state.store(State::Stopped.to_u8(), Ordering::Release);
        debug!("path {} worker exited", self.uuid);
    }

    /// The initial output sample carries every signal's configured init
    /// value; a rate tick before the first real sample re-emits it.
    fn seed_last_sample(&mut self) -> Result<(), PathError> {
        let Some(mut smp) = self.pool.acquire() else {
            return Err(PathError::Setup("output pool underrun at start".into()));
        };

        smp.set_signals(self.signals.clone());
        let n = self.signals.len().min(smp.capacity());
        for i in 0..n {
            smp.data_mut()[i] = self.signals[i].init;
        }
        smp.set_len(n);

        smp.sequence = 0;
        smp.ts.origin = TimeSpec::now();
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN;
        if n > 0 {
            smp.flags.insert(SampleFlags::DATA);
        }

        self.last_sample = Some(smp);
        Ok(())
    }

    /// Optimized loop for a single source with no rate and no
    /// multiplexing: read, process, write, repeat.
    fn run_single(&mut self) -> Result<(), PathError> {
        while self.state() == State::Started {
            self.read_buf.clear();
            let outcome = self.sources[0].read(&mut self.read_buf)?;

            match outcome {
                ReadOutcome::Samples(_) => {
                    let batch = std::mem::take(&mut self.read_buf);
                    self.ingest(0, batch)?;
                }
                ReadOutcome::Idle => {
                    // Non-blocking sources spin otherwise.
                    std::thread::sleep(Duration::from_micros(100));
                }
                ReadOutcome::Finished { graceful } => {
                    if graceful {
                        self.shutdown.store(true, Ordering::Release);
                    }
                    break;
                }
            }

            for i in 0..self.destinations.len() {
                self.destinations[i].write(&self.pool, &self.stats)?;
            }

            self.maybe_periodic();
        }

        Ok(())
    }

    /// Full multiplexer: one poll(2) over all source descriptors, the
    /// rate timer and the cancellation fd.
    fn run_poll(&mut self) -> Result<(), PathError> {
        if self.rate > 0.0 {
            let timer = TimerFd::new()?;
            timer.set_rate(self.rate)?;
            self.timer = Some(timer);
        }

        // Slot map: -1 cancellation, -2 timer, otherwise a source index.
        let mut pfds = vec![pollfd_read(self.cancel.fd())];
        let mut slots: Vec<i32> = vec![-1];

        if let Some(timer) = &self.timer {
            pfds.push(pollfd_read(timer.fd()));
            slots.push(-2);
        }

        for (i, source) in self.sources.iter().enumerate() {
            let fds = source.fds();
            if fds.is_empty() {
                return Err(PathError::Setup(format!(
                    "source node '{}' provides no poll descriptor",
                    source.node().name()
                )));
            }
            for fd in fds {
                if fd < 0 {
                    return Err(PathError::Setup(format!(
                        "source node '{}' returned an invalid descriptor",
                        source.node().name()
                    )));
                }
                pfds.push(pollfd_read(fd));
                slots.push(i as i32);
            }
        }

        let mut active = self.sources.len();

        while self.state() == State::Started {
            for pfd in pfds.iter_mut() {
                pfd.revents = 0;
            }

            let n = poll(&mut pfds, 1000)?;
            if n == 0 {
                self.maybe_periodic();
                continue;
            }

            self.fired.clear();
            for (k, pfd) in pfds.iter().enumerate() {
                if pfd.revents & libc::POLLIN != 0 {
                    self.fired.push(k);
                }
            }

            let mut got_data = false;
            let mut timer_fired = false;

            let fired = std::mem::take(&mut self.fired);
            for &k in &fired {
                match slots[k] {
                    -1 => {
                        self.cancel.drain();
                    }
                    -2 => {
                        timer_fired = true;
                    }
                    idx => {
                        let idx = idx as usize;
                        self.read_buf.clear();
                        match self.sources[idx].read(&mut self.read_buf)? {
                            ReadOutcome::Samples(_) => {
                                let batch = std::mem::take(&mut self.read_buf);
                                got_data = true;
                                self.ingest(idx, batch)?;
                            }
                            ReadOutcome::Idle => {}
                            ReadOutcome::Finished { graceful } => {
                                // poll(2) ignores negative descriptors, so
                                // flipping the sign retires this slot.
                                pfds[k].fd = -pfds[k].fd.abs();
                                active -= 1;
                                if graceful {
                                    self.shutdown.store(true, Ordering::Release);
                                }
                            }
                        }
                    }
                }
            }
            self.fired = fired;

            if timer_fired {
                let due = self.timer.as_ref().map(|t| t.expirations()).unwrap_or(0);
                // A fresh sample in the same wakeup supersedes the
                // re-emit.
                if !got_data {
                    for _ in 0..due.min(32) {
                        self.reemit()?;
                    }
                }
            }

            for i in 0..self.destinations.len() {
                self.destinations[i].write(&self.pool, &self.stats)?;
            }

            self.maybe_periodic();

            if active == 0 {
                debug!("path {}: all sources finished", self.uuid);
                break;
            }
        }

        Ok(())
    }

    /// Buffers the batch per source and emits according to the mode.
    fn ingest(&mut self, source: usize, batch: Vec<SampleBox>) -> Result<(), PathError> {
        for smp in batch {
            self.latest[source] = Some(smp);
            self.arrived |= 1 << source;

            let ready = match self.mode {
                Mode::Any => true,
                Mode::All => self.arrived & self.mask == self.mask,
            };
            if !ready {
                continue;
            }
            if self.mode == Mode::All {
                self.arrived = 0;
            }

            self.emit(source)?;
        }
        Ok(())
    }

    /// Composes one output sample from the latest source samples, runs
    /// the path hook chain and enqueues to every destination.
    fn emit(&mut self, trigger: usize) -> Result<(), PathError> {
        let Some(mut out) = self.pool.acquire() else {
            self.stats.count(Metric::PoolUnderrun);
            return Ok(());
        };

        // Seed with the previous output so sources that did not
        // contribute this round keep their last value.
        if let Some(last) = &self.last_sample {
            out.copy_from(last);
        }
        out.set_signals(self.signals.clone());

        self.mapping.remap(&mut out, &self.latest);

        if let Some(trig) = &self.latest[trigger] {
            out.ts = trig.ts;
            out.flags.insert(
                trig.flags & (SampleFlags::TS_ORIGIN | SampleFlags::TS_RECEIVED),
            );
        }

        out.sequence = if self.original_sequence_no {
            match &self.latest[self.seq_source] {
                Some(smp) => smp.sequence,
                None => self.seq_counter,
            }
        } else {
            self.seq_counter
        };
        self.seq_counter = out.sequence + 1;
        out.flags.insert(SampleFlags::SEQUENCE);

        self.hook_buf.clear();
        self.hook_buf.push(out);
        let mut buf = std::mem::take(&mut self.hook_buf);
        let result = self
            .hooks
            .process(&mut buf)
            .map_err(|e| PathError::Hook(e.to_string()));

        match result {
            Ok(dropped) => {
                for _ in 0..dropped {
                    self.stats.count(Metric::Dropped);
                }
                if let Some(smp) = buf.pop() {
                    for dest in &self.destinations {
                        dest.enqueue(&smp, &self.stats);
                    }
                    self.last_sample = Some(smp);
                }
                self.hook_buf = buf;
                Ok(())
            }
            Err(e) => {
                self.hook_buf = buf;
                Err(e)
            }
        }
    }

    /// A rate tick without fresh input repeats the last output with the
    /// next sequence number.
    fn reemit(&mut self) -> Result<(), PathError> {
        let Some(last) = &self.last_sample else {
            return Ok(());
        };
        let next_seq = last.sequence + 1;

        let Some(mut out) = self.pool.acquire() else {
            self.stats.count(Metric::PoolUnderrun);
            return Ok(());
        };
        out.copy_from(last);
        out.sequence = next_seq;
        out.flags.insert(SampleFlags::SEQUENCE);

        for dest in &self.destinations {
            dest.enqueue(&out, &self.stats);
        }

        self.seq_counter = next_seq + 1;
        self.last_sample = Some(out);
        Ok(())
    }

    fn maybe_periodic(&mut self) {
        if self.last_tick.elapsed() >= Duration::from_secs(1) {
            self.hooks.periodic();
            self.last_tick = Instant::now();
        }
    }
}

/// A configured dataflow from N sources to M destinations.
pub struct Path {
    uuid: Uuid,
    mode: Mode,
    enabled: bool,
    reversed: bool,
    builtin: bool,
    poll_cfg: i32,
    rate: f64,
    queuelen: usize,
    mask_names: Vec<String>,
    original_sequence_no: Option<bool>,
    affinity: u64,

    mapping: Mapping,
    hooks_cfg: Option<Value>,
    out_names: Vec<String>,

    stats: Arc<Stats>,
    state: Arc<AtomicU8>,
    cancel: Arc<EventFd>,
    shutdown: Arc<AtomicBool>,
    signals: Arc<SignalList>,

    worker: Option<Worker>,
    handle: Option<JoinHandle<()>>,
    worker_back: Option<std::sync::mpsc::Receiver<Worker>>,
}

impl Path {
    /// Parses one entry of the `paths` array. Node references stay
    /// unresolved until `prepare`.
    pub fn parse(
        cfg: &Value,
        sn_uuid: Uuid,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Path, ConfigError> {
        let pc: PathConfig = basalt_config::from_value(cfg)?;

        let uuid = match &pc.uuid {
            Some(s) => Uuid::parse_str(s)
                .map_err(|e| ConfigError::invalid("uuid", e.to_string()))?,
            None => Uuid::new_v5(&sn_uuid, serde_json::to_string(cfg)?.as_bytes()),
        };

        let mode = match pc.mode.as_deref() {
            None | Some("any") => Mode::Any,
            Some("all") => Mode::All,
            Some(other) => return Err(ConfigError::unknown("path mode", other)),
        };

        if pc.rate < 0.0 {
            return Err(ConfigError::invalid("rate", "must not be negative"));
        }

        let mapping = Mapping::parse(&pc.input)?;

        let out_names = match &pc.out {
            None => Vec::new(),
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(list)) => {
                let mut names = Vec::new();
                for entry in list {
                    let name = entry.as_str().ok_or_else(|| {
                        ConfigError::invalid("out", "expected node names")
                    })?;
                    names.push(name.to_string());
                }
                names
            }
            Some(_) => {
                return Err(ConfigError::invalid(
                    "out",
                    "expected a node name or an array of them",
                ));
            }
        };

        Ok(Path {
            uuid,
            mode,
            enabled: pc.enabled,
            reversed: pc.reverse,
            builtin: pc.builtin,
            poll_cfg: pc.poll,
            rate: pc.rate,
            queuelen: pc.queuelen,
            mask_names: pc.mask.unwrap_or_default(),
            original_sequence_no: pc.original_sequence_no,
            affinity: pc.affinity,
            mapping,
            hooks_cfg: pc.hooks,
            out_names,
            stats: Arc::new(Stats::new()),
            state: Arc::new(AtomicU8::new(State::Parsed.to_u8())),
            cancel: Arc::new(EventFd::new().map_err(|e| {
                ConfigError::invalid("path", format!("cannot create eventfd: {e}"))
            })?),
            shutdown,
            signals: SignalList::empty(),
            worker: None,
            handle: None,
            worker_back: None,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Output signal list after the hook chain; valid after `prepare`.
    pub fn output_signals(&self) -> Arc<SignalList> {
        self.signals.clone()
    }

    pub fn check(&mut self) -> Result<(), ConfigError> {
        assert_eq!(self.state(), State::Parsed, "check() out of order");

        if !self.queuelen.is_power_of_two() {
            let fixed = basalt_config::pow2_ceil(self.queuelen);
            warn!(
                "path {}: queue length should be a power of two, adjusting {} -> {}",
                self.uuid, self.queuelen, fixed
            );
            self.queuelen = fixed;
        }

        if self.poll_cfg == 0 {
            if self.mapping.source_nodes().len() > 1 {
                return Err(ConfigError::invalid(
                    "poll",
                    "must be active for paths with more than one source",
                ));
            }
            if self.rate > 0.0 {
                return Err(ConfigError::invalid(
                    "poll",
                    "must be active when a rate is configured",
                ));
            }
        }

        self.state.store(State::Checked.to_u8(), Ordering::Release);
        Ok(())
    }

    /// Resolves node references, compiles the mapping, builds sources,
    /// destinations, the hook chain and the output pool.
    pub fn prepare(&mut self, nodes: &NodeList, arena: &ArenaKind) -> Result<(), PathError> {
        if self.state() != State::Checked {
            return Err(PathError::InvalidState(self.state()));
        }

        self.mapping.prepare(nodes)?;
        let mapped_signals = self.mapping.output_signals();

        let mut hooks = HookChain::new();
        let ctx = HookContext::new(self.stats.clone());
        if let Some(cfg) = &self.hooks_cfg {
            hooks.parse(cfg, &ctx)?;
        }
        if self.builtin {
            hooks.add_builtins(&ctx);
        }
        let out_signals = hooks
            .prepare(mapped_signals.clone())
            .map_err(|e| PathError::Hook(e.to_string()))?;

        // Destinations claim their nodes exclusively and learn the output
        // shape before they start.
        let mut destinations = Vec::new();
        for name in &self.out_names {
            let node = nodes
                .lookup(name)
                .ok_or_else(|| ConfigError::unknown("node", name.clone()))?;
            node.claim_writer(self.uuid)?;
            node.prepare_output(out_signals.clone())?;
            destinations.push(PathDestination::new(node, self.queuelen)?);
        }

        // Sources: first claim wins the master read pump, later paths
        // attach through fan-out queues.
        let source_names = self.mapping.source_nodes().to_vec();
        if source_names.len() > 64 {
            return Err(PathError::Setup(
                "a path supports at most 64 sources".into(),
            ));
        }

        let mut sources = Vec::new();
        let mut mask = 0u64;
        let mut any_secondary = false;

        for (i, name) in source_names.iter().enumerate() {
            let node = nodes
                .lookup(name)
                .ok_or_else(|| ConfigError::unknown("node", name.clone()))?;

            let masked = self.mask_names.is_empty() || self.mask_names.contains(name);
            if masked {
                mask |= 1 << i;
            }

            let source = if node.claim_master(self.uuid) {
                PathSource::master(node, self.queuelen, masked)?
            } else {
                any_secondary = true;
                let queue = Arc::new(SignalledQueue::new(self.queuelen)?);
                node.add_fanout(queue.clone());
                PathSource::secondary(node, queue, self.queuelen, masked)?
            };
            sources.push(source);
        }

        if !self.mask_names.is_empty() && self.mode == Mode::Any {
            warn!(
                "path {}: 'mask' only affects mode=all paths and is ignored here",
                self.uuid
            );
        }

        for name in &self.mask_names {
            if !source_names.contains(name) {
                return Err(ConfigError::unknown("mask node", name.clone()).into());
            }
        }

        let poll = match self.poll_cfg {
            0 => false,
            1 => true,
            _ => self.rate > 0.0 || sources.len() > 1 || any_secondary,
        };

        let original_sequence_no = self
            .original_sequence_no
            .unwrap_or(sources.len() == 1);

        let value_capacity = out_signals.len().max(mapped_signals.len()).max(16);
        let pool = SamplePool::new(&PoolConfig {
            count: destinations.len().max(1) * self.queuelen + 4,
            value_capacity,
            kind: arena.clone(),
        })?;

        let latest = (0..sources.len()).map(|_| None).collect();

        self.signals = out_signals;
        self.worker = Some(Worker {
            uuid: self.uuid,
            mode: self.mode,
            poll,
            rate: self.rate,
            affinity: self.affinity,
            sources,
            destinations,
            hooks,
            mapping: self.mapping.clone(),
            pool,
            signals: mapped_signals,
            mask,
            arrived: 0,
            latest,
            last_sample: None,
            seq_counter: 0,
            original_sequence_no,
            seq_source: 0,
            timer: None,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            stats: self.stats.clone(),
            read_buf: Vec::new(),
            hook_buf: Vec::new(),
            fired: Vec::new(),
            last_tick: Instant::now(),
        });

        self.state.store(State::Prepared.to_u8(), Ordering::Release);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), PathError> {
        match self.state() {
            State::Prepared | State::Stopped => {}
            s => return Err(PathError::InvalidState(s)),
        }

        let Some(worker) = self.worker.take() else {
            return Err(PathError::Setup(
                "path must be prepared before it starts".into(),
            ));
        };

        info!(
            "starting path {uuid}: #signals={nsig}, #hooks={nhooks}, #sources={nsrc}, \
             #destinations={ndst}, mode={mode:?}, poll={poll}, rate={rate}, \
             queuelen={queuelen}, original_sequence_no={osn}",
            uuid = self.uuid,
            nsig = self.signals.len(),
            nhooks = worker.hooks.len(),
            nsrc = worker.sources.len(),
            ndst = worker.destinations.len(),
            mode = worker.mode,
            poll = worker.poll,
            rate = worker.rate,
            queuelen = self.queuelen,
            osn = worker.original_sequence_no,
        );

        self.state.store(State::Started.to_u8(), Ordering::Release);

        let (tx, rx) = std::sync::mpsc::channel();
        let mut worker = worker;
        let handle = std::thread::Builder::new()
            .name(format!("path-{}", self.uuid.simple()))
            .spawn(move || {
                worker.run();
                let _ = tx.send(worker);
            })?;

        self.handle = Some(handle);
        self.worker_back = Some(rx);
        Ok(())
    }

    /// Stops the worker: flips the state, pokes the cancellation fd and
    /// joins. Pending destination samples get a bounded flush inside the
    /// worker before it exits.
    pub fn stop(&mut self) -> Result<(), PathError> {
        match self.state() {
            State::Started | State::Stopping => {}
            _ => return Ok(()),
        }

        info!("stopping path {}", self.uuid);
        self.state.store(State::Stopping.to_u8(), Ordering::Release);
        let _ = self.cancel.raise(1);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("path {} worker panicked", self.uuid);
            }
        }
        if let Some(rx) = self.worker_back.take() {
            if let Ok(worker) = rx.try_recv() {
                self.worker = Some(worker);
            }
        }

        self.state.store(State::Stopped.to_u8(), Ordering::Release);
        Ok(())
    }
}

impl Drop for Path {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_node::NodeRegistry;
    use serde_json::json;

    fn nodes(cfg: Value) -> NodeList {
        let list = NodeList::parse(
            cfg.as_object().unwrap(),
            Uuid::nil(),
            &NodeRegistry::with_builtins(),
        )
        .unwrap();
        for node in list.iter() {
            node.check().unwrap();
            node.prepare().unwrap();
        }
        list
    }

    fn parse_path(cfg: Value) -> Path {
        Path::parse(&cfg, Uuid::nil(), Arc::new(AtomicBool::new(false))).unwrap()
    }

    #[test]
    fn single_source_defaults_to_fast_path_and_original_sequence() {
        let nodes = nodes(json!({
            "a": { "type": "loopback", "in": { "signals": 2 } },
            "b": { "type": "loopback" },
        }));

        let mut path = parse_path(json!({ "in": "a", "out": "b" }));
        path.check().unwrap();
        path.prepare(&nodes, &ArenaKind::Heap).unwrap();

        let worker = path.worker.as_ref().unwrap();
        // The loopback master has a queue fd, but a single plain source
        // without rate stays on the fast path only when nothing forces
        // multiplexing.
        assert!(worker.original_sequence_no);
        assert_eq!(worker.sources.len(), 1);
        assert_eq!(worker.destinations.len(), 1);
        assert_eq!(path.output_signals().len(), 2);
    }

    #[test]
    fn two_sources_force_polling() {
        let nodes = nodes(json!({
            "a": { "type": "loopback", "in": { "signals": 1 } },
            "b": { "type": "loopback", "in": { "signals": 1 } },
            "c": { "type": "loopback" },
        }));

        let mut path = parse_path(json!({ "in": ["a", "b"], "out": "c", "mode": "all" }));
        path.check().unwrap();
        path.prepare(&nodes, &ArenaKind::Heap).unwrap();

        let worker = path.worker.as_ref().unwrap();
        assert!(worker.poll);
        assert!(!worker.original_sequence_no);
        assert_eq!(worker.mask, 0b11);
        assert_eq!(worker.mode, Mode::All);
    }

    #[test]
    fn explicit_poll_off_with_two_sources_is_rejected() {
        let mut path = parse_path(json!({ "in": ["a", "b"], "out": "c", "poll": 0 }));
        assert!(path.check().is_err());
    }

    #[test]
    fn mask_restricted_to_known_sources() {
        let nodes = nodes(json!({
            "a": { "type": "loopback", "in": { "signals": 1 } },
            "b": { "type": "loopback" },
        }));

        let mut path = parse_path(json!({
            "in": "a",
            "out": "b",
            "mode": "all",
            "mask": ["ghost"],
        }));
        path.check().unwrap();
        assert!(path.prepare(&nodes, &ArenaKind::Heap).is_err());
    }

    #[test]
    fn second_reader_becomes_secondary() {
        let nodes = nodes(json!({
            "src": { "type": "loopback", "in": { "signals": 1 } },
            "d1": { "type": "loopback" },
            "d2": { "type": "loopback" },
        }));

        let mut p1 = parse_path(json!({ "in": "src", "out": "d1" }));
        p1.check().unwrap();
        p1.prepare(&nodes, &ArenaKind::Heap).unwrap();
        assert!(p1.worker.as_ref().unwrap().sources[0].is_master());

        let mut p2 = parse_path(json!({ "in": "src", "out": "d2" }));
        p2.check().unwrap();
        p2.prepare(&nodes, &ArenaKind::Heap).unwrap();
        let w2 = p2.worker.as_ref().unwrap();
        assert!(!w2.sources[0].is_master());
        // A secondary source forces the polled loop.
        assert!(w2.poll);
    }

    #[test]
    fn queuelen_rounded_to_power_of_two() {
        let mut path = parse_path(json!({ "in": "a", "out": "b", "queuelen": 100 }));
        path.check().unwrap();
        assert_eq!(path.queuelen, 128);
    }

    #[test]
    fn uuids_are_deterministic_over_config() {
        let cfg = json!({ "in": "a", "out": "b", "rate": 5.0 });
        let p1 = parse_path(cfg.clone());
        let p2 = parse_path(cfg);
        assert_eq!(p1.uuid(), p2.uuid());
    }
}
