//! The supervisor: process-level owner of nodes and paths.
//!
//! It sequences the whole lifecycle (parse, check, prepare, start in
//! that order; stop in reverse), runs the periodic statistics tick and
//! carries the shutdown flag that file sources and signal handlers both
//! feed into.

use basalt_config::ConfigError;
use basalt_icc::ArenaKind;
use basalt_node::{NodeError, NodeList, NodeRegistry};
use basalt_path::{Path, PathError};
use basalt_util::rt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub mod config;

pub use basalt_util::State;
pub use config::Config;

#[derive(Debug, thiserror::Error)]
pub enum SuperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Path(#[from] PathError),
}

pub struct Supervisor {
    name: String,
    uuid: Uuid,
    affinity: u64,
    priority: i32,
    hugepages: usize,
    stats_period: f64,

    #[allow(dead_code)]
    registry: NodeRegistry,
    nodes: NodeList,
    paths: Vec<Path>,

    state: State,
    shutdown: Arc<AtomicBool>,
    ticker: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

impl Supervisor {
    /// Builds the whole graph from the root configuration object.
    /// Factories are initialized here, before any node is constructed.
    pub fn from_json(value: &Value) -> Result<Supervisor, SuperError> {
        let cfg: Config = basalt_config::from_value(value)?;
        Self::with_registry(value, cfg, NodeRegistry::with_builtins())
    }

    /// Same as [`from_json`](Self::from_json) with a caller-extended
    /// driver registry.
    pub fn with_registry(
        value: &Value,
        cfg: Config,
        registry: NodeRegistry,
    ) -> Result<Supervisor, SuperError> {
        let uuid = match &cfg.uuid {
            Some(s) => Uuid::parse_str(s)
                .map_err(|e| ConfigError::invalid("uuid", e.to_string()))?,
            None => {
                let canonical = format!("{}:{}", cfg.name, serde_json::to_string(value)
                    .map_err(ConfigError::Parse)?);
                Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes())
            }
        };

        let shutdown = Arc::new(AtomicBool::new(false));

        let nodes = NodeList::parse(&cfg.nodes, uuid, &registry)?;

        let mut paths = Vec::new();
        for path_cfg in &cfg.paths {
            let path = Path::parse(path_cfg, uuid, shutdown.clone())?;
            let reversed = path.is_reversed();
            let enabled = path.is_enabled();
            if enabled {
                paths.push(path);
            }

            // `reverse = true` instantiates the mirrored path as well.
            if reversed && enabled {
                let mirrored = reversed_config(path_cfg)?;
                paths.push(Path::parse(&mirrored, uuid, shutdown.clone())?);
            }
        }

        info!(
            "loaded configuration: #nodes={n}, #paths={p}, name={name}",
            n = nodes.len(),
            p = paths.len(),
            name = cfg.name
        );

        Ok(Supervisor {
            name: cfg.name,
            uuid,
            affinity: cfg.affinity,
            priority: cfg.priority,
            hugepages: cfg.hugepages,
            stats_period: cfg.stats,
            registry,
            nodes,
            paths,
            state: State::Parsed,
            shutdown,
            ticker: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn check(&mut self) -> Result<(), SuperError> {
        assert_eq!(self.state, State::Parsed, "check() out of order");

        for node in self.nodes.iter() {
            node.check()?;
        }
        for path in &mut self.paths {
            path.check()?;
        }

        self.state = State::Checked;
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<(), SuperError> {
        assert_eq!(self.state, State::Checked, "prepare() out of order");

        let arena = if self.hugepages > 0 {
            ArenaKind::HugePages
        } else {
            ArenaKind::Heap
        };

        // Nodes first so paths can resolve signal lists; paths next so
        // destination nodes learn their output shape before they start.
        for node in self.nodes.iter() {
            node.prepare()?;
        }
        for path in &mut self.paths {
            path.prepare(&self.nodes, &arena)?;
        }

        self.state = State::Prepared;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), SuperError> {
        assert_eq!(self.state, State::Prepared, "start() out of order");

        if self.priority > 0 {
            if let Err(e) = rt::set_rt_priority(self.priority) {
                warn!("cannot switch to real-time priority {}: {e}", self.priority);
            }
            if let Err(e) = rt::lock_memory() {
                warn!("cannot lock pages into memory: {e}");
            }
        }
        if self.affinity != 0 {
            if let Err(e) = rt::set_thread_affinity(self.affinity) {
                warn!("cannot pin supervisor to affinity mask: {e}");
            }
        }

        for node in self.nodes.iter() {
            node.start()?;
        }
        for path in &mut self.paths {
            path.start()?;
        }

        self.start_ticker();
        self.state = State::Started;

        info!("supervisor {name} started", name = self.name);
        Ok(())
    }

    /// Stops in reverse start order: paths drain first, then nodes close.
    pub fn stop(&mut self) -> Result<(), SuperError> {
        if self.state != State::Started {
            return Ok(());
        }

        if let Some((handle, stop)) = self.ticker.take() {
            stop.store(true, Ordering::Release);
            let _ = handle.join();
        }

        for path in &mut self.paths {
            path.stop()?;
        }
        for node in self.nodes.iter() {
            node.stop()?;
        }

        self.dump_stats();
        self.state = State::Stopped;

        info!("supervisor {name} stopped", name = self.name);
        Ok(())
    }

    /// Blocks until a shutdown is requested (signal handler, file source
    /// at end-of-stream) or every path wound itself down.
    pub fn run(&mut self) -> Result<(), SuperError> {
        while !self.shutdown.load(Ordering::Acquire) {
            let all_done = !self.paths.is_empty()
                && self
                    .paths
                    .iter()
                    .all(|p| p.state() == State::Stopped);
            if all_done {
                info!("all paths finished");
                break;
            }

            std::thread::sleep(Duration::from_millis(50));
        }

        self.stop()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn start_ticker(&mut self) {
        if self.stats_period <= 0.0 {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs_f64(self.stats_period);

        let nodes: Vec<_> = self
            .nodes
            .iter()
            .map(|n| (n.name().to_string(), n.stats()))
            .collect();
        let paths: Vec<_> = self
            .paths
            .iter()
            .map(|p| (format!("path:{}", p.uuid().simple()), p.stats()))
            .collect();

        let stop_flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("stats-tick".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    for (name, stats) in &nodes {
                        stats.dump(name);
                    }
                    for (name, stats) in &paths {
                        stats.dump(name);
                    }
                }
            });

        match handle {
            Ok(handle) => self.ticker = Some((handle, stop)),
            Err(e) => warn!("cannot spawn stats ticker: {e}"),
        }
    }

    fn dump_stats(&self) {
        for node in self.nodes.iter() {
            node.stats().dump(node.name());
        }
        for path in &self.paths {
            path.stats().dump(&format!("path:{}", path.uuid().simple()));
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Builds the mirrored twin of a `reverse = true` path. Only simple
/// paths (one plain input node, one output node) can be turned around.
fn reversed_config(cfg: &Value) -> Result<Value, ConfigError> {
    let obj = cfg
        .as_object()
        .ok_or_else(|| ConfigError::invalid("paths", "path entries must be objects"))?;

    let input = obj
        .get("in")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::invalid("reverse", "needs a simple input node"))?;
    let output = obj
        .get("out")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::invalid("reverse", "needs a simple output node"))?;

    if input.contains('.') {
        return Err(ConfigError::invalid(
            "reverse",
            "input must be a plain node name",
        ));
    }

    let mut mirrored = obj.clone();
    mirrored.insert("in".into(), Value::String(output.to_string()));
    mirrored.insert("out".into(), Value::String(input.to_string()));
    mirrored.insert("reverse".into(), Value::Bool(false));
    // The twin derives its own identity.
    mirrored.remove("uuid");

    Ok(Value::Object(mirrored))
}
