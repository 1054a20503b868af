//! End-to-end path scenarios: a full graph of real nodes driven through
//! running path workers, one test per dataflow property.

use basalt_config::ConfigError;
use basalt_icc::{ArenaKind, PoolConfig, SampleBox, SamplePool};
use basalt_node::{FactoryFlags, Node, NodeDriver, NodeFactory, NodeList, NodeRegistry};
use basalt_path::Path;
use basalt_sample::{SampleFlags, SignalData};
use basalt_util::TimeSpec;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Graph {
    nodes: NodeList,
    paths: Vec<Path>,
    shutdown: Arc<AtomicBool>,
}

impl Graph {
    /// Builds and starts a whole graph in supervisor order: nodes are
    /// prepared, then paths (so destinations learn their shape), then
    /// everything starts.
    fn start(registry: &NodeRegistry, nodes_cfg: Value, paths_cfg: Vec<Value>) -> Graph {
        let shutdown = Arc::new(AtomicBool::new(false));

        let nodes =
            NodeList::parse(nodes_cfg.as_object().unwrap(), Uuid::nil(), registry).unwrap();
        for node in nodes.iter() {
            node.check().unwrap();
            node.prepare().unwrap();
        }

        let mut paths = Vec::new();
        for cfg in paths_cfg {
            let mut path = Path::parse(&cfg, Uuid::nil(), shutdown.clone()).unwrap();
            path.check().unwrap();
            path.prepare(&nodes, &ArenaKind::Heap).unwrap();
            paths.push(path);
        }

        for node in nodes.iter() {
            node.start().unwrap();
        }
        for path in &mut paths {
            path.start().unwrap();
        }

        Graph {
            nodes,
            paths,
            shutdown,
        }
    }

    fn stop(&mut self) {
        for path in &mut self.paths {
            path.stop().unwrap();
        }
        for node in self.nodes.iter() {
            node.stop().unwrap();
        }
    }

    fn node(&self, name: &str) -> Arc<Node> {
        self.nodes.lookup(name).unwrap()
    }

    /// Feeds one float sample into a loopback node's write side.
    fn feed(&self, name: &str, pool: &SamplePool, sequence: u64, values: &[f64]) {
        let node = self.node(name);
        let mut smp = pool.acquire().unwrap();
        smp.sequence = sequence;
        smp.ts.origin = TimeSpec::now();
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA;
        for (i, v) in values.iter().enumerate() {
            smp.data_mut()[i] = SignalData::float(*v);
        }
        smp.set_len(values.len());

        let mut batch = vec![smp];
        node.write(&mut batch, None).unwrap();
    }

    /// Drains a destination loopback node until `want` samples arrived or
    /// the deadline passes.
    fn collect(&self, name: &str, pool: &SamplePool, want: usize, deadline: Duration) -> Vec<SampleBox> {
        let node = self.node(name);
        let until = Instant::now() + deadline;
        let mut got = Vec::new();

        while got.len() < want && Instant::now() < until {
            let mut batch = Vec::new();
            pool.acquire_many(&mut batch, want.min(16));
            match node.read(&mut batch) {
                Ok(0) | Err(_) => std::thread::sleep(Duration::from_millis(1)),
                Ok(_) => got.append(&mut batch),
            }
        }

        got
    }
}

fn tmp(name: &str) -> String {
    format!(
        "/tmp/basalt_e2e_{}_{}_{name}",
        std::process::id(),
        basalt_util::now_ns()
    )
}

/// Scenario: one file source, one file destination, no extra hooks. The
/// two records pass through unchanged and the run winds itself down on
/// end-of-file.
#[test]
fn loopback_single_file_to_file() {
    let input = tmp("in");
    let output = tmp("out");
    std::fs::write(
        &input,
        "100.000000000(0)\t1\n100.100000000(1)\t2\n",
    )
    .unwrap();

    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "src": {
                "type": "file",
                "uri": input,
                "in": { "signals": 1, "eof": "stop" },
            },
            "dst": {
                "type": "file",
                "uri": output,
                "out": { "flush": true },
            },
        }),
        vec![json!({ "in": "src", "out": "dst" })],
    );

    // The file source requests shutdown at end-of-file.
    let until = Instant::now() + Duration::from_secs(3);
    while !graph.shutdown.load(Ordering::Acquire) && Instant::now() < until {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(graph.shutdown.load(Ordering::Acquire), "no shutdown request");

    graph.stop();

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 2, "expected two records, got: {text:?}");

    for (i, line) in lines.iter().enumerate() {
        assert!(
            line.contains(&format!("({i})")),
            "line {i} lost its sequence: {line}"
        );
        assert!(
            line.ends_with(&format!("\t{}", i + 1)),
            "line {i} lost its value: {line}"
        );
    }

    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

/// Scenario: mode=all merge of two sources. Output appears only when
/// both contributed a fresh sample.
#[test]
fn two_source_all_merge() {
    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "a": { "type": "loopback", "in": { "signals": 1 } },
            "b": { "type": "loopback", "in": { "signals": 1 } },
            "c": { "type": "loopback", "queuelen": 64 },
        }),
        vec![json!({
            "in": ["a", "b"],
            "out": "c",
            "mode": "all",
        })],
    );

    let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();

    // One from a: barrier still open.
    graph.feed("a", &pool, 0, &[1.5]);
    assert!(
        graph.collect("c", &pool, 1, Duration::from_millis(150)).is_empty(),
        "output before the barrier closed"
    );

    // One from b: barrier closes, exactly one merged sample.
    graph.feed("b", &pool, 0, &[2.5]);
    let first = graph.collect("c", &pool, 1, Duration::from_secs(2));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].len(), 2);
    assert_eq!(first[0].data()[0].as_float(), 1.5);
    assert_eq!(first[0].data()[1].as_float(), 2.5);

    // Another from a alone: nothing.
    graph.feed("a", &pool, 1, &[3.5]);
    assert!(
        graph.collect("c", &pool, 1, Duration::from_millis(150)).is_empty(),
        "output despite missing b"
    );

    // And the matching b: the second merge appears.
    graph.feed("b", &pool, 1, &[4.5]);
    let second = graph.collect("c", &pool, 1, Duration::from_secs(2));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].data()[0].as_float(), 3.5);
    assert_eq!(second[0].data()[1].as_float(), 4.5);

    graph.stop();
}

/// Scenario: fixed-rate path re-emits the last sample between inputs.
/// One input at t=0 and rate=10 yields sequences 0..9 within a second,
/// all carrying the same value.
#[test]
fn rate_reemits_last_sample() {
    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "src": { "type": "loopback", "in": { "signals": 1 } },
            "dst": { "type": "loopback", "queuelen": 64 },
        }),
        vec![json!({
            "in": "src",
            "out": "dst",
            "rate": 10.0,
        })],
    );

    let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();
    graph.feed("src", &pool, 0, &[42.0]);

    let got = graph.collect("dst", &pool, 10, Duration::from_secs(2));
    assert!(got.len() >= 10, "only {} samples within the window", got.len());

    for (i, smp) in got.iter().take(10).enumerate() {
        assert_eq!(smp.sequence, i as u64, "sequence gap at {i}");
        assert_eq!(smp.data()[0].as_float(), 42.0, "value changed at {i}");
    }

    graph.stop();
}

/// A deliberately slow write side for the overrun scenario.
struct SlowSinkDriver {
    delay: Duration,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl NodeDriver for SlowSinkDriver {
    fn parse(&mut self, _cfg: &Value) -> Result<(), ConfigError> {
        Ok(())
    }

    fn read(&mut self, _smps: &mut [SampleBox]) -> Result<usize, basalt_node::NodeError> {
        Ok(0)
    }

    fn write(&mut self, smps: &[SampleBox]) -> Result<usize, basalt_node::NodeError> {
        for smp in smps {
            std::thread::sleep(self.delay);
            self.seen.lock().unwrap().push(smp.sequence);
        }
        Ok(smps.len())
    }
}

/// Scenario: sustained overload. The destination queue evicts its oldest
/// entries (counted as overruns) and what does get delivered is still in
/// order.
#[test]
fn overrun_drops_oldest_but_keeps_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_for_driver = seen.clone();

    let mut registry = NodeRegistry::with_builtins();
    registry.register(NodeFactory {
        name: "slow-sink",
        description: "test sink that writes slowly",
        flags: FactoryFlags::SUPPORTS_WRITE,
        make: Box::new(move || {
            Box::new(SlowSinkDriver {
                delay: Duration::from_millis(1),
                seen: seen_for_driver.clone(),
            })
        }),
    });

    let mut graph = Graph::start(
        &registry,
        json!({
            "src": {
                "type": "loopback",
                "queuelen": 2048,
                "in": { "signals": 1, "vectorize": 64 },
            },
            "sink": { "type": "slow-sink" },
        }),
        vec![json!({
            "in": "src",
            "out": "sink",
            "queuelen": 16,
        })],
    );

    let pool = SamplePool::new(&PoolConfig::heap(1024, 4)).unwrap();
    for i in 0..600u64 {
        graph.feed("src", &pool, i, &[i as f64]);
    }

    std::thread::sleep(Duration::from_millis(500));
    let overruns = graph.paths[0].stats().total(basalt_stats::Metric::QueueOverrun);
    graph.stop();

    assert!(overruns > 0, "no overruns under sustained overload");

    let delivered = seen.lock().unwrap();
    assert!(!delivered.is_empty());
    for pair in delivered.windows(2) {
        assert!(pair[0] < pair[1], "out-of-order delivery: {pair:?}");
    }
}

/// Scenario: a hook skips every third sample; 30 samples in, 20 out,
/// survivors keeping their original sequence numbers `0,1,3,4,6,...`.
#[test]
fn hook_drop_thins_the_stream() {
    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "src": { "type": "loopback", "in": { "signals": 1 } },
            "dst": { "type": "loopback", "queuelen": 64 },
        }),
        vec![json!({
            "in": "src",
            "out": "dst",
            "hooks": [{ "type": "decimate", "ratio": 3, "mode": "drop" }],
        })],
    );

    let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();
    for i in 0..30u64 {
        graph.feed("src", &pool, i, &[i as f64]);
    }

    let got = graph.collect("dst", &pool, 20, Duration::from_secs(2));
    assert_eq!(got.len(), 20, "every third sample should be gone");

    let seqs: Vec<u64> = got.iter().map(|s| s.sequence).collect();
    let expected: Vec<u64> = (0..30).filter(|i| i % 3 != 2).collect();
    assert_eq!(seqs, expected);

    assert_eq!(graph.paths[0].stats().total(basalt_stats::Metric::Dropped), 10);

    graph.stop();
}

/// The keep side of the downsampler: ratio 3 keeps one sample in three.
#[test]
fn decimate_keeps_one_in_n() {
    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "src": { "type": "loopback", "in": { "signals": 1 } },
            "dst": { "type": "loopback", "queuelen": 64 },
        }),
        vec![json!({
            "in": "src",
            "out": "dst",
            "hooks": [{ "type": "decimate", "ratio": 3 }],
        })],
    );

    let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();
    for i in 0..30u64 {
        graph.feed("src", &pool, i, &[i as f64]);
    }

    let got = graph.collect("dst", &pool, 10, Duration::from_secs(2));
    assert_eq!(got.len(), 10);

    let seqs: Vec<u64> = got.iter().map(|s| s.sequence).collect();
    let expected: Vec<u64> = (0..30).step_by(3).collect();
    assert_eq!(seqs, expected);

    graph.stop();
}

/// Two paths bridged over UDP: samples leave the first path through a
/// socket node framed as villas.binary and enter the second through its
/// peer, surviving the wire byte-exactly.
#[test]
fn udp_bridge_between_paths() {
    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "src": { "type": "loopback", "in": { "signals": 2 } },
            "udp_tx": {
                "type": "socket",
                "local": "127.0.0.1:17712",
                "remote": "127.0.0.1:17711",
            },
            "udp_rx": {
                "type": "socket",
                "local": "127.0.0.1:17711",
                "in": { "signals": 2 },
            },
            "sink": { "type": "loopback", "queuelen": 64 },
        }),
        vec![
            json!({ "in": "src", "out": "udp_tx" }),
            json!({ "in": "udp_rx", "out": "sink" }),
        ],
    );

    let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();
    for i in 0..3u64 {
        graph.feed("src", &pool, i, &[i as f64 + 0.5, -(i as f64)]);
    }

    let got = graph.collect("sink", &pool, 3, Duration::from_secs(3));
    assert_eq!(got.len(), 3, "samples lost on the wire");

    for (i, smp) in got.iter().enumerate() {
        assert_eq!(smp.sequence, i as u64);
        assert_eq!(smp.data()[0].as_float(), i as f64 + 0.5);
        assert_eq!(smp.data()[1].as_float(), -(i as f64));
    }

    graph.stop();
}

/// Two paths reading the same node: the second becomes a secondary
/// source and still sees every sample.
#[test]
fn shared_source_reaches_both_paths() {
    let registry = NodeRegistry::with_builtins();
    let mut graph = Graph::start(
        &registry,
        json!({
            "src": { "type": "loopback", "in": { "signals": 1 } },
            "d1": { "type": "loopback", "queuelen": 64 },
            "d2": { "type": "loopback", "queuelen": 64 },
        }),
        vec![
            json!({ "in": "src", "out": "d1" }),
            json!({ "in": "src", "out": "d2" }),
        ],
    );

    let pool = SamplePool::new(&PoolConfig::heap(64, 4)).unwrap();
    for i in 0..5u64 {
        graph.feed("src", &pool, i, &[i as f64 * 2.0]);
    }

    let at_d1 = graph.collect("d1", &pool, 5, Duration::from_secs(2));
    let at_d2 = graph.collect("d2", &pool, 5, Duration::from_secs(2));

    assert_eq!(at_d1.len(), 5);
    assert_eq!(at_d2.len(), 5);
    for i in 0..5 {
        assert_eq!(at_d1[i].data()[0].as_float(), i as f64 * 2.0);
        assert_eq!(at_d2[i].data()[0].as_float(), i as f64 * 2.0);
    }

    graph.stop();
}
