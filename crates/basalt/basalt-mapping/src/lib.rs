//! Declarative plan of how source signals populate a destination sample.
//!
//! A mapping is an ordered list of entries, each naming a source node and
//! what to take from it: a slice of its data, a header scalar, a
//! timestamp word or a statistics aggregate. Entries are laid out
//! back-to-back in the destination sample, in declaration order.
//!
//! Parsing accepts the compact string grammar
//!
//! ```text
//! node
//! node.data[3]        node.data[0:16]      node.data[2-5]     node.data.voltage
//! node.hdr.sequence   node.hdr.length
//! node.ts.origin      node.ts.origin.sec   node.ts.received.nsec
//! node.stats.owd.mean node.stats.total
//! ```
//!
//! and an equivalent JSON object form. `prepare` resolves node references
//! against the running graph and freezes offsets; `remap` is the hot-path
//! application of the compiled plan.

use basalt_config::ConfigError;
use basalt_icc::SampleBox;
use basalt_sample::{Sample, SampleFlags, Signal, SignalData, SignalList, SignalType};
use basalt_stats::{Aggregate, Metric, Stats};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderField {
    Length,
    Sequence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsKind {
    Origin,
    Received,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsField {
    /// Both words, seconds first.
    Both,
    Seconds,
    Nanoseconds,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntryKind {
    /// A slice of the source's input signal list.
    Data {
        /// Offset into the source signals.
        offset: usize,
        /// `None` maps everything from `offset` on.
        length: Option<usize>,
        /// Set when the slice was given by signal name; resolved during
        /// prepare.
        name: Option<String>,
    },
    Header(HeaderField),
    Timestamp { kind: TsKind, field: TsField },
    Stats { metric: Metric, aggregate: Aggregate },
}

/// Resolved per-entry state, filled in by `prepare`.
#[derive(Clone)]
struct Compiled {
    /// Index of the owning source in the mapping's unique-node order.
    source: usize,
    /// Offset into the source signal list (data entries).
    src_offset: usize,
    /// Output width in values.
    length: usize,
    /// Offset into the destination sample.
    out_offset: usize,
    /// Source input signals (data entries derive descriptors from it).
    signals: Arc<SignalList>,
    /// Source node statistics (stats entries read from it).
    stats: Option<Arc<Stats>>,
}

#[derive(Clone)]
pub struct MappingEntry {
    pub node: String,
    pub kind: EntryKind,
    compiled: Option<Compiled>,
}

impl MappingEntry {
    /// Index of this entry's source node in [`Mapping::source_nodes`]
    /// order. Only valid after `prepare`.
    pub fn source_index(&self) -> usize {
        self.compiled.as_ref().map(|c| c.source).unwrap_or(0)
    }

    pub fn length(&self) -> usize {
        self.compiled.as_ref().map(|c| c.length).unwrap_or(0)
    }

    pub fn out_offset(&self) -> usize {
        self.compiled.as_ref().map(|c| c.out_offset).unwrap_or(0)
    }

    /// Derives the destination signal descriptor for output index `j` of
    /// this entry.
    fn to_signal(&self, j: usize) -> Arc<Signal> {
        let compiled = self.compiled.as_ref().expect("entry not prepared");

        match &self.kind {
            EntryKind::Data { .. } => compiled
                .signals
                .get(compiled.src_offset + j)
                .cloned()
                .unwrap_or_else(|| Arc::new(Signal::new("", "", SignalType::Float))),

            EntryKind::Header(field) => {
                let suffix = match field {
                    HeaderField::Length => "hdr.length",
                    HeaderField::Sequence => "hdr.sequence",
                };
                Arc::new(Signal::new(
                    format!("{}.{}", self.node, suffix),
                    "",
                    SignalType::Integer,
                ))
            }

            EntryKind::Timestamp { kind, field } => {
                let kind_str = match kind {
                    TsKind::Origin => "origin",
                    TsKind::Received => "received",
                };
                let field_str = match (field, j) {
                    (TsField::Seconds, _) | (TsField::Both, 0) => "sec",
                    (TsField::Nanoseconds, _) | (TsField::Both, _) => "nsec",
                };
                Arc::new(Signal::new(
                    format!("{}.ts.{}.{}", self.node, kind_str, field_str),
                    "",
                    SignalType::Integer,
                ))
            }

            EntryKind::Stats { metric, aggregate } => {
                let ty = match aggregate {
                    Aggregate::Total => SignalType::Integer,
                    _ => SignalType::Float,
                };
                Arc::new(Signal::new(
                    format!("{}.stats.{}.{}", self.node, metric.as_str(), aggregate.as_str()),
                    "",
                    ty,
                ))
            }
        }
    }
}

/// JSON object form of one entry.
#[derive(Debug, Deserialize)]
struct EntryConfig {
    node: String,
    #[serde(rename = "type", default)]
    ty: Option<String>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    length: Option<usize>,
    #[serde(default)]
    signal: Option<String>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    aggregate: Option<String>,
}

#[derive(Clone, Default)]
pub struct Mapping {
    entries: Vec<MappingEntry>,
    /// Unique source node names in first-appearance order.
    nodes: Vec<String>,
    /// Destination signal list, built by `prepare`.
    signals: Option<Arc<SignalList>>,
}

/// How `prepare` looks up the nodes a mapping refers to.
pub trait SourceResolver {
    fn input_signals(&self, node: &str) -> Option<Arc<SignalList>>;
    fn node_stats(&self, node: &str) -> Option<Arc<Stats>>;
}

impl Mapping {
    /// Parses the `in` setting of a path: one entry or an array of them.
    pub fn parse(value: &Value) -> Result<Mapping, ConfigError> {
        let mut mapping = Mapping::default();

        match value {
            Value::Array(list) => {
                for item in list {
                    mapping.entries.push(parse_entry(item)?);
                }
            }
            _ => mapping.entries.push(parse_entry(value)?),
        }

        if mapping.entries.is_empty() {
            return Err(ConfigError::invalid("in", "a path needs at least one input"));
        }

        for entry in &mapping.entries {
            if !mapping.nodes.iter().any(|n| n == &entry.node) {
                mapping.nodes.push(entry.node.clone());
            }
        }

        Ok(mapping)
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Unique source node names, in the order sources are indexed.
    pub fn source_nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Entry indices fed by source `index`.
    pub fn entries_of_source(&self, index: usize) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.source_index() == index)
            .map(|(i, _)| i)
            .collect()
    }

    /// Resolves node references, fixes offsets and lengths and builds the
    /// destination signal list.
    pub fn prepare(&mut self, resolver: &dyn SourceResolver) -> Result<(), ConfigError> {
        let mut out_offset = 0usize;
        let mut signals = SignalList::new();

        for i in 0..self.entries.len() {
            let entry = &self.entries[i];

            let src_signals = resolver
                .input_signals(&entry.node)
                .ok_or_else(|| ConfigError::unknown("node", entry.node.clone()))?;
            let stats = resolver.node_stats(&entry.node);
            let source = self
                .nodes
                .iter()
                .position(|n| n == &entry.node)
                .expect("node collected at parse");

            let (src_offset, length) = match &entry.kind {
                EntryKind::Data {
                    offset,
                    length,
                    name,
                } => {
                    let offset = match name {
                        Some(name) => src_signals.index_of(name).ok_or_else(|| {
                            ConfigError::unknown("signal", format!("{}.{}", entry.node, name))
                        })?,
                        None => *offset,
                    };

                    let avail = src_signals.len();
                    if offset > avail {
                        return Err(ConfigError::invalid(
                            "in",
                            format!(
                                "offset {offset} exceeds the {avail} signals of node '{}'",
                                entry.node
                            ),
                        ));
                    }

                    let length = match length {
                        Some(l) => {
                            if offset + l > avail {
                                return Err(ConfigError::invalid(
                                    "in",
                                    format!(
                                        "range {offset}..{} exceeds the {avail} signals of node '{}'",
                                        offset + l,
                                        entry.node
                                    ),
                                ));
                            }
                            *l
                        }
                        None => avail - offset,
                    };

                    (offset, length)
                }
                EntryKind::Header(_) => (0, 1),
                EntryKind::Timestamp { field, .. } => {
                    (0, if *field == TsField::Both { 2 } else { 1 })
                }
                EntryKind::Stats { .. } => (0, 1),
            };

            self.entries[i].compiled = Some(Compiled {
                source,
                src_offset,
                length,
                out_offset,
                signals: src_signals,
                stats,
            });

            let entry = &self.entries[i];
            for j in 0..length {
                signals.set(out_offset + j, entry.to_signal(j));
            }
            out_offset += length;
        }

        self.signals = Some(Arc::new(signals));
        Ok(())
    }

    /// Destination signal list. Only valid after `prepare`.
    pub fn output_signals(&self) -> Arc<SignalList> {
        self.signals.clone().unwrap_or_else(SignalList::empty)
    }

    pub fn output_len(&self) -> usize {
        self.signals.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// Applies the compiled plan: fills `out` from the latest sample of
    /// each source. Sources with no sample yet contribute nothing, so the
    /// destination keeps whatever it was seeded with.
    pub fn remap(&self, out: &mut Sample, latest: &[Option<SampleBox>]) {
        let mut max_len = out.len();

        for entry in &self.entries {
            let Some(compiled) = entry.compiled.as_ref() else {
                continue;
            };
            let Some(src) = latest.get(compiled.source).and_then(|s| s.as_ref()) else {
                continue;
            };

            let at = compiled.out_offset;
            match &entry.kind {
                EntryKind::Data { .. } => {
                    // Only values the source actually carries; a short
                    // sample leaves the tail of the slice untouched.
                    let have = src.len().saturating_sub(compiled.src_offset);
                    let n = compiled.length.min(have);
                    if n > 0 {
                        let src_data = &src.data()[compiled.src_offset..compiled.src_offset + n];
                        out.data_mut()[at..at + n].copy_from_slice(src_data);
                        max_len = max_len.max(at + n);
                    }
                }

                EntryKind::Header(field) => {
                    let v = match field {
                        HeaderField::Length => src.len() as i64,
                        HeaderField::Sequence => src.sequence as i64,
                    };
                    out.data_mut()[at] = SignalData::integer(v);
                    max_len = max_len.max(at + 1);
                }

                EntryKind::Timestamp { kind, field } => {
                    let ts = match kind {
                        TsKind::Origin => src.ts.origin,
                        TsKind::Received => src.ts.received,
                    };
                    match field {
                        TsField::Both => {
                            out.data_mut()[at] = SignalData::integer(ts.sec);
                            out.data_mut()[at + 1] = SignalData::integer(ts.nsec);
                            max_len = max_len.max(at + 2);
                        }
                        TsField::Seconds => {
                            out.data_mut()[at] = SignalData::integer(ts.sec);
                            max_len = max_len.max(at + 1);
                        }
                        TsField::Nanoseconds => {
                            out.data_mut()[at] = SignalData::integer(ts.nsec);
                            max_len = max_len.max(at + 1);
                        }
                    }
                }

                EntryKind::Stats { metric, aggregate } => {
                    if let Some(stats) = &compiled.stats {
                        let v = stats.get(*metric, *aggregate);
                        out.data_mut()[at] = match aggregate {
                            Aggregate::Total => SignalData::integer(v as i64),
                            _ => SignalData::float(v),
                        };
                        max_len = max_len.max(at + 1);
                    }
                }
            }
        }

        out.set_len(max_len);
        if max_len > 0 {
            out.flags.insert(SampleFlags::DATA);
        }
    }
}

fn parse_entry(value: &Value) -> Result<MappingEntry, ConfigError> {
    match value {
        Value::String(s) => parse_shorthand(s),
        Value::Object(_) => {
            let cfg: EntryConfig = basalt_config::from_value(value)?;
            parse_object(cfg)
        }
        _ => Err(ConfigError::invalid(
            "in",
            "mapping entries are strings or objects",
        )),
    }
}

fn parse_object(cfg: EntryConfig) -> Result<MappingEntry, ConfigError> {
    let kind = match cfg.ty.as_deref().unwrap_or("data") {
        "data" => EntryKind::Data {
            offset: cfg.offset.unwrap_or(0),
            length: cfg.length,
            name: cfg.signal,
        },
        "header" | "hdr" => {
            let field = match cfg.field.as_deref() {
                Some("length") => HeaderField::Length,
                Some("sequence") | None => HeaderField::Sequence,
                Some(other) => return Err(ConfigError::unknown("header field", other)),
            };
            EntryKind::Header(field)
        }
        "ts" | "timestamp" => {
            let (kind, field) = parse_ts_field(cfg.field.as_deref().unwrap_or("origin"))?;
            EntryKind::Timestamp { kind, field }
        }
        "stats" => {
            let metric = match cfg.metric.as_deref() {
                Some(m) => Metric::from_str(m)?,
                None => Metric::Smps,
            };
            let aggregate = match cfg.aggregate.as_deref() {
                Some(a) => Aggregate::from_str(a)?,
                None => Aggregate::Last,
            };
            EntryKind::Stats { metric, aggregate }
        }
        other => return Err(ConfigError::unknown("mapping type", other)),
    };

    Ok(MappingEntry {
        node: cfg.node,
        kind,
        compiled: None,
    })
}

fn parse_shorthand(s: &str) -> Result<MappingEntry, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::invalid("in", "empty mapping entry"));
    }

    let (node, rest) = match s.split_once('.') {
        Some((node, rest)) => (node, Some(rest)),
        None => (s, None),
    };

    if node.is_empty() {
        return Err(ConfigError::invalid("in", format!("missing node in '{s}'")));
    }

    let kind = match rest {
        // Bare node name: the node's whole data.
        None => EntryKind::Data {
            offset: 0,
            length: None,
            name: None,
        },
        Some(rest) => {
            let (what, detail) = match rest.split_once('.') {
                Some((what, detail)) => (what, Some(detail)),
                None => (rest, None),
            };

            // `data[...]` arrives as one token without a dot.
            let (what, bracket) = match what.split_once('[') {
                Some((w, b)) => {
                    let b = b.strip_suffix(']').ok_or_else(|| {
                        ConfigError::invalid("in", format!("unterminated '[' in '{s}'"))
                    })?;
                    (w, Some(b))
                }
                None => (what, None),
            };

            match what {
                "data" => match (bracket, detail) {
                    (Some(sel), None) => parse_data_selector(sel, s)?,
                    (None, Some(name)) => EntryKind::Data {
                        offset: 0,
                        length: Some(1),
                        name: Some(name.to_string()),
                    },
                    (None, None) => EntryKind::Data {
                        offset: 0,
                        length: None,
                        name: None,
                    },
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::invalid("in", format!("ambiguous entry '{s}'")));
                    }
                },

                "hdr" | "header" => match detail {
                    Some("length") => EntryKind::Header(HeaderField::Length),
                    Some("sequence") => EntryKind::Header(HeaderField::Sequence),
                    other => {
                        return Err(ConfigError::unknown(
                            "header field",
                            other.unwrap_or("").to_string(),
                        ));
                    }
                },

                "ts" => {
                    let (kind, field) = parse_ts_field(detail.unwrap_or("origin"))?;
                    EntryKind::Timestamp { kind, field }
                }

                "stats" => {
                    let detail = detail.ok_or_else(|| {
                        ConfigError::invalid("in", format!("missing stats field in '{s}'"))
                    })?;
                    match detail.split_once('.') {
                        Some((metric, aggregate)) => EntryKind::Stats {
                            metric: Metric::from_str(metric)?,
                            aggregate: Aggregate::from_str(aggregate)?,
                        },
                        // A single token is an aggregate over throughput.
                        None => EntryKind::Stats {
                            metric: Metric::Smps,
                            aggregate: Aggregate::from_str(detail)?,
                        },
                    }
                }

                other => return Err(ConfigError::unknown("mapping type", other)),
            }
        }
    };

    Ok(MappingEntry {
        node: node.to_string(),
        kind,
        compiled: None,
    })
}

fn parse_data_selector(sel: &str, whole: &str) -> Result<EntryKind, ConfigError> {
    let parse_idx = |t: &str| -> Result<usize, ConfigError> {
        t.parse()
            .map_err(|_| ConfigError::invalid("in", format!("bad index '{t}' in '{whole}'")))
    };

    if let Some((a, n)) = sel.split_once(':') {
        // offset:length
        let offset = parse_idx(a)?;
        let length = parse_idx(n)?;
        return Ok(EntryKind::Data {
            offset,
            length: Some(length),
            name: None,
        });
    }

    if let Some((a, b)) = sel.split_once('-') {
        // first-last, inclusive
        let first = parse_idx(a)?;
        let last = parse_idx(b)?;
        if last < first {
            return Err(ConfigError::invalid(
                "in",
                format!("descending range in '{whole}'"),
            ));
        }
        return Ok(EntryKind::Data {
            offset: first,
            length: Some(last - first + 1),
            name: None,
        });
    }

    if sel.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(EntryKind::Data {
            offset: parse_idx(sel)?,
            length: Some(1),
            name: None,
        });
    }

    // A name between the brackets.
    Ok(EntryKind::Data {
        offset: 0,
        length: Some(1),
        name: Some(sel.to_string()),
    })
}

fn parse_ts_field(detail: &str) -> Result<(TsKind, TsField), ConfigError> {
    let (kind_str, field_str) = match detail.split_once('.') {
        Some((k, f)) => (k, Some(f)),
        None => (detail, None),
    };

    let kind = match kind_str {
        "origin" => TsKind::Origin,
        "received" => TsKind::Received,
        other => return Err(ConfigError::unknown("timestamp", other)),
    };

    let field = match field_str {
        None => TsField::Both,
        Some("sec") => TsField::Seconds,
        Some("nsec") => TsField::Nanoseconds,
        Some(other) => return Err(ConfigError::unknown("timestamp field", other)),
    };

    Ok((kind, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_icc::{PoolConfig, SamplePool};
    use basalt_util::TimeSpec;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeGraph {
        signals: HashMap<String, Arc<SignalList>>,
        stats: HashMap<String, Arc<Stats>>,
    }

    impl FakeGraph {
        fn new() -> Self {
            Self {
                signals: HashMap::new(),
                stats: HashMap::new(),
            }
        }

        fn with_node(mut self, name: &str, count: usize) -> Self {
            self.signals
                .insert(name.to_string(), Arc::new(SignalList::floats(count)));
            self.stats.insert(name.to_string(), Arc::new(Stats::new()));
            self
        }
    }

    impl SourceResolver for FakeGraph {
        fn input_signals(&self, node: &str) -> Option<Arc<SignalList>> {
            self.signals.get(node).cloned()
        }

        fn node_stats(&self, node: &str) -> Option<Arc<Stats>> {
            self.stats.get(node).cloned()
        }
    }

    fn filled(pool: &SamplePool, seq: u64, values: &[f64]) -> SampleBox {
        let mut smp = pool.acquire().unwrap();
        smp.sequence = seq;
        smp.ts.origin = TimeSpec::new(100, 7);
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA;
        for (i, v) in values.iter().enumerate() {
            smp.data_mut()[i] = SignalData::float(*v);
        }
        smp.set_len(values.len());
        smp
    }

    #[test]
    fn shorthand_forms_parse() {
        let cases = [
            ("node1", EntryKind::Data { offset: 0, length: None, name: None }),
            ("node1.data[3]", EntryKind::Data { offset: 3, length: Some(1), name: None }),
            ("node1.data[0:16]", EntryKind::Data { offset: 0, length: Some(16), name: None }),
            ("node1.data[2-5]", EntryKind::Data { offset: 2, length: Some(4), name: None }),
            (
                "node1.data.voltage",
                EntryKind::Data { offset: 0, length: Some(1), name: Some("voltage".into()) },
            ),
            ("node1.hdr.sequence", EntryKind::Header(HeaderField::Sequence)),
            ("node1.hdr.length", EntryKind::Header(HeaderField::Length)),
            (
                "node1.ts.origin",
                EntryKind::Timestamp { kind: TsKind::Origin, field: TsField::Both },
            ),
            (
                "node1.ts.origin.sec",
                EntryKind::Timestamp { kind: TsKind::Origin, field: TsField::Seconds },
            ),
            (
                "node1.stats.owd.mean",
                EntryKind::Stats { metric: Metric::Owd, aggregate: Aggregate::Mean },
            ),
            (
                "node1.stats.total",
                EntryKind::Stats { metric: Metric::Smps, aggregate: Aggregate::Total },
            ),
        ];

        for (text, kind) in cases {
            let entry = parse_shorthand(text).unwrap();
            assert_eq!(entry.node, "node1");
            assert_eq!(entry.kind, kind, "parsing '{text}'");
        }
    }

    #[test]
    fn rejects_malformed_entries() {
        for bad in ["", ".data", "n.data[3", "n.data[5-2]", "n.frobnicate", "n.stats"] {
            assert!(parse_shorthand(bad).is_err(), "should reject '{bad}'");
        }
    }

    #[test]
    fn long_form_matches_shorthand() {
        let a = Mapping::parse(&json!("src.data[0:4]")).unwrap();
        let b = Mapping::parse(&json!({ "node": "src", "type": "data", "offset": 0, "length": 4 }))
            .unwrap();
        assert_eq!(a.entries()[0].kind, b.entries()[0].kind);
    }

    #[test]
    fn prepare_concatenates_outputs() {
        let graph = FakeGraph::new().with_node("a", 4).with_node("b", 2);
        let mut mapping =
            Mapping::parse(&json!(["a.data[0:2]", "b.hdr.sequence", "b.ts.origin"])).unwrap();
        mapping.prepare(&graph).unwrap();

        assert_eq!(mapping.output_len(), 5);
        assert_eq!(mapping.source_nodes(), &["a".to_string(), "b".to_string()]);

        let signals = mapping.output_signals();
        assert_eq!(signals[2].name, "b.hdr.sequence");
        assert_eq!(signals[2].ty, SignalType::Integer);
        assert_eq!(signals[3].name, "b.ts.origin.sec");
        assert_eq!(signals[4].name, "b.ts.origin.nsec");
    }

    #[test]
    fn prepare_rejects_out_of_range_slices() {
        let graph = FakeGraph::new().with_node("a", 2);
        let mut mapping = Mapping::parse(&json!("a.data[0:5]")).unwrap();
        assert!(mapping.prepare(&graph).is_err());
    }

    #[test]
    fn prepare_rejects_unknown_nodes() {
        let graph = FakeGraph::new().with_node("a", 2);
        let mut mapping = Mapping::parse(&json!("ghost")).unwrap();
        assert!(mapping.prepare(&graph).is_err());
    }

    #[test]
    fn remap_concatenates_two_sources() {
        let graph = FakeGraph::new().with_node("a", 1).with_node("b", 1);
        let mut mapping = Mapping::parse(&json!(["a", "b"])).unwrap();
        mapping.prepare(&graph).unwrap();

        let pool = SamplePool::new(&PoolConfig::heap(8, 4)).unwrap();
        let latest = vec![
            Some(filled(&pool, 10, &[1.5])),
            Some(filled(&pool, 20, &[2.5])),
        ];

        let mut out = pool.acquire().unwrap();
        out.set_signals(mapping.output_signals());
        mapping.remap(&mut out, &latest);

        assert_eq!(out.len(), 2);
        assert_eq!(out.data()[0].as_float(), 1.5);
        assert_eq!(out.data()[1].as_float(), 2.5);
        assert!(out.flags.contains(SampleFlags::DATA));
    }

    #[test]
    fn remap_header_and_ts_words() {
        let graph = FakeGraph::new().with_node("a", 1);
        let mut mapping =
            Mapping::parse(&json!(["a.hdr.sequence", "a.ts.origin", "a.hdr.length"])).unwrap();
        mapping.prepare(&graph).unwrap();

        let pool = SamplePool::new(&PoolConfig::heap(4, 8)).unwrap();
        let latest = vec![Some(filled(&pool, 77, &[9.0]))];

        let mut out = pool.acquire().unwrap();
        out.set_signals(mapping.output_signals());
        mapping.remap(&mut out, &latest);

        assert_eq!(out.len(), 4);
        assert_eq!(out.data()[0].as_int(), 77);
        assert_eq!(out.data()[1].as_int(), 100);
        assert_eq!(out.data()[2].as_int(), 7);
        assert_eq!(out.data()[3].as_int(), 1);
    }

    #[test]
    fn remap_skips_absent_sources() {
        let graph = FakeGraph::new().with_node("a", 1).with_node("b", 1);
        let mut mapping = Mapping::parse(&json!(["a", "b"])).unwrap();
        mapping.prepare(&graph).unwrap();

        let pool = SamplePool::new(&PoolConfig::heap(4, 4)).unwrap();
        let latest = vec![None, Some(filled(&pool, 1, &[3.0]))];

        let mut out = pool.acquire().unwrap();
        out.set_signals(mapping.output_signals());
        mapping.remap(&mut out, &latest);

        // Slot 0 keeps its seed value, slot 1 carries b's data.
        assert_eq!(out.len(), 2);
        assert_eq!(out.data()[1].as_float(), 3.0);
    }

    #[test]
    fn stats_entries_read_live_aggregates() {
        let graph = FakeGraph::new().with_node("a", 1);
        graph.stats["a"].record(Metric::Owd, 0.5);
        graph.stats["a"].record(Metric::Owd, 1.5);

        let mut mapping = Mapping::parse(&json!(["a", "a.stats.owd.mean"])).unwrap();
        mapping.prepare(&graph).unwrap();

        let pool = SamplePool::new(&PoolConfig::heap(4, 4)).unwrap();
        let latest = vec![Some(filled(&pool, 1, &[0.0]))];

        let mut out = pool.acquire().unwrap();
        out.set_signals(mapping.output_signals());
        mapping.remap(&mut out, &latest);

        assert_eq!(out.data()[1].as_float(), 1.0);
    }
}
