//! Bidirectional byte codecs over samples.
//!
//! A format turns samples into bytes and back, byte-exactly within its
//! precision class. Node drivers that need framing (files, datagrams)
//! construct one at start and keep it for the life of the connection;
//! in-process nodes never touch this layer.
//!
//! The buffer-level pair `sprint`/`sscan` is the contract; the stream
//! variants `print`/`scan` are layered on top and only exist so file-like
//! drivers do not reimplement buffering.

use basalt_config::ConfigError;
use basalt_icc::SampleBox;
use basalt_sample::SignalList;
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;

pub mod binary;
pub mod csv;
pub mod human;
pub mod json;
pub mod protobuf;
pub mod raw;

#[cfg(test)]
pub(crate) mod testutil;

pub use binary::VillasBinary;
pub use csv::Csv;
pub use human::VillasHuman;
pub use json::Json;
pub use protobuf::Protobuf;
pub use raw::{Endianess, Raw, RawConfig};

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The buffer ends in the middle of a record.
    #[error("record truncated")]
    Truncated,

    /// A token or header field does not parse.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The output buffer cannot hold a single record; grow and retry.
    #[error("buffer overrun")]
    Overrun,

    /// The underlying stream is exhausted.
    #[error("end of stream")]
    Eof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FormatError {
    pub fn invalid(msg: impl Into<String>) -> FormatError {
        FormatError::Invalid(msg.into())
    }
}

/// A byte codec over samples.
///
/// `sprint` emits as many whole samples as fit and reports `(count,
/// wbytes)`; it fails with [`FormatError::Overrun`] only when not even the
/// first sample fits. `sscan` decodes up to `smps.len()` records and
/// reports `(count, rbytes)`; trailing bytes that do not form a complete
/// record are left unconsumed.
pub trait Format: Send + Sync {
    fn sprint(&self, buf: &mut [u8], smps: &[SampleBox]) -> Result<(usize, usize), FormatError>;

    fn sscan(&self, buf: &[u8], smps: &mut [SampleBox]) -> Result<(usize, usize), FormatError>;

    /// Writes all samples to a stream, growing the intermediate buffer as
    /// needed.
    fn print(&self, w: &mut dyn Write, smps: &[SampleBox]) -> Result<usize, FormatError> {
        let mut buf = vec![0u8; 4096];
        let mut done = 0;

        while done < smps.len() {
            match self.sprint(&mut buf, &smps[done..]) {
                Ok((n, wbytes)) => {
                    w.write_all(&buf[..wbytes])?;
                    done += n;
                }
                Err(FormatError::Overrun) => {
                    let grown = buf.len() * 2;
                    buf.resize(grown, 0);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// Reads up to `smps.len()` records from a stream.
    ///
    /// The default implementation is line-oriented and fits every textual
    /// format; framed binary formats override it.
    fn scan(&self, r: &mut dyn BufRead, smps: &mut [SampleBox]) -> Result<usize, FormatError> {
        let mut line = String::new();
        let mut n = 0;

        while n < smps.len() {
            line.clear();
            let bytes = r.read_line(&mut line)?;
            if bytes == 0 {
                if n == 0 {
                    return Err(FormatError::Eof);
                }
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (k, _) = self.sscan(line.as_bytes(), &mut smps[n..n + 1])?;
            n += k;
        }

        Ok(n)
    }

    /// Optional header line emitted once at the top of a stream.
    fn header(&self, _w: &mut dyn Write) -> std::io::Result<()> {
        Ok(())
    }
}

/// Parsed `format` setting: a bare name or an object with parameters.
#[derive(Debug, Deserialize)]
struct FormatParams {
    name: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

/// Instantiates a format by name.
///
/// `signals` types the decode direction: it says how many values a record
/// carries and how each one is interpreted.
pub fn lookup(spec: &Value, signals: Arc<SignalList>) -> Result<Box<dyn Format>, ConfigError> {
    let (name, params) = match spec {
        Value::String(name) => (name.clone(), Value::Object(Default::default())),
        Value::Object(_) => {
            let p: FormatParams = basalt_config::from_value(spec)?;
            (p.name, Value::Object(p.rest))
        }
        _ => {
            return Err(ConfigError::invalid(
                "format",
                "expected a format name or an object with a 'name'",
            ));
        }
    };

    match name.as_str() {
        "villas.human" => Ok(Box::new(VillasHuman::new(signals))),
        "villas.binary" => Ok(Box::new(VillasBinary::new(signals))),
        "json" => Ok(Box::new(Json::new(signals))),
        "protobuf" => Ok(Box::new(Protobuf::new(signals))),
        "csv" => Ok(Box::new(Csv::new(signals, ','))),
        "tsv" => Ok(Box::new(Csv::new(signals, '\t'))),
        "raw" => {
            let cfg: RawConfig = basalt_config::from_value(&params)?;
            Ok(Box::new(Raw::new(signals, cfg)?))
        }
        "gtnet" => {
            // GTNET-SKT speaks 32-bit big-endian words on the wire.
            #[derive(Deserialize)]
            struct GtnetParams {
                #[serde(default)]
                fake: bool,
            }
            let p: GtnetParams = basalt_config::from_value(&params)?;
            let cfg = RawConfig {
                bits: 32,
                endianess: Some(Endianess::Big),
                fake: p.fake,
            };
            Ok(Box::new(Raw::new(signals, cfg)?))
        }
        other => Err(ConfigError::unknown("format", other)),
    }
}
