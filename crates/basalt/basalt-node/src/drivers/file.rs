//! File endpoint: replays records through a format on the read side,
//! appends them on the write side.
//!
//! End-of-file behavior is configurable: `stop` winds the node (and with
//! it the supervisor) down, `rewind` starts the file over, `wait` polls
//! for a growing file. A read `rate` turns replay into paced playback via
//! a timer descriptor, which also makes the node usable in polled paths.

use basalt_config::ConfigError;
use basalt_format::{Format, FormatError};
use basalt_icc::SampleBox;
use basalt_util::TimerFd;
use serde::Deserialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

use crate::NodeError;
use crate::node::{DriverContext, NodeDriver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EofBehavior {
    Stop,
    Rewind,
    Wait,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    uri: String,
    #[serde(default = "defaults::format")]
    format: Value,
    #[serde(rename = "in", default)]
    input: Option<FileInConfig>,
    #[serde(rename = "out", default)]
    output: Option<FileOutConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct FileInConfig {
    #[serde(default)]
    eof: Option<String>,
    #[serde(default)]
    rate: Option<f64>,
    #[serde(default)]
    skip: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct FileOutConfig {
    #[serde(default)]
    flush: Option<bool>,
}

mod defaults {
    pub fn format() -> serde_json::Value {
        serde_json::Value::String("villas.human".into())
    }
}

pub struct FileDriver {
    uri: String,
    format_cfg: Value,
    eof: EofBehavior,
    rate: f64,
    skip: usize,
    flush: bool,

    formatter: Option<Box<dyn Format>>,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    timer: Option<TimerFd>,
    wrote_header: bool,
    decode_errors: u64,
}

impl FileDriver {
    pub fn new() -> Self {
        Self {
            uri: String::new(),
            format_cfg: defaults::format(),
            eof: EofBehavior::Stop,
            rate: 0.0,
            skip: 0,
            flush: false,
            formatter: None,
            reader: None,
            writer: None,
            timer: None,
            wrote_header: false,
            decode_errors: 0,
        }
    }

    fn open_reader(&mut self) -> Result<(), NodeError> {
        let file = File::open(&self.uri)?;
        let mut reader = BufReader::new(file);

        let mut skipped = String::new();
        for _ in 0..self.skip {
            skipped.clear();
            reader.read_line(&mut skipped)?;
        }

        self.reader = Some(reader);
        Ok(())
    }

    fn open_writer(&mut self) -> Result<(), NodeError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.uri)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

impl Default for FileDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDriver for FileDriver {
    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: FileConfig = basalt_config::from_value(cfg)?;

        self.uri = cfg.uri;
        self.format_cfg = cfg.format;

        if let Some(input) = cfg.input {
            self.eof = match input.eof.as_deref() {
                None | Some("stop") | Some("exit") => EofBehavior::Stop,
                Some("rewind") => EofBehavior::Rewind,
                Some("wait") => EofBehavior::Wait,
                Some(other) => return Err(ConfigError::unknown("eof mode", other)),
            };
            self.rate = input.rate.unwrap_or(0.0);
            if self.rate < 0.0 {
                return Err(ConfigError::invalid("rate", "must not be negative"));
            }
            self.skip = input.skip.unwrap_or(0);
        }

        if let Some(output) = cfg.output {
            self.flush = output.flush.unwrap_or(false);
        }

        Ok(())
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.uri.is_empty() {
            return Err(ConfigError::Missing("uri"));
        }
        Ok(())
    }

    fn start(&mut self, ctx: &DriverContext) -> Result<(), NodeError> {
        self.formatter = Some(
            basalt_format::lookup(&self.format_cfg, ctx.in_signals.clone())
                .map_err(|e| NodeError::driver(e.to_string()))?,
        );

        if self.rate > 0.0 {
            let timer = TimerFd::new()?;
            timer.set_rate(self.rate)?;
            self.timer = Some(timer);
        }

        self.reader = None;
        self.writer = None;
        self.wrote_header = false;
        self.decode_errors = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        self.reader = None;
        if let Some(timer) = self.timer.take() {
            let _ = timer.stop();
        }
        Ok(())
    }

    fn read(&mut self, smps: &mut [SampleBox]) -> Result<usize, NodeError> {
        if self.reader.is_none() {
            self.open_reader()?;
        }

        // Paced replay: emit at most as many records as timer ticks.
        let budget = match &self.timer {
            Some(timer) => {
                let due = timer.expirations() as usize;
                if due == 0 {
                    return Ok(0);
                }
                due.min(smps.len())
            }
            None => smps.len(),
        };

        let Some(formatter) = self.formatter.as_ref() else {
            return Err(NodeError::driver("file node not started"));
        };
        let Some(reader) = self.reader.as_mut() else {
            return Err(NodeError::driver("file node has no reader"));
        };

        match formatter.scan(reader, &mut smps[..budget]) {
            Ok(n) => Ok(n),
            Err(FormatError::Eof) => match self.eof {
                EofBehavior::Stop => {
                    debug!("file '{uri}' reached end of stream", uri = self.uri);
                    Err(NodeError::Stopping)
                }
                EofBehavior::Rewind => {
                    debug!("file '{uri}' rewinding", uri = self.uri);
                    self.reader = None;
                    self.open_reader()?;
                    Ok(0)
                }
                EofBehavior::Wait => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    Ok(0)
                }
            },
            Err(FormatError::Invalid(reason)) => {
                // Skip the bad record; warn only on the first few so a
                // corrupt file cannot flood the log.
                self.decode_errors += 1;
                if self.decode_errors <= 3 {
                    warn!(
                        "file '{uri}': skipping undecodable record: {reason}",
                        uri = self.uri
                    );
                }
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, smps: &[SampleBox]) -> Result<usize, NodeError> {
        if self.writer.is_none() {
            self.open_writer()?;
        }

        let Some(formatter) = self.formatter.as_ref() else {
            return Err(NodeError::driver("file node not started"));
        };
        let Some(writer) = self.writer.as_mut() else {
            return Err(NodeError::driver("file node has no writer"));
        };

        if !self.wrote_header {
            formatter.header(writer)?;
            self.wrote_header = true;
        }

        let n = formatter.print(writer, smps)?;
        if self.flush {
            writer.flush()?;
        }
        Ok(n)
    }

    fn poll_fds(&self) -> Vec<RawFd> {
        match &self.timer {
            Some(timer) => vec![timer.fd()],
            None => Vec::new(),
        }
    }
}
