//! Newline-delimited JSON records.
//!
//! One object per line:
//!
//! ```text
//! {"sequence": 8, "ts_origin": [100, 200], "ts_received": [100, 999], "data": [1.0, 2]}
//! ```
//!
//! Fields appear only when the corresponding sample flag is set. Complex
//! values are objects with `real` and `imag`.

use basalt_icc::SampleBox;
use basalt_sample::{Sample, SampleFlags, SignalData, SignalList, SignalType};
use basalt_util::TimeSpec;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::{Format, FormatError};

pub struct Json {
    signals: Arc<SignalList>,
    /// Restricts which fields are emitted; a sample flag that is masked
    /// out here is treated as absent.
    mask: SampleFlags,
}

impl Json {
    pub fn new(signals: Arc<SignalList>) -> Self {
        Self {
            signals,
            mask: SampleFlags::ALL,
        }
    }

    pub fn with_mask(signals: Arc<SignalList>, mask: SampleFlags) -> Self {
        Self { signals, mask }
    }

    fn to_value(&self, smp: &Sample) -> Value {
        let mut obj = serde_json::Map::new();
        let flags = smp.flags & self.mask;

        if flags.contains(SampleFlags::SEQUENCE) {
            obj.insert("sequence".into(), json!(smp.sequence));
        }
        if flags.contains(SampleFlags::TS_ORIGIN) {
            obj.insert(
                "ts_origin".into(),
                json!([smp.ts.origin.sec, smp.ts.origin.nsec]),
            );
        }
        if flags.contains(SampleFlags::TS_RECEIVED) {
            obj.insert(
                "ts_received".into(),
                json!([smp.ts.received.sec, smp.ts.received.nsec]),
            );
        }
        if flags.contains(SampleFlags::DATA) {
            let data: Vec<Value> = smp
                .data()
                .iter()
                .enumerate()
                .map(|(i, v)| v.to_json(smp.signal_type(i)))
                .collect();
            obj.insert("data".into(), Value::Array(data));
        }

        Value::Object(obj)
    }

    fn from_value(&self, value: &Value, smp: &mut Sample) -> Result<(), FormatError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FormatError::invalid("record is not a JSON object"))?;

        let mut flags = SampleFlags::NONE;

        if let Some(seq) = obj.get("sequence") {
            smp.sequence = seq
                .as_u64()
                .ok_or_else(|| FormatError::invalid("sequence is not an unsigned integer"))?;
            flags.insert(SampleFlags::SEQUENCE);
        }

        if let Some(ts) = obj.get("ts_origin") {
            smp.ts.origin = parse_ts(ts)?;
            flags.insert(SampleFlags::TS_ORIGIN);
        }

        if let Some(ts) = obj.get("ts_received") {
            smp.ts.received = parse_ts(ts)?;
            flags.insert(SampleFlags::TS_RECEIVED);
        }

        if let Some(data) = obj.get("data") {
            let values = data
                .as_array()
                .ok_or_else(|| FormatError::invalid("data is not an array"))?;

            let n = values.len().min(smp.capacity());
            for (i, v) in values.iter().take(n).enumerate() {
                let ty = self
                    .signals
                    .get(i)
                    .map(|s| s.ty)
                    .unwrap_or_else(|| detect(v));
                smp.data_mut()[i] =
                    SignalData::from_json(ty, v).map_err(FormatError::Invalid)?;
            }
            smp.set_len(n);
            flags.insert(SampleFlags::DATA);
        } else {
            smp.set_len(0);
        }

        smp.set_signals(self.signals.clone());
        smp.flags = flags;
        Ok(())
    }
}

fn parse_ts(value: &Value) -> Result<TimeSpec, FormatError> {
    let parts = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| FormatError::invalid("timestamp is not a [sec, nsec] pair"))?;
    let sec = parts[0]
        .as_i64()
        .ok_or_else(|| FormatError::invalid("timestamp seconds is not an integer"))?;
    let nsec = parts[1]
        .as_i64()
        .ok_or_else(|| FormatError::invalid("timestamp nanoseconds is not an integer"))?;
    Ok(TimeSpec::new(sec, nsec))
}

fn detect(value: &Value) -> SignalType {
    SignalType::detect(value)
}

impl Format for Json {
    fn sprint(&self, buf: &mut [u8], smps: &[SampleBox]) -> Result<(usize, usize), FormatError> {
        let mut written = 0;
        let mut count = 0;

        for smp in smps {
            let mut line = serde_json::to_string(&self.to_value(smp))
                .map_err(|e| FormatError::invalid(e.to_string()))?;
            line.push('\n');

            if written + line.len() > buf.len() {
                if count == 0 {
                    return Err(FormatError::Overrun);
                }
                break;
            }

            buf[written..written + line.len()].copy_from_slice(line.as_bytes());
            written += line.len();
            count += 1;
        }

        Ok((count, written))
    }

    fn sscan(&self, buf: &[u8], smps: &mut [SampleBox]) -> Result<(usize, usize), FormatError> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| FormatError::invalid("record is not valid utf-8"))?;

        let mut consumed = 0;
        let mut count = 0;

        while count < smps.len() && consumed < text.len() {
            let rest = &text[consumed..];
            let (line, advance, complete) = match rest.find('\n') {
                Some(at) => (&rest[..at], at + 1, true),
                None => (rest, rest.len(), false),
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                consumed += advance;
                continue;
            }

            let parsed: Result<Value, _> = serde_json::from_str(trimmed);
            match parsed {
                Ok(value) => {
                    self.from_value(&value, &mut smps[count])?;
                    consumed += advance;
                    count += 1;
                }
                Err(e) if !complete => {
                    if count == 0 {
                        return Err(FormatError::invalid(e.to_string()));
                    }
                    break;
                }
                Err(e) => return Err(FormatError::invalid(e.to_string())),
            }
        }

        Ok((count, consumed))
    }
}
