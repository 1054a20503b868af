//! Protobuf wire encoding of samples.
//!
//! Each record is one varint-length-delimited message; the message
//! carries the same field set as the json codec:
//!
//! ```text
//! Sample {
//!   uint64    sequence    = 1;   // varint
//!   Timestamp ts_origin   = 2;   // nested: sec = 1, nsec = 2 (varints)
//!   Timestamp ts_received = 3;
//!   repeated Value data   = 4;   // nested oneof:
//!                                //   bool    b = 1 (varint)
//!                                //   int64   i = 2 (varint, two's complement)
//!                                //   double  f = 3 (fixed64)
//!                                //   Complex z = 4 (nested: re = 1, im = 2, fixed32)
//! }
//! ```
//!
//! Fields are present only when the corresponding sample flag is set, and
//! unknown fields are skipped by wire type, so the stream stays readable
//! across schema growth. The codec is hand-rolled: the schema is four
//! small fixed messages, which is not worth a code generation step.

use basalt_icc::SampleBox;
use basalt_sample::{Sample, SampleFlags, SignalData, SignalList, SignalValue};
use basalt_util::TimeSpec;
use std::io::BufRead;
use std::sync::Arc;

use crate::{Format, FormatError};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Upper bound on one record; anything larger is a corrupt stream, not a
/// sample.
const MAX_RECORD: u64 = 1 << 24;

pub struct Protobuf {
    signals: Arc<SignalList>,
}

impl Protobuf {
    pub fn new(signals: Arc<SignalList>) -> Self {
        Self { signals }
    }

    fn encode_sample(&self, smp: &Sample, msg: &mut Vec<u8>) {
        if smp.flags.contains(SampleFlags::SEQUENCE) {
            put_tag(msg, 1, WIRE_VARINT);
            put_varint(msg, smp.sequence);
        }

        if smp.flags.contains(SampleFlags::TS_ORIGIN) {
            put_nested(msg, 2, &encode_ts(smp.ts.origin));
        }
        if smp.flags.contains(SampleFlags::TS_RECEIVED) {
            put_nested(msg, 3, &encode_ts(smp.ts.received));
        }

        let mut value = Vec::with_capacity(16);
        for (i, data) in smp.data().iter().enumerate() {
            value.clear();
            match data.get(smp.signal_type(i)) {
                SignalValue::Boolean(b) => {
                    put_tag(&mut value, 1, WIRE_VARINT);
                    put_varint(&mut value, b as u64);
                }
                SignalValue::Integer(v) => {
                    put_tag(&mut value, 2, WIRE_VARINT);
                    put_varint(&mut value, v as u64);
                }
                SignalValue::Float(f) => {
                    put_tag(&mut value, 3, WIRE_FIXED64);
                    value.extend_from_slice(&f.to_bits().to_le_bytes());
                }
                SignalValue::Complex(re, im) => {
                    let mut z = Vec::with_capacity(10);
                    put_tag(&mut z, 1, WIRE_FIXED32);
                    z.extend_from_slice(&re.to_bits().to_le_bytes());
                    put_tag(&mut z, 2, WIRE_FIXED32);
                    z.extend_from_slice(&im.to_bits().to_le_bytes());
                    put_nested(&mut value, 4, &z);
                }
            }
            put_nested(msg, 4, &value);
        }
    }

    fn decode_sample(&self, msg: &[u8], smp: &mut Sample) -> Result<(), FormatError> {
        let mut at = 0;
        let mut flags = SampleFlags::NONE;
        let mut n = 0;

        while at < msg.len() {
            let key = get_varint(msg, &mut at)?;
            let field = (key >> 3) as u32;
            let wire = (key & 7) as u8;

            match (field, wire) {
                (1, WIRE_VARINT) => {
                    smp.sequence = get_varint(msg, &mut at)?;
                    flags.insert(SampleFlags::SEQUENCE);
                }
                (2, WIRE_LEN) | (3, WIRE_LEN) => {
                    let nested = get_slice(msg, &mut at)?;
                    let ts = decode_ts(nested)?;
                    if field == 2 {
                        smp.ts.origin = ts;
                        flags.insert(SampleFlags::TS_ORIGIN);
                    } else {
                        smp.ts.received = ts;
                        flags.insert(SampleFlags::TS_RECEIVED);
                    }
                }
                (4, WIRE_LEN) => {
                    let nested = get_slice(msg, &mut at)?;
                    if n < smp.capacity() {
                        smp.data_mut()[n] = decode_value(nested)?;
                        n += 1;
                    }
                }
                _ => skip_field(msg, &mut at, wire)?,
            }
        }

        smp.set_len(n);
        if n > 0 {
            flags.insert(SampleFlags::DATA);
        }

        smp.set_signals(self.signals.clone());
        smp.flags = flags;
        Ok(())
    }
}

fn put_tag(out: &mut Vec<u8>, field: u32, wire: u8) {
    put_varint(out, ((field as u64) << 3) | wire as u64);
}

fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            return;
        }
    }
}

fn put_nested(out: &mut Vec<u8>, field: u32, body: &[u8]) {
    put_tag(out, field, WIRE_LEN);
    put_varint(out, body.len() as u64);
    out.extend_from_slice(body);
}

fn get_varint(buf: &[u8], at: &mut usize) -> Result<u64, FormatError> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        if *at >= buf.len() {
            return Err(FormatError::Truncated);
        }
        let byte = buf[*at];
        *at += 1;

        v |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
        if shift >= 64 {
            return Err(FormatError::invalid("varint longer than 64 bits"));
        }
    }
}

fn get_slice<'a>(buf: &'a [u8], at: &mut usize) -> Result<&'a [u8], FormatError> {
    let len = get_varint(buf, at)? as usize;
    if buf.len() - *at < len {
        return Err(FormatError::Truncated);
    }
    let slice = &buf[*at..*at + len];
    *at += len;
    Ok(slice)
}

fn skip_field(buf: &[u8], at: &mut usize, wire: u8) -> Result<(), FormatError> {
    match wire {
        WIRE_VARINT => {
            get_varint(buf, at)?;
        }
        WIRE_FIXED64 => {
            if buf.len() - *at < 8 {
                return Err(FormatError::Truncated);
            }
            *at += 8;
        }
        WIRE_LEN => {
            get_slice(buf, at)?;
        }
        WIRE_FIXED32 => {
            if buf.len() - *at < 4 {
                return Err(FormatError::Truncated);
            }
            *at += 4;
        }
        other => {
            return Err(FormatError::invalid(format!("unsupported wire type {other}")));
        }
    }
    Ok(())
}

fn encode_ts(ts: TimeSpec) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    put_tag(&mut out, 1, WIRE_VARINT);
    put_varint(&mut out, ts.sec as u64);
    put_tag(&mut out, 2, WIRE_VARINT);
    put_varint(&mut out, ts.nsec as u64);
    out
}

fn decode_ts(msg: &[u8]) -> Result<TimeSpec, FormatError> {
    let mut at = 0;
    let mut sec = 0i64;
    let mut nsec = 0i64;

    while at < msg.len() {
        let key = get_varint(msg, &mut at)?;
        match ((key >> 3) as u32, (key & 7) as u8) {
            (1, WIRE_VARINT) => sec = get_varint(msg, &mut at)? as i64,
            (2, WIRE_VARINT) => nsec = get_varint(msg, &mut at)? as i64,
            (_, wire) => skip_field(msg, &mut at, wire)?,
        }
    }

    Ok(TimeSpec::new(sec, nsec))
}

fn decode_value(msg: &[u8]) -> Result<SignalData, FormatError> {
    let mut at = 0;

    while at < msg.len() {
        let key = get_varint(msg, &mut at)?;
        match ((key >> 3) as u32, (key & 7) as u8) {
            (1, WIRE_VARINT) => {
                return Ok(SignalData::boolean(get_varint(msg, &mut at)? != 0));
            }
            (2, WIRE_VARINT) => {
                return Ok(SignalData::integer(get_varint(msg, &mut at)? as i64));
            }
            (3, WIRE_FIXED64) => {
                if msg.len() - at < 8 {
                    return Err(FormatError::Truncated);
                }
                let bits = u64::from_le_bytes(msg[at..at + 8].try_into().unwrap());
                return Ok(SignalData::float(f64::from_bits(bits)));
            }
            (4, WIRE_LEN) => {
                let nested = get_slice(msg, &mut at)?;
                let mut zat = 0;
                let mut re = 0f32;
                let mut im = 0f32;
                while zat < nested.len() {
                    let zkey = get_varint(nested, &mut zat)?;
                    match ((zkey >> 3) as u32, (zkey & 7) as u8) {
                        (f, WIRE_FIXED32) if f == 1 || f == 2 => {
                            if nested.len() - zat < 4 {
                                return Err(FormatError::Truncated);
                            }
                            let bits =
                                u32::from_le_bytes(nested[zat..zat + 4].try_into().unwrap());
                            zat += 4;
                            if f == 1 {
                                re = f32::from_bits(bits);
                            } else {
                                im = f32::from_bits(bits);
                            }
                        }
                        (_, wire) => skip_field(nested, &mut zat, wire)?,
                    }
                }
                return Ok(SignalData::complex(re, im));
            }
            (_, wire) => skip_field(msg, &mut at, wire)?,
        }
    }

    Err(FormatError::invalid("value message carries no value"))
}

/// Reads one varint length prefix off a stream. `Ok(None)` is a clean
/// end-of-stream at a record boundary; end-of-file inside the prefix is
/// a truncation.
fn read_len(r: &mut dyn BufRead) -> Result<Option<u64>, FormatError> {
    let mut len = 0u64;
    let mut shift = 0u32;
    let mut first = true;

    loop {
        let mut byte = [0u8; 1];
        match r.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return if first {
                    Ok(None)
                } else {
                    Err(FormatError::Truncated)
                };
            }
            Err(e) => return Err(e.into()),
        }
        first = false;

        len |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(len));
        }
        shift += 7;
        if shift >= 64 {
            return Err(FormatError::invalid("length prefix longer than 64 bits"));
        }
    }
}

impl Format for Protobuf {
    fn sprint(&self, buf: &mut [u8], smps: &[SampleBox]) -> Result<(usize, usize), FormatError> {
        let mut written = 0;
        let mut count = 0;
        let mut msg = Vec::with_capacity(128);
        let mut framed = Vec::with_capacity(144);

        for smp in smps {
            msg.clear();
            self.encode_sample(smp, &mut msg);

            framed.clear();
            put_varint(&mut framed, msg.len() as u64);
            framed.extend_from_slice(&msg);

            if written + framed.len() > buf.len() {
                if count == 0 {
                    return Err(FormatError::Overrun);
                }
                break;
            }

            buf[written..written + framed.len()].copy_from_slice(&framed);
            written += framed.len();
            count += 1;
        }

        Ok((count, written))
    }

    fn sscan(&self, buf: &[u8], smps: &mut [SampleBox]) -> Result<(usize, usize), FormatError> {
        let mut consumed = 0;
        let mut count = 0;

        while count < smps.len() && consumed < buf.len() {
            let mut at = consumed;
            let len = match get_varint(buf, &mut at) {
                Ok(len) => len,
                Err(FormatError::Truncated) if count > 0 => break,
                Err(e) => return Err(e),
            };

            if len > MAX_RECORD {
                return Err(FormatError::invalid(format!("absurd record size {len}")));
            }
            let len = len as usize;

            if buf.len() - at < len {
                if count == 0 {
                    return Err(FormatError::Truncated);
                }
                break;
            }

            self.decode_sample(&buf[at..at + len], &mut smps[count])?;
            consumed = at + len;
            count += 1;
        }

        Ok((count, consumed))
    }

    /// Framed stream read: length prefix first, then exactly that many
    /// bytes.
    fn scan(&self, r: &mut dyn BufRead, smps: &mut [SampleBox]) -> Result<usize, FormatError> {
        let mut count = 0;

        while count < smps.len() {
            let len = match read_len(r)? {
                Some(len) => len,
                None => {
                    if count == 0 {
                        return Err(FormatError::Eof);
                    }
                    break;
                }
            };

            if len > MAX_RECORD {
                return Err(FormatError::invalid(format!("absurd record size {len}")));
            }

            let mut msg = vec![0u8; len as usize];
            r.read_exact(&mut msg).map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FormatError::Truncated,
                _ => FormatError::Io(e),
            })?;

            self.decode_sample(&msg, &mut smps[count])?;
            count += 1;
        }

        Ok(count)
    }
}
