//! The human-readable line format.
//!
//! One record per line:
//!
//! ```text
//! <ts_origin_sec>.<ts_origin_nsec>[+<offset>](<sequence>)\t<v0>\t<v1>...
//! ```
//!
//! The optional `+offset` is the receive delay in seconds and is the only
//! lossy field; origin timestamp, sequence and values round-trip exactly.

use basalt_icc::SampleBox;
use basalt_sample::{Sample, SampleFlags, SignalData, SignalList};
use basalt_util::TimeSpec;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::{Format, FormatError};

pub struct VillasHuman {
    signals: Arc<SignalList>,
    /// Restricts which header fields are emitted; a sample flag that is
    /// masked out here is treated as absent.
    mask: SampleFlags,
}

impl VillasHuman {
    pub fn new(signals: Arc<SignalList>) -> Self {
        Self {
            signals,
            mask: SampleFlags::ALL,
        }
    }

    pub fn with_mask(signals: Arc<SignalList>, mask: SampleFlags) -> Self {
        Self { signals, mask }
    }

    fn render(&self, smp: &Sample, out: &mut String) {
        let flags = smp.flags & self.mask;

        let ts = smp.ts.origin;
        let _ = write!(out, "{}.{:09}", ts.sec, ts.nsec);

        if flags.contains(SampleFlags::TS_RECEIVED) {
            let offset = smp.ts.received.diff(smp.ts.origin).to_f64();
            let _ = write!(out, "{offset:+}");
        }

        if flags.contains(SampleFlags::SEQUENCE) {
            let _ = write!(out, "({})", smp.sequence);
        }

        for (i, value) in smp.data().iter().enumerate() {
            out.push('\t');
            value.write_str(smp.signal_type(i), out);
        }
        out.push('\n');
    }

    fn parse_line(&self, line: &str, smp: &mut Sample) -> Result<(), FormatError> {
        let mut tokens = line.split_ascii_whitespace();
        let header = tokens
            .next()
            .ok_or_else(|| FormatError::invalid("empty record"))?;

        let mut flags = SampleFlags::NONE;

        // Split off "(sequence)" first.
        let (ts_part, seq_part) = match header.find('(') {
            Some(at) => {
                let seq = header[at + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| FormatError::invalid(format!("unterminated sequence in '{header}'")))?;
                (&header[..at], Some(seq))
            }
            None => (header, None),
        };

        if ts_part.is_empty() {
            return Err(FormatError::invalid(format!("missing timestamp in '{header}'")));
        }

        // Then the optional receive offset. The timestamp itself contains
        // no sign past position 0, so any later +/- starts the offset.
        let (ts_str, offset_str) = match ts_part[1..].find(['+', '-']) {
            Some(at) => (&ts_part[..at + 1], Some(&ts_part[at + 1..])),
            None => (ts_part, None),
        };

        let (sec_str, nsec_str) = ts_str
            .split_once('.')
            .ok_or_else(|| FormatError::invalid(format!("malformed timestamp '{ts_str}'")))?;
        let sec: i64 = sec_str
            .parse()
            .map_err(|_| FormatError::invalid(format!("malformed seconds '{sec_str}'")))?;
        let nsec = parse_nsec(nsec_str)?;

        smp.ts.origin = TimeSpec::new(sec, nsec);
        flags.insert(SampleFlags::TS_ORIGIN);

        if let Some(offset) = offset_str {
            let offset: f64 = offset
                .parse()
                .map_err(|_| FormatError::invalid(format!("malformed offset '{offset}'")))?;
            smp.ts.received = smp.ts.origin.add(TimeSpec::from_f64(offset));
            flags.insert(SampleFlags::TS_RECEIVED);
        }

        if let Some(seq) = seq_part {
            smp.sequence = seq
                .parse()
                .map_err(|_| FormatError::invalid(format!("malformed sequence '{seq}'")))?;
            flags.insert(SampleFlags::SEQUENCE);
        }

        let mut n = 0;
        for token in tokens {
            if n >= smp.capacity() {
                break;
            }
            let ty = self
                .signals
                .get(n)
                .map(|s| s.ty)
                .unwrap_or_default();
            smp.data_mut()[n] = SignalData::parse(ty, token).map_err(FormatError::Invalid)?;
            n += 1;
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

/// Nanoseconds may arrive with fewer than nine digits when produced by
/// other tools; treat them as a fraction and pad right.
fn parse_nsec(s: &str) -> Result<i64, FormatError> {
    if s.is_empty() || s.len() > 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::invalid(format!("malformed nanoseconds '{s}'")));
    }
    let base: i64 = s
        .parse()
        .map_err(|_| FormatError::invalid(format!("malformed nanoseconds '{s}'")))?;
    Ok(base * 10i64.pow(9 - s.len() as u32))
}

impl Format for VillasHuman {
    fn sprint(&self, buf: &mut [u8], smps: &[SampleBox]) -> Result<(usize, usize), FormatError> {
        let mut written = 0;
        let mut count = 0;
        let mut line = String::with_capacity(128);

        for smp in smps {
            line.clear();
            self.render(smp, &mut line);

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
            if trimmed.is_empty() || trimmed.starts_with('#') {
                consumed += advance;
                continue;
            }

            match self.parse_line(trimmed, &mut smps[count]) {
                Ok(()) => {
                    consumed += advance;
                    count += 1;
                }
                Err(e) if !complete => {
                    // A trailing fragment may simply be cut short; leave it
                    // for the next read unless nothing parsed at all.
                    if count == 0 {
                        return Err(e);
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((count, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use basalt_sample::SignalType;

    #[test]
    fn roundtrip_mixed_types() {
        let pool = testutil::pool(8, 8);
        let signals = testutil::signals(&[
            SignalType::Boolean,
            SignalType::Integer,
            SignalType::Float,
            SignalType::Complex,
        ]);
        let fmt = VillasHuman::new(signals.clone());

        let src = testutil::fill(&pool, &signals, 3);

        let mut buf = vec![0u8; 1024];
        let (n, wbytes) = fmt.sprint(&mut buf, &src).unwrap();
        assert_eq!(n, 3);

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 3);
        let (m, rbytes) = fmt.sscan(&buf[..wbytes], &mut dst).unwrap();
        assert_eq!(m, 3);
        assert_eq!(rbytes, wbytes);

        for (a, b) in src.iter().zip(&dst) {
            testutil::assert_sample_eq(a, b, SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA);
        }
    }

    #[test]
    fn line_shape_matches_wire_grammar() {
        let pool = testutil::pool(2, 4);
        let signals = testutil::signals(&[SignalType::Float, SignalType::Float]);
        let fmt = VillasHuman::new(signals.clone());

        let mut smp = pool.acquire().unwrap();
        smp.sequence = 7;
        smp.ts.origin = TimeSpec::new(100, 200);
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA;
        smp.set_signals(signals);
        smp.data_mut()[0] = SignalData::float(1.0);
        smp.data_mut()[1] = SignalData::float(2.0);
        smp.set_len(2);

        let mut buf = vec![0u8; 256];
        let (_, wbytes) = fmt.sprint(&mut buf, std::slice::from_ref(&smp)).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..wbytes]).unwrap(),
            "100.000000200(7)\t1\t2\n"
        );
    }

    #[test]
    fn receive_offset_restores_both_stamps() {
        let pool = testutil::pool(2, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = VillasHuman::new(signals.clone());

        let mut smp = pool.acquire().unwrap();
        smp.sequence = 1;
        smp.ts.origin = TimeSpec::new(50, 0);
        smp.ts.received = TimeSpec::new(50, 250_000_000);
        smp.flags = SampleFlags::ALL;
        smp.set_signals(signals);
        smp.data_mut()[0] = SignalData::float(3.5);
        smp.set_len(1);

        let mut buf = vec![0u8; 256];
        let (_, wbytes) = fmt.sprint(&mut buf, std::slice::from_ref(&smp)).unwrap();

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        fmt.sscan(&buf[..wbytes], &mut dst).unwrap();

        assert!(dst[0].flags.contains(SampleFlags::TS_RECEIVED));
        assert_eq!(dst[0].ts.received, TimeSpec::new(50, 250_000_000));
    }

    #[test]
    fn short_fraction_pads_to_nanoseconds() {
        let pool = testutil::pool(2, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = VillasHuman::new(signals);

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        let (n, _) = fmt.sscan(b"10.5(3)\t1.25\n", &mut dst).unwrap();
        assert_eq!(n, 1);
        assert_eq!(dst[0].ts.origin, TimeSpec::new(10, 500_000_000));
        assert_eq!(dst[0].sequence, 3);
    }

    #[test]
    fn mask_suppresses_header_fields() {
        let pool = testutil::pool(2, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = VillasHuman::with_mask(
            signals.clone(),
            SampleFlags::TS_ORIGIN | SampleFlags::DATA,
        );

        let mut smp = pool.acquire().unwrap();
        smp.sequence = 9;
        smp.ts.origin = TimeSpec::new(5, 0);
        smp.ts.received = TimeSpec::new(6, 0);
        smp.flags = SampleFlags::ALL;
        smp.set_signals(signals);
        smp.data_mut()[0] = SignalData::float(1.0);
        smp.set_len(1);

        let mut buf = vec![0u8; 128];
        let (_, wbytes) = fmt.sprint(&mut buf, std::slice::from_ref(&smp)).unwrap();
        let line = std::str::from_utf8(&buf[..wbytes]).unwrap();
        assert_eq!(line, "5.000000000\t1\n");
    }

    #[test]
    fn overrun_reported_when_nothing_fits() {
        let pool = testutil::pool(2, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = VillasHuman::new(signals.clone());
        let src = testutil::fill(&pool, &signals, 1);

        let mut tiny = [0u8; 4];
        assert!(matches!(
            fmt.sprint(&mut tiny, &src),
            Err(FormatError::Overrun)
        ));
    }

    #[test]
    fn garbage_line_is_invalid() {
        let pool = testutil::pool(1, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = VillasHuman::new(signals);

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        assert!(matches!(
            fmt.sscan(b"not-a-timestamp\t1.0\n", &mut dst),
            Err(FormatError::Invalid(_))
        ));
    }
}
