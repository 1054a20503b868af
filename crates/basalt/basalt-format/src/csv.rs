//! Character-separated records; one codec serves both `csv` and `tsv`.
//!
//! Record layout, in field order:
//!
//! ```text
//! sequence, ts_origin_sec, ts_origin_nsec, ts_received_sec, ts_received_nsec, v0, v1, ...
//! ```
//!
//! Missing header fields are written as zeros; the flags of a scanned
//! sample always advertise the full header since the columns are
//! positional.

use basalt_icc::SampleBox;
use basalt_sample::{Sample, SampleFlags, SignalData, SignalList};
use basalt_util::TimeSpec;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::Arc;

use crate::{Format, FormatError};

pub struct Csv {
    signals: Arc<SignalList>,
    separator: char,
}

impl Csv {
    pub fn new(signals: Arc<SignalList>, separator: char) -> Self {
        Self { signals, separator }
    }

    fn render(&self, smp: &Sample, out: &mut String) {
        let s = self.separator;
        let _ = write!(
            out,
            "{}{s}{}{s}{}{s}{}{s}{}",
            smp.sequence,
            smp.ts.origin.sec,
            smp.ts.origin.nsec,
            smp.ts.received.sec,
            smp.ts.received.nsec,
        );

        for (i, value) in smp.data().iter().enumerate() {
            out.push(s);
            value.write_str(smp.signal_type(i), out);
        }
        out.push('\n');
    }

    fn parse_line(&self, line: &str, smp: &mut Sample) -> Result<(), FormatError> {
        let mut fields = line.split(self.separator);

        let mut int_field = |name: &str| -> Result<i64, FormatError> {
            let tok = fields
                .next()
                .ok_or_else(|| FormatError::invalid(format!("missing field '{name}'")))?;
            tok.trim()
                .parse()
                .map_err(|_| FormatError::invalid(format!("malformed field '{name}': '{tok}'")))
        };

        smp.sequence = int_field("sequence")? as u64;
        let o_sec = int_field("ts_origin_sec")?;
        let o_nsec = int_field("ts_origin_nsec")?;
        let r_sec = int_field("ts_received_sec")?;
        let r_nsec = int_field("ts_received_nsec")?;

        smp.ts.origin = TimeSpec::new(o_sec, o_nsec);
        smp.ts.received = TimeSpec::new(r_sec, r_nsec);

        let mut n = 0;
        for token in fields {
            if n >= smp.capacity() {
                break;
            }
            let ty = self.signals.get(n).map(|s| s.ty).unwrap_or_default();
            smp.data_mut()[n] =
                SignalData::parse(ty, token.trim()).map_err(FormatError::Invalid)?;
            n += 1;
        }
        smp.set_len(n);

        smp.set_signals(self.signals.clone());
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::TS_RECEIVED;
        if n > 0 {
            smp.flags.insert(SampleFlags::DATA);
        }
        Ok(())
    }
}

impl Format for Csv {
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

    fn header(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let s = self.separator;
        let mut line = format!(
            "# sequence{s}ts_origin_sec{s}ts_origin_nsec{s}ts_received_sec{s}ts_received_nsec"
        );
        for (i, sig) in self.signals.iter().enumerate() {
            let _ = write!(line, "{s}{}", sig.display_name(i));
        }
        line.push('\n');
        w.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use basalt_sample::SignalType;

    #[test]
    fn roundtrip_comma_and_tab() {
        let pool = testutil::pool(8, 4);
        let signals = testutil::signals(&[SignalType::Float, SignalType::Integer]);

        for sep in [',', '\t'] {
            let fmt = Csv::new(signals.clone(), sep);
            let src = testutil::fill(&pool, &signals, 2);

            let mut buf = vec![0u8; 1024];
            let (n, wbytes) = fmt.sprint(&mut buf, &src).unwrap();
            assert_eq!(n, 2);

            let mut dst = Vec::new();
            pool.acquire_many(&mut dst, 2);
            let (m, _) = fmt.sscan(&buf[..wbytes], &mut dst).unwrap();
            assert_eq!(m, 2);

            for (a, b) in src.iter().zip(&dst) {
                testutil::assert_sample_eq(
                    a,
                    b,
                    SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA,
                );
            }
        }
    }

    #[test]
    fn header_names_every_column() {
        let signals = testutil::signals(&[SignalType::Float, SignalType::Float]);
        let fmt = Csv::new(signals, ',');

        let mut out = Vec::new();
        fmt.header(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with("# sequence,"));
        assert!(line.contains("sig0"));
        assert!(line.contains("sig1"));
    }

    #[test]
    fn scan_skips_comment_lines() {
        let pool = testutil::pool(2, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = Csv::new(signals, ',');

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 2);
        let input = b"# a header\n5,1,2,3,4,9.5\n";
        let (n, rbytes) = fmt.sscan(input, &mut dst).unwrap();
        assert_eq!(n, 1);
        assert_eq!(rbytes, input.len());
        assert_eq!(dst[0].sequence, 5);
        assert_eq!(dst[0].data()[0].as_float(), 9.5);
    }

    #[test]
    fn short_record_is_invalid() {
        let pool = testutil::pool(1, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = Csv::new(signals, ',');

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        assert!(matches!(
            fmt.sscan(b"5,1,2\n", &mut dst),
            Err(FormatError::Invalid(_))
        ));
    }
}
