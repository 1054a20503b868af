//! Length-prefixed binary framing.
//!
//! Per-sample record:
//!
//! ```text
//! ┌─────────────┬───────┬────────────┬──────────────┐
//! │ ver/type  1B│ flags │ length BE16│ sequence BE32│   8 B header
//! ├─────────────┴───────┴────────────┴──────────────┤
//! │ ts_origin_sec  BE64 │ ts_origin_nsec  BE64      │  16 B timestamp
//! ├─────────────────────────────────────────────────┤
//! │ value[0] .. value[length-1], 8 B each, native   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Header and timestamp travel in network byte order; the payload keeps
//! native endianness, the value typing coming entirely from the signal
//! list on both ends.

use basalt_icc::SampleBox;
use basalt_sample::{SampleFlags, SignalData, SignalList};
use basalt_util::TimeSpec;
use std::io::{BufRead, Read};
use std::sync::Arc;

use crate::{Format, FormatError};

const VERSION: u8 = 2;
const HEADER_LEN: usize = 24;

pub struct VillasBinary {
    signals: Arc<SignalList>,
}

impl VillasBinary {
    pub fn new(signals: Arc<SignalList>) -> Self {
        Self { signals }
    }

    fn record_len(values: usize) -> usize {
        HEADER_LEN + values * 8
    }

    fn decode_one(&self, buf: &[u8], smp: &mut SampleBox) -> Result<usize, FormatError> {
        if buf.len() < HEADER_LEN {
            return Err(FormatError::Truncated);
        }

        let version = buf[0] >> 4;
        if version != VERSION {
            return Err(FormatError::invalid(format!(
                "unsupported message version {version}"
            )));
        }

        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let total = Self::record_len(length);
        if buf.len() < total {
            return Err(FormatError::Truncated);
        }

        let sequence = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as u64;
        let sec = u64::from_be_bytes(buf[8..16].try_into().unwrap()) as i64;
        let nsec = u64::from_be_bytes(buf[16..24].try_into().unwrap()) as i64;

        let n = length.min(smp.capacity());
        for i in 0..n {
            let at = HEADER_LEN + i * 8;
            let bits = u64::from_ne_bytes(buf[at..at + 8].try_into().unwrap());
            smp.data_mut()[i] = SignalData::from_raw_bits(bits);
        }

        smp.sequence = sequence;
        smp.ts.origin = TimeSpec::new(sec, nsec);
        smp.set_len(n);
        smp.set_signals(self.signals.clone());
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN;
        if n > 0 {
            smp.flags.insert(SampleFlags::DATA);
        }

        Ok(total)
    }
}

impl Format for VillasBinary {
    fn sprint(&self, buf: &mut [u8], smps: &[SampleBox]) -> Result<(usize, usize), FormatError> {
        let mut written = 0;
        let mut count = 0;

        for smp in smps {
            let total = Self::record_len(smp.len());
            if written + total > buf.len() {
                if count == 0 {
                    return Err(FormatError::Overrun);
                }
                break;
            }

            let rec = &mut buf[written..written + total];
            rec[0] = VERSION << 4;
            rec[1] = 0;
            rec[2..4].copy_from_slice(&(smp.len() as u16).to_be_bytes());
            rec[4..8].copy_from_slice(&(smp.sequence as u32).to_be_bytes());
            rec[8..16].copy_from_slice(&(smp.ts.origin.sec as u64).to_be_bytes());
            rec[16..24].copy_from_slice(&(smp.ts.origin.nsec as u64).to_be_bytes());

            for (i, value) in smp.data().iter().enumerate() {
                let at = HEADER_LEN + i * 8;
                rec[at..at + 8].copy_from_slice(&value.raw_bits().to_ne_bytes());
            }

            written += total;
            count += 1;
        }

        Ok((count, written))
    }

    fn sscan(&self, buf: &[u8], smps: &mut [SampleBox]) -> Result<(usize, usize), FormatError> {
        let mut consumed = 0;
        let mut count = 0;

        while count < smps.len() && consumed < buf.len() {
            match self.decode_one(&buf[consumed..], &mut smps[count]) {
                Ok(total) => {
                    consumed += total;
                    count += 1;
                }
                Err(FormatError::Truncated) if count > 0 => break,
                Err(e) => return Err(e),
            }
        }

        Ok((count, consumed))
    }

    /// Framed stream read: header first, then exactly the advertised
    /// payload.
    fn scan(&self, r: &mut dyn BufRead, smps: &mut [SampleBox]) -> Result<usize, FormatError> {
        let mut count = 0;

        while count < smps.len() {
            let mut rec = vec![0u8; HEADER_LEN];
            match r.read_exact(&mut rec) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if count == 0 {
                        return Err(FormatError::Eof);
                    }
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let length = u16::from_be_bytes([rec[2], rec[3]]) as usize;
            rec.resize(HEADER_LEN + length * 8, 0);
            r.read_exact(&mut rec[HEADER_LEN..])
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => FormatError::Truncated,
                    _ => FormatError::Io(e),
                })?;

            self.decode_one(&rec, &mut smps[count])?;
            count += 1;
        }

        Ok(count)
    }
}
