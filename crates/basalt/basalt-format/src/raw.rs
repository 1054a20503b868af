//! Frameless fixed-width payloads.
//!
//! Every value is one machine word of the configured width; complex
//! values take two. There is no record delimiter: the record size is
//! fully determined by the signal list and the `fake` flag, which
//! prepends three integer words (sequence, seconds, nanoseconds) to each
//! record.
//!
//! Widths below 32 bits cannot carry floats; such values are written as
//! the integer -1, matching what the narrow end of a GTNET-style link
//! expects. Decoding floats from narrow words goes through the integer
//! reading, so raw.8/raw.16 collapse floats to integers by design.

use basalt_config::ConfigError;
use basalt_icc::SampleBox;
use basalt_sample::{SampleFlags, SignalData, SignalList, SignalType, SignalValue};
use basalt_util::TimeSpec;
use serde::Deserialize;
use std::sync::Arc;

use crate::{Format, FormatError};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Endianess {
    Big,
    Little,
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(default = "defaults::bits")]
    pub bits: u32,
    #[serde(default)]
    pub endianess: Option<Endianess>,
    #[serde(default)]
    pub fake: bool,
}

mod defaults {
    pub fn bits() -> u32 {
        64
    }
}

pub struct Raw {
    signals: Arc<SignalList>,
    bits: u32,
    big: bool,
    fake: bool,
}

impl Raw {
    pub fn new(signals: Arc<SignalList>, cfg: RawConfig) -> Result<Raw, ConfigError> {
        if !matches!(cfg.bits, 8 | 16 | 32 | 64) {
            return Err(ConfigError::invalid(
                "bits",
                format!("unsupported width {}", cfg.bits),
            ));
        }

        if cfg.bits == 8 && cfg.endianess.is_some() {
            return Err(ConfigError::invalid(
                "endianess",
                "meaningless for 8-bit words",
            ));
        }

        Ok(Raw {
            signals,
            bits: cfg.bits,
            big: cfg.endianess == Some(Endianess::Big),
            fake: cfg.fake,
        })
    }

    #[inline(always)]
    fn word(&self) -> usize {
        (self.bits / 8) as usize
    }

    /// Words per record on the decode side, fixed by the signal list.
    fn record_slots(&self) -> usize {
        let head = if self.fake { 3 } else { 0 };
        let values: usize = self
            .signals
            .iter()
            .map(|s| if s.ty == SignalType::Complex { 2 } else { 1 })
            .sum();
        head + values
    }

    fn put_int(&self, buf: &mut [u8], slot: usize, v: i64) {
        let w = self.word();
        let at = slot * w;
        match self.bits {
            8 => buf[at] = v as i8 as u8,
            16 => {
                let b = if self.big {
                    (v as i16).to_be_bytes()
                } else {
                    (v as i16).to_le_bytes()
                };
                buf[at..at + 2].copy_from_slice(&b);
            }
            32 => {
                let b = if self.big {
                    (v as i32).to_be_bytes()
                } else {
                    (v as i32).to_le_bytes()
                };
                buf[at..at + 4].copy_from_slice(&b);
            }
            _ => {
                let b = if self.big {
                    v.to_be_bytes()
                } else {
                    v.to_le_bytes()
                };
                buf[at..at + 8].copy_from_slice(&b);
            }
        }
    }

    fn get_int(&self, buf: &[u8], slot: usize) -> i64 {
        let w = self.word();
        let at = slot * w;
        match self.bits {
            8 => buf[at] as i8 as i64,
            16 => {
                let b: [u8; 2] = buf[at..at + 2].try_into().unwrap();
                (if self.big {
                    i16::from_be_bytes(b)
                } else {
                    i16::from_le_bytes(b)
                }) as i64
            }
            32 => {
                let b: [u8; 4] = buf[at..at + 4].try_into().unwrap();
                (if self.big {
                    i32::from_be_bytes(b)
                } else {
                    i32::from_le_bytes(b)
                }) as i64
            }
            _ => {
                let b: [u8; 8] = buf[at..at + 8].try_into().unwrap();
                if self.big {
                    i64::from_be_bytes(b)
                } else {
                    i64::from_le_bytes(b)
                }
            }
        }
    }

    fn put_float(&self, buf: &mut [u8], slot: usize, v: f64) {
        match self.bits {
            // Narrow words cannot carry a float.
            8 | 16 => self.put_int(buf, slot, -1),
            32 => {
                let bits = (v as f32).to_bits();
                let b = if self.big {
                    bits.to_be_bytes()
                } else {
                    bits.to_le_bytes()
                };
                let at = slot * 4;
                buf[at..at + 4].copy_from_slice(&b);
            }
            _ => {
                let bits = v.to_bits();
                let b = if self.big {
                    bits.to_be_bytes()
                } else {
                    bits.to_le_bytes()
                };
                let at = slot * 8;
                buf[at..at + 8].copy_from_slice(&b);
            }
        }
    }

    fn get_float(&self, buf: &[u8], slot: usize) -> f64 {
        match self.bits {
            8 | 16 => self.get_int(buf, slot) as f64,
            32 => {
                let at = slot * 4;
                let b: [u8; 4] = buf[at..at + 4].try_into().unwrap();
                let bits = if self.big {
                    u32::from_be_bytes(b)
                } else {
                    u32::from_le_bytes(b)
                };
                f32::from_bits(bits) as f64
            }
            _ => {
                let at = slot * 8;
                let b: [u8; 8] = buf[at..at + 8].try_into().unwrap();
                let bits = if self.big {
                    u64::from_be_bytes(b)
                } else {
                    u64::from_le_bytes(b)
                };
                f64::from_bits(bits)
            }
        }
    }
}

impl Format for Raw {
    fn sprint(&self, buf: &mut [u8], smps: &[SampleBox]) -> Result<(usize, usize), FormatError> {
        let w = self.word();
        let mut slot = 0;
        let mut count = 0;

        for smp in smps {
            let head = if self.fake { 3 } else { 0 };
            let values: usize = (0..smp.len())
                .map(|i| {
                    if smp.signal_type(i) == SignalType::Complex {
                        2
                    } else {
                        1
                    }
                })
                .sum();

            if (slot + head + values) * w > buf.len() {
                if count == 0 {
                    return Err(FormatError::Overrun);
                }
                break;
            }

            if self.fake {
                self.put_int(buf, slot, smp.sequence as i64);
                self.put_int(buf, slot + 1, smp.ts.origin.sec);
                self.put_int(buf, slot + 2, smp.ts.origin.nsec);
                slot += 3;
            }

            for i in 0..smp.len() {
                let value = smp.data()[i];
                match value.get(smp.signal_type(i)) {
                    SignalValue::Boolean(b) => {
                        self.put_int(buf, slot, b as i64);
                        slot += 1;
                    }
                    SignalValue::Integer(v) => {
                        self.put_int(buf, slot, v);
                        slot += 1;
                    }
                    SignalValue::Float(v) => {
                        self.put_float(buf, slot, v);
                        slot += 1;
                    }
                    SignalValue::Complex(re, im) => {
                        self.put_float(buf, slot, re as f64);
                        self.put_float(buf, slot + 1, im as f64);
                        slot += 2;
                    }
                }
            }

            count += 1;
        }

        Ok((count, slot * w))
    }

    fn sscan(&self, buf: &[u8], smps: &mut [SampleBox]) -> Result<(usize, usize), FormatError> {
        if self.signals.is_empty() {
            return Err(FormatError::invalid(
                "raw decoding requires a declared signal list",
            ));
        }

        let w = self.word();
        let record_bytes = self.record_slots() * w;
        let mut consumed = 0;
        let mut count = 0;

        while count < smps.len() && consumed < buf.len() {
            if buf.len() - consumed < record_bytes {
                if count == 0 {
                    return Err(FormatError::Truncated);
                }
                break;
            }

            let rec = &buf[consumed..consumed + record_bytes];
            let smp = &mut smps[count];
            let mut slot = 0;

            let mut flags = SampleFlags::NONE;
            if self.fake {
                smp.sequence = self.get_int(rec, 0) as u64;
                smp.ts.origin =
                    TimeSpec::new(self.get_int(rec, 1), self.get_int(rec, 2));
                flags.insert(SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN);
                slot += 3;
            }

            let n = self.signals.len().min(smp.capacity());
            for i in 0..n {
                let data = match self.signals[i].ty {
                    SignalType::Boolean => SignalData::boolean(self.get_int(rec, slot) != 0),
                    SignalType::Integer => SignalData::integer(self.get_int(rec, slot)),
                    SignalType::Float => SignalData::float(self.get_float(rec, slot)),
                    SignalType::Complex => {
                        let re = self.get_float(rec, slot) as f32;
                        let im = self.get_float(rec, slot + 1) as f32;
                        slot += 1;
                        SignalData::complex(re, im)
                    }
                };
                smp.data_mut()[i] = data;
                slot += 1;
            }
            smp.set_len(n);
            if n > 0 {
                flags.insert(SampleFlags::DATA);
            }

            smp.set_signals(self.signals.clone());
            smp.flags = flags;

            consumed += record_bytes;
            count += 1;
        }

        Ok((count, consumed))
    }

    /// Frameless stream read: exactly one record per sample slot.
    fn scan(
        &self,
        r: &mut dyn std::io::BufRead,
        smps: &mut [SampleBox],
    ) -> Result<usize, FormatError> {
        let record_bytes = self.record_slots() * self.word();
        let mut count = 0;

        while count < smps.len() {
            let mut rec = vec![0u8; record_bytes];
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

            let (k, _) = self.sscan(&rec, &mut smps[count..count + 1])?;
            count += k;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn raw(signals: &Arc<SignalList>, bits: u32, big: bool, fake: bool) -> Raw {
        Raw::new(
            signals.clone(),
            RawConfig {
                bits,
                endianess: if bits == 8 {
                    None
                } else {
                    Some(if big { Endianess::Big } else { Endianess::Little })
                },
                fake,
            },
        )
        .unwrap()
    }

    /// The 20-byte fixture: raw.32 big-endian with the fake header,
    /// sequence 235 and two float values.
    #[test]
    fn raw32_big_fake_is_twenty_bytes() {
        let pool = testutil::pool(4, 4);
        let signals = testutil::signals(&[SignalType::Float, SignalType::Float]);
        let fmt = raw(&signals, 32, true, true);

        let mut smp = pool.acquire().unwrap();
        smp.sequence = 235;
        smp.ts.origin = TimeSpec::new(100, 200);
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA;
        smp.set_signals(signals.clone());
        smp.data_mut()[0] = SignalData::float(0.1);
        smp.data_mut()[1] = SignalData::float(0.2);
        smp.set_len(2);

        let mut buf = vec![0u8; 64];
        let (n, wbytes) = fmt.sprint(&mut buf, std::slice::from_ref(&smp)).unwrap();
        assert_eq!((n, wbytes), (1, 20));

        // Header words are big-endian integers.
        assert_eq!(&buf[..4], &235i32.to_be_bytes());
        assert_eq!(&buf[4..8], &100i32.to_be_bytes());
        assert_eq!(&buf[8..12], &200i32.to_be_bytes());

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        let (m, rbytes) = fmt.sscan(&buf[..20], &mut dst).unwrap();
        assert_eq!((m, rbytes), (1, 20));

        assert_eq!(dst[0].sequence, 235);
        assert_eq!(dst[0].ts.origin, TimeSpec::new(100, 200));
        assert_eq!(dst[0].data()[0].as_float(), 0.1f32 as f64);
        assert_eq!(dst[0].data()[1].as_float(), 0.2f32 as f64);
    }

    #[test]
    fn raw64_roundtrips_floats_exactly() {
        let pool = testutil::pool(4, 4);
        let signals = testutil::signals(&[SignalType::Float, SignalType::Integer]);
        let fmt = raw(&signals, 64, false, true);

        let src = testutil::fill(&pool, &signals, 2);
        let mut buf = vec![0u8; 256];
        let (_, wbytes) = fmt.sprint(&mut buf, &src).unwrap();

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

    #[test]
    fn without_fake_header_meta_is_dropped() {
        let pool = testutil::pool(4, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = raw(&signals, 32, false, false);

        let src = testutil::fill(&pool, &signals, 1);
        let mut buf = vec![0u8; 64];
        let (_, wbytes) = fmt.sprint(&mut buf, &src).unwrap();
        assert_eq!(wbytes, 4);

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        fmt.sscan(&buf[..wbytes], &mut dst).unwrap();

        assert!(!dst[0].flags.contains(SampleFlags::SEQUENCE));
        assert!(!dst[0].flags.contains(SampleFlags::TS_ORIGIN));
        assert_eq!(dst[0].data()[0].as_float(), src[0].data()[0].as_float());
    }

    #[test]
    fn raw16_collapses_floats_to_integers() {
        let pool = testutil::pool(4, 2);
        let signals = testutil::signals(&[SignalType::Float]);
        let fmt = raw(&signals, 16, false, false);

        let mut smp = pool.acquire().unwrap();
        smp.flags = SampleFlags::DATA;
        smp.set_signals(signals.clone());
        smp.data_mut()[0] = SignalData::float(7.9);
        smp.set_len(1);

        let mut buf = vec![0u8; 8];
        let (_, wbytes) = fmt.sprint(&mut buf, std::slice::from_ref(&smp)).unwrap();
        assert_eq!(wbytes, 2);

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        fmt.sscan(&buf[..2], &mut dst).unwrap();

        // Narrow floats are unrepresentable and arrive as -1.
        assert_eq!(dst[0].data()[0].as_float(), -1.0);
    }

    #[test]
    fn integers_survive_narrow_widths() {
        let pool = testutil::pool(4, 2);
        let signals = testutil::signals(&[SignalType::Integer]);
        let fmt = raw(&signals, 16, true, false);

        let mut smp = pool.acquire().unwrap();
        smp.flags = SampleFlags::DATA;
        smp.set_signals(signals.clone());
        smp.data_mut()[0] = SignalData::integer(-513);
        smp.set_len(1);

        let mut buf = vec![0u8; 8];
        fmt.sprint(&mut buf, std::slice::from_ref(&smp)).unwrap();

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        fmt.sscan(&buf[..2], &mut dst).unwrap();
        assert_eq!(dst[0].data()[0].as_int(), -513);
    }

    #[test]
    fn eight_bit_rejects_endianess() {
        let signals = testutil::signals(&[SignalType::Integer]);
        let err = Raw::new(
            signals,
            RawConfig {
                bits: 8,
                endianess: Some(Endianess::Big),
                fake: false,
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn odd_width_rejected() {
        let signals = testutil::signals(&[SignalType::Integer]);
        assert!(
            Raw::new(
                signals,
                RawConfig {
                    bits: 24,
                    endianess: None,
                    fake: false,
                }
            )
            .is_err()
        );
    }

    #[test]
    fn truncated_record_detected() {
        let pool = testutil::pool(2, 2);
        let signals = testutil::signals(&[SignalType::Float, SignalType::Float]);
        let fmt = raw(&signals, 32, false, false);

        let mut dst = Vec::new();
        pool.acquire_many(&mut dst, 1);
        assert!(matches!(
            fmt.sscan(&[0u8; 5], &mut dst),
            Err(FormatError::Truncated)
        ));
    }
}
