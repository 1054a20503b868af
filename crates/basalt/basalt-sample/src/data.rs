use serde_json::{Value, json};

use crate::signal::SignalType;

/// One sample value, stored as raw bits.
///
/// The active interpretation is not carried here; it lives in the signal
/// list at the same index (`signals[i].ty`). This mirrors a C tagged-union
/// layout while keeping every accessor safe: any 8-bit pattern is a valid
/// `u64`, `i64` and `f64`, so a stale or mismatched read yields garbage
/// data, never undefined behavior.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalData(u64);

/// A value paired with its interpretation, for code that leaves the hot
/// path (formats, hooks, logging).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Complex(f32, f32),
}

impl SignalData {
    #[inline(always)]
    pub fn boolean(b: bool) -> Self {
        Self(b as u64)
    }

    #[inline(always)]
    pub fn integer(i: i64) -> Self {
        Self(i as u64)
    }

    #[inline(always)]
    pub fn float(f: f64) -> Self {
        Self(f.to_bits())
    }

    #[inline(always)]
    pub fn complex(re: f32, im: f32) -> Self {
        Self((re.to_bits() as u64) | ((im.to_bits() as u64) << 32))
    }

    #[inline(always)]
    pub fn as_bool(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub fn as_int(self) -> i64 {
        self.0 as i64
    }

    #[inline(always)]
    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline(always)]
    pub fn as_complex(self) -> (f32, f32) {
        (
            f32::from_bits(self.0 as u32),
            f32::from_bits((self.0 >> 32) as u32),
        )
    }

    #[inline(always)]
    pub fn raw_bits(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub fn from_raw_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Reads the value under the given interpretation.
    pub fn get(self, ty: SignalType) -> SignalValue {
        match ty {
            SignalType::Boolean => SignalValue::Boolean(self.as_bool()),
            SignalType::Integer => SignalValue::Integer(self.as_int()),
            SignalType::Float => SignalValue::Float(self.as_float()),
            SignalType::Complex => {
                let (re, im) = self.as_complex();
                SignalValue::Complex(re, im)
            }
        }
    }

    /// Converts a value from one interpretation to another.
    ///
    /// Widening is exact; narrowing follows the usual numeric casts
    /// (float to integer truncates, complex keeps the real part).
    pub fn cast(self, from: SignalType, to: SignalType) -> SignalData {
        if from == to {
            return self;
        }

        match (self.get(from), to) {
            (SignalValue::Boolean(b), SignalType::Integer) => SignalData::integer(b as i64),
            (SignalValue::Boolean(b), SignalType::Float) => SignalData::float(b as u8 as f64),
            (SignalValue::Boolean(b), SignalType::Complex) => {
                SignalData::complex(b as u8 as f32, 0.0)
            }

            (SignalValue::Integer(i), SignalType::Boolean) => SignalData::boolean(i != 0),
            (SignalValue::Integer(i), SignalType::Float) => SignalData::float(i as f64),
            (SignalValue::Integer(i), SignalType::Complex) => SignalData::complex(i as f32, 0.0),

            (SignalValue::Float(f), SignalType::Boolean) => SignalData::boolean(f != 0.0),
            (SignalValue::Float(f), SignalType::Integer) => SignalData::integer(f as i64),
            (SignalValue::Float(f), SignalType::Complex) => SignalData::complex(f as f32, 0.0),

            (SignalValue::Complex(re, _), SignalType::Boolean) => SignalData::boolean(re != 0.0),
            (SignalValue::Complex(re, _), SignalType::Integer) => {
                SignalData::integer(re as i64)
            }
            (SignalValue::Complex(re, _), SignalType::Float) => SignalData::float(re as f64),

            _ => self,
        }
    }

    /// Renders the value in the textual wire form.
    ///
    /// Numbers use the shortest representation that parses back to the
    /// same bits; complex values render as `a+bi`.
    pub fn write_str(self, ty: SignalType, out: &mut String) {
        use std::fmt::Write;
        match self.get(ty) {
            SignalValue::Boolean(b) => out.push(if b { '1' } else { '0' }),
            SignalValue::Integer(i) => {
                let _ = write!(out, "{i}");
            }
            SignalValue::Float(f) => {
                let _ = write!(out, "{f}");
            }
            SignalValue::Complex(re, im) => {
                let _ = write!(out, "{re}{im:+}i");
            }
        }
    }

    pub fn to_string(self, ty: SignalType) -> String {
        let mut s = String::new();
        self.write_str(ty, &mut s);
        s
    }

    /// Parses a value from its textual wire form.
    pub fn parse(ty: SignalType, s: &str) -> Result<SignalData, String> {
        let s = s.trim();
        match ty {
            SignalType::Boolean => match s {
                "1" | "true" => Ok(SignalData::boolean(true)),
                "0" | "false" => Ok(SignalData::boolean(false)),
                _ => Err(format!("invalid boolean '{s}'")),
            },
            SignalType::Integer => s
                .parse::<i64>()
                .map(SignalData::integer)
                .map_err(|e| format!("invalid integer '{s}': {e}")),
            SignalType::Float => s
                .parse::<f64>()
                .map(SignalData::float)
                .map_err(|e| format!("invalid float '{s}': {e}")),
            SignalType::Complex => parse_complex(s),
        }
    }

    pub fn to_json(self, ty: SignalType) -> Value {
        match self.get(ty) {
            SignalValue::Boolean(b) => json!(b),
            SignalValue::Integer(i) => json!(i),
            SignalValue::Float(f) => json!(f),
            SignalValue::Complex(re, im) => json!({ "real": re, "imag": im }),
        }
    }

    pub fn from_json(ty: SignalType, value: &Value) -> Result<SignalData, String> {
        match (ty, value) {
            (SignalType::Boolean, Value::Bool(b)) => Ok(SignalData::boolean(*b)),
            (SignalType::Boolean, Value::Number(n)) => {
                Ok(SignalData::boolean(n.as_f64().unwrap_or(0.0) != 0.0))
            }
            (SignalType::Integer, Value::Number(n)) => n
                .as_i64()
                .map(SignalData::integer)
                .ok_or_else(|| format!("integer out of range: {n}")),
            (SignalType::Float, Value::Number(n)) => {
                Ok(SignalData::float(n.as_f64().unwrap_or(0.0)))
            }
            (SignalType::Complex, Value::Object(map)) => {
                let re = map.get("real").and_then(Value::as_f64).unwrap_or(0.0);
                let im = map.get("imag").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(SignalData::complex(re as f32, im as f32))
            }
            (SignalType::Complex, Value::Number(n)) => {
                Ok(SignalData::complex(n.as_f64().unwrap_or(0.0) as f32, 0.0))
            }
            (ty, v) => Err(format!("cannot read {v} as {ty}")),
        }
    }
}

impl std::fmt::Debug for SignalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignalData({:#018x})", self.0)
    }
}

/// Parses `a+bi`, `a-bi` or a bare real into a complex value.
///
/// The split point is the last `+`/`-` that is neither the leading sign nor
/// part of an exponent, so `1.5e-3+2e+1i` parses correctly.
fn parse_complex(s: &str) -> Result<SignalData, String> {
    let body = s.strip_suffix('i');

    let Some(body) = body else {
        // No imaginary part at all.
        return s
            .parse::<f32>()
            .map(|re| SignalData::complex(re, 0.0))
            .map_err(|e| format!("invalid complex '{s}': {e}"));
    };

    let bytes = body.as_bytes();
    let mut split = None;
    for i in (1..bytes.len()).rev() {
        let c = bytes[i];
        if (c == b'+' || c == b'-') && !matches!(bytes[i - 1], b'e' | b'E') {
            split = Some(i);
            break;
        }
    }

    let Some(split) = split else {
        // Pure imaginary, e.g. "2.5i".
        return body
            .parse::<f32>()
            .map(|im| SignalData::complex(0.0, im))
            .map_err(|e| format!("invalid complex '{s}': {e}"));
    };

    let re = body[..split]
        .parse::<f32>()
        .map_err(|e| format!("invalid complex '{s}': {e}"))?;
    let im = body[split..]
        .parse::<f32>()
        .map_err(|e| format!("invalid complex '{s}': {e}"))?;
    Ok(SignalData::complex(re, im))
}
