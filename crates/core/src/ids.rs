use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TracedbError};

/// 128-bit trace identifier carried as two 64-bit halves. Rendered as 16
/// lowercase hex characters when the high half is zero, 32 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId {
    pub hi: u64,
    pub lo: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub u64);

impl TraceId {
    pub fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    pub fn parse(input: &str) -> Result<Self> {
        match input.len() {
            16 => Ok(Self {
                hi: 0,
                lo: parse_hex_u64(input)?,
            }),
            32 => Ok(Self {
                hi: parse_hex_u64(&input[..16])?,
                lo: parse_hex_u64(&input[16..])?,
            }),
            _ => Err(TracedbError::Parse(format!("invalid trace id: {input}"))),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }
}

impl SpanId {
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != 16 {
            return Err(TracedbError::Parse(format!("invalid span id: {input}")));
        }
        Ok(Self(parse_hex_u64(input)?))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

fn parse_hex_u64(input: &str) -> Result<u64> {
    // from_str_radix tolerates a leading '+'; ids are bare hex digits only.
    if !input.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TracedbError::Parse(format!("invalid hex id: {input}")));
    }
    u64::from_str_radix(input, 16)
        .map_err(|_| TracedbError::Parse(format!("invalid hex id: {input}")))
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hi == 0 {
            write!(f, "{:016x}", self.lo)
        } else {
            write!(f, "{:016x}{:016x}", self.hi, self.lo)
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = TracedbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromStr for SpanId {
    type Err = TracedbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}
