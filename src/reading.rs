//! Raw sensor readings as delivered by the scanner.

use std::collections::BTreeMap;
use std::fmt;

/// A single value in a sensor payload or a point's field set.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    /// Render the value as a bare string, as used for tag values.
    pub fn to_tag_value(&self) -> String {
        match self {
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::String(s) => s.clone(),
            FieldValue::Boolean(b) => b.to_string(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// Formats the value the way InfluxDB line protocol expects field values.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "\"")
            }
            FieldValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Decoded payload of one broadcast, keyed by field name.
pub type Payload = BTreeMap<String, FieldValue>;

/// Payload key carrying the sensor data format discriminator.
pub const DATA_FORMAT_KEY: &str = "data_format";

/// One sensor broadcast: who sent it and what it contained.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    /// Hardware address of the sensor (e.g. "AA:BB:CC:DD:EE:FF")
    pub identifier: String,
    pub payload: Payload,
}

impl RawReading {
    pub fn new(identifier: impl Into<String>, payload: Payload) -> Self {
        Self {
            identifier: identifier.into(),
            payload,
        }
    }

    /// The `data_format` entry of the payload, if present.
    pub fn data_format(&self) -> Option<&FieldValue> {
        self.payload.get(DATA_FORMAT_KEY)
    }
}
