//! Conversion of raw readings into time-series points.

use crate::config::Config;
use crate::mapping::{resolve_device_name, resolve_location};
use crate::reading::{FieldValue, RawReading};
use std::collections::BTreeMap;
use std::fmt;

/// Tag set attached to every point.
///
/// All four tags are always part of the point; the optional ones are left out
/// of the line protocol when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Tags {
    pub mac: String,
    pub format: Option<FieldValue>,
    pub device: Option<String>,
    pub location: Option<String>,
}

impl Tags {
    /// Tag key/value pairs with a value, sorted by key.
    pub fn present(&self) -> Vec<(&'static str, String)> {
        let mut tags = Vec::with_capacity(4);
        if let Some(device) = &self.device {
            tags.push(("device", device.clone()));
        }
        if let Some(format) = &self.format {
            tags.push(("format", format.to_tag_value()));
        }
        if let Some(location) = &self.location {
            tags.push(("location", location.clone()));
        }
        tags.push(("mac", self.mac.clone()));
        tags.retain(|(_, value)| !value.is_empty());
        tags
    }
}

/// A time-series data point ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Tags,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Point {
    /// Build a point from one reading.
    ///
    /// Only fields listed in `store_fields` and present in the payload are
    /// kept. A reading with none of them still yields a point, with an empty
    /// field set.
    pub fn build(config: &Config, reading: &RawReading) -> Point {
        let mac = reading.identifier.as_str();
        let device = resolve_device_name(config, mac);
        let location = resolve_location(config, device);

        let tags = Tags {
            mac: mac.to_string(),
            format: reading.data_format().cloned(),
            device: device.map(str::to_string),
            location: location.map(str::to_string),
        };

        let fields = config
            .store_fields
            .iter()
            .filter_map(|name| {
                reading
                    .payload
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();

        Point {
            measurement: config.measurement.clone(),
            tags,
            fields,
        }
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Encode as one line of InfluxDB line protocol.
    ///
    /// Returns `None` when the point has no fields, which the protocol cannot
    /// express.
    pub fn to_line_protocol(&self) -> Option<String> {
        self.has_fields().then(|| self.to_string())
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

fn escape_key(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn fmt_tags(point: &Point, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in point.tags.present() {
        write!(fmt, ",{}={}", key, escape_key(&value))?;
    }
    Ok(())
}

fn fmt_fields(point: &Point, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in point.fields.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape_key(key), value)?;
    }
    Ok(())
}

impl fmt::Display for Point {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape_measurement(&self.measurement))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)
    }
}
