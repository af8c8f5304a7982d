//! `ruuvi-influx` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Readings are turned into points by [`crate::point`] and
//! the loop tying scanner and database together lives in [`crate::app`], where
//! it can be tested with an injected scanner and writer.

pub mod app;
pub mod config;
pub mod influxdb;
pub mod mac_address;
pub mod mapping;
pub mod point;
pub mod reading;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError, LogLevel, MacFilter};
pub use influxdb::{InfluxDbClient, InfluxError, PointWriter};
pub use mac_address::MacAddress;
pub use mapping::{resolve_device_name, resolve_location};
pub use point::{Point, Tags};
pub use reading::{FieldValue, Payload, RawReading};
pub use scanner::{Backend, DecodeError, ScanError, decode_ruuvi_data};
