use crate::config::{Config, LogLevel};
use crate::mac_address::MacAddress;
use crate::reading::{FieldValue, Payload, RawReading};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// A minimal valid configuration without any lookup tables.
///
/// Tests can override just the fields they care about.
pub fn test_config() -> Config {
    Config {
        host: "localhost".to_string(),
        port: 8086,
        database: "sensors".to_string(),
        measurement: "ruuvi".to_string(),
        store_fields: vec!["temperature".to_string()],
        username: String::new(),
        password: String::new(),
        ssl: false,
        log_level: LogLevel::Warning,
        mac_filter: None,
        device_names: None,
        locations: None,
    }
}

/// Build a `RawReading` from key/value pairs.
pub fn reading(identifier: &str, entries: &[(&str, FieldValue)]) -> RawReading {
    let payload: Payload = entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    RawReading::new(identifier, payload)
}
