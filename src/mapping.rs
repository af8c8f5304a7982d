//! Device name and location lookup.
//!
//! Both lookups are driven by the optional `device-names` and `locations`
//! tables of the configuration. An unknown device resolves to no name at all
//! rather than to its identifier, so unnamed sensors are tagged consistently.

use crate::config::{Config, normalize_identifier};

/// Resolve a sensor identifier to its configured display name.
///
/// Identifiers match case-insensitively, like the `mac_filter` check.
///
/// # Example
/// ```
/// use ruuvi_influx::{Config, resolve_device_name};
///
/// let config = Config::from_toml_str(r#"
///     host = "localhost"
///     database = "sensors"
///     measurement = "ruuvi"
///     store_fields = ["temperature"]
///     [device-names]
///     "AA:BB:CC:DD:EE:FF" = "Sauna"
/// "#).unwrap();
///
/// assert_eq!(resolve_device_name(&config, "AA:BB:CC:DD:EE:FF"), Some("Sauna"));
/// assert_eq!(resolve_device_name(&config, "aa:bb:cc:dd:ee:ff"), Some("Sauna"));
/// assert_eq!(resolve_device_name(&config, "11:22:33:44:55:66"), None);
/// ```
pub fn resolve_device_name<'a>(config: &'a Config, identifier: &str) -> Option<&'a str> {
    config
        .device_names
        .as_ref()?
        .get(&normalize_identifier(identifier))
        .map(String::as_str)
}

/// Resolve a display name to its configured location.
///
/// Returns `None` when there is no name, no `locations` table, or no entry
/// for the name.
pub fn resolve_location<'a>(config: &'a Config, name: Option<&str>) -> Option<&'a str> {
    config
        .locations
        .as_ref()?
        .get(name?)
        .map(String::as_str)
}
