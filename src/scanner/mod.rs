//! BLE scanner abstraction for RuuviTag devices.
//!
//! Scanning backends deliver [`RawReading`]s over a channel. Decoding of the
//! RuuviTag manufacturer data into a payload map is shared between backends,
//! as is the MAC filter applied before a reading leaves the scanner.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::config::MacFilter;
use crate::mac_address::MacAddress;
use crate::reading::{DATA_FORMAT_KEY, FieldValue, Payload, RawReading};
use ruuvi_decoders::{v5, v6};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Data format the decoder does not understand (only 5 and 6 are)
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Invalid or corrupted data that cannot be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Decoder library returned an error
    #[error("Decoder error: {0}")]
    DecoderError(String),
}

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Ruuvi Innovations manufacturer ID (little-endian bytes for pattern matching).
///
/// Bluetooth LE advertisements use little-endian byte order for manufacturer IDs.
/// See: https://github.com/ruuvi/ruuvi-sensor-protocols
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID_BYTES: [u8; 2] = [0x99, 0x04];

/// Ruuvi Innovations manufacturer ID for data lookup.
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
#[cfg(feature = "bluer")]
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Channel buffer size for readings.
pub const READING_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[default]
    Bluer,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Bluer => write!(f, "bluer"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bluer" | "bluez" => Ok(Backend::Bluer),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Returns true if a reading from `identifier` may leave the scanner.
pub fn accepts(filter: Option<&MacFilter>, identifier: &str) -> bool {
    filter.is_none_or(|f| f.allows(identifier))
}

/// Decode manufacturer data from a RuuviTag into a [`RawReading`].
///
/// Payload keys follow the usual RuuviTag field names. Units: temperature in
/// Celsius, humidity in percent, pressure in hPa, acceleration in milli-g,
/// battery in millivolts.
///
/// # Arguments
/// * `mac` - The MAC address of the device
/// * `data` - The manufacturer-specific data bytes (without the company ID prefix)
pub fn decode_ruuvi_data(mac: MacAddress, data: &[u8]) -> Result<RawReading, DecodeError> {
    let Some(&format) = data.first() else {
        return Err(DecodeError::InvalidData("Empty data".into()));
    };

    let mut payload = match format {
        5 => decode_v5_payload(data)?,
        6 => decode_v6_payload(data)?,
        _ => {
            return Err(DecodeError::UnsupportedFormat(format!(
                "RuuviTag data format {format} (only 5 and 6 supported)"
            )));
        }
    };

    payload.insert(DATA_FORMAT_KEY.into(), FieldValue::Integer(i64::from(format)));
    payload.insert("mac".into(), FieldValue::String(mac.to_compact()));

    Ok(RawReading::new(mac.to_string(), payload))
}

macro_rules! add {
    ($payload:ident, $name:literal, $val:expr) => {
        if let Some(v) = $val {
            $payload.insert($name.into(), FieldValue::from(v));
        }
    };
}

fn decode_v5_payload(data: &[u8]) -> Result<Payload, DecodeError> {
    let tag = v5::decode(data).map_err(|e| {
        DecodeError::DecoderError(format!("Failed to decode RuuviTag data: {e:?}"))
    })?;

    let mut payload = Payload::new();
    add!(payload, "temperature", tag.temperature);
    add!(payload, "humidity", tag.humidity);
    // Decoder returns Pa
    add!(payload, "pressure", tag.pressure.map(|pa| pa / 100.0));
    add!(payload, "battery", tag.battery_voltage.map(f64::from));
    add!(payload, "tx_power", tag.tx_power.map(i64::from));
    add!(
        payload,
        "movement_counter",
        tag.movement_counter.map(|v| i64::from(u32::from(v)))
    );
    add!(
        payload,
        "measurement_sequence_number",
        tag.measurement_sequence.map(|v| i64::from(u32::from(v)))
    );

    if let (Some(x), Some(y), Some(z)) = (tag.acceleration_x, tag.acceleration_y, tag.acceleration_z)
    {
        let (x, y, z) = (f64::from(x), f64::from(y), f64::from(z));
        payload.insert("acceleration".into(), FieldValue::Float((x * x + y * y + z * z).sqrt()));
        payload.insert("acceleration_x".into(), FieldValue::Float(x));
        payload.insert("acceleration_y".into(), FieldValue::Float(y));
        payload.insert("acceleration_z".into(), FieldValue::Float(z));
    }

    Ok(payload)
}

fn decode_v6_payload(data: &[u8]) -> Result<Payload, DecodeError> {
    let tag = v6::decode(data).map_err(|e| {
        DecodeError::DecoderError(format!("Failed to decode RuuviTag data: {e:?}"))
    })?;

    let mut payload = Payload::new();
    add!(payload, "temperature", tag.temperature);
    add!(payload, "humidity", tag.humidity);
    // Decoder already returns hPa
    add!(payload, "pressure", tag.pressure);
    add!(
        payload,
        "measurement_sequence_number",
        tag.measurement_sequence.map(|v| i64::from(u32::from(v)))
    );
    add!(payload, "pm2_5", tag.pm2_5);
    add!(payload, "co2", tag.co2.map(f64::from));
    add!(payload, "voc_index", tag.voc_index.map(f64::from));
    add!(payload, "nox_index", tag.nox_index.map(f64::from));
    add!(payload, "luminosity", tag.luminosity);

    Ok(payload)
}

/// Start scanning for RuuviTag devices using the specified backend.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `filter` - When set, readings from other sensors are dropped before they
///   reach the returned channel.
pub async fn start_scan(
    backend: Backend,
    filter: Option<MacFilter>,
) -> Result<mpsc::Receiver<RawReading>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(filter).await,
        #[cfg(not(feature = "bluer"))]
        Backend::Bluer => {
            let _ = filter;
            Err(ScanError::BackendNotAvailable(backend.to_string()))
        }
    }
}
