//! BlueZ D-Bus backend for RuuviTag scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    MANUFACTURER_DATA_TYPE, READING_CHANNEL_BUFFER_SIZE, RUUVI_MANUFACTURER_ID,
    RUUVI_MANUFACTURER_ID_BYTES, ScanError, accepts, decode_ruuvi_data,
};
use crate::config::MacFilter;
use crate::mac_address::MacAddress;
use crate::reading::RawReading;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning for RuuviTag devices using the BlueZ D-Bus backend.
///
/// Registers a passive advertisement monitor for Ruuvi manufacturer data and
/// sends every decoded reading that passes `filter` through the returned
/// channel. Runs until the receiver is dropped.
pub async fn start_scan(
    filter: Option<MacFilter>,
) -> Result<mpsc::Receiver<RawReading>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(adapter = adapter.name(), "Bluetooth adapter ready");

    let (tx, rx) = mpsc::channel(READING_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: RUUVI_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state; dropping it releases the subscription
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event {
                match read_device(&adapter, device_id.device, filter.as_ref()).await {
                    Ok(Some(reading)) => {
                        if tx.send(reading).await.is_err() {
                            debug!("Reading receiver dropped, stopping scan");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to read device"),
                }
            }
        }
    });

    Ok(rx)
}

/// Read and decode the manufacturer data of a discovered device.
///
/// Returns `Ok(None)` for devices rejected by the filter, devices without
/// Ruuvi manufacturer data, and undecodable payloads.
async fn read_device(
    adapter: &Adapter,
    address: Address,
    filter: Option<&MacFilter>,
) -> Result<Option<RawReading>, ScanError> {
    let mac: MacAddress = address.into();
    if !accepts(filter, &mac.to_string()) {
        return Ok(None);
    }

    let device = adapter.device(address)?;
    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };
    let Some(ruuvi_data) = manufacturer_data.get(&RUUVI_MANUFACTURER_ID) else {
        return Ok(None);
    };

    match decode_ruuvi_data(mac, ruuvi_data) {
        Ok(reading) => Ok(Some(reading)),
        Err(e) => {
            debug!(%mac, error = %e, "Ignoring undecodable advertisement");
            Ok(None)
        }
    }
}
