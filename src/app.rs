//! Ingestion loop: sensor readings in, InfluxDB points out.
//!
//! This module is decoupled from CLI parsing, logging setup and process exit
//! codes so it can be tested with an injected scanner and writer.

use crate::config::{Config, MacFilter};
use crate::influxdb::{InfluxDbClient, InfluxError, PointWriter};
use crate::point::Point;
use crate::reading::RawReading;
use crate::scanner::{Backend, ScanError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Errors returned by the ingestion loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("failed to connect to InfluxDB: {0}")]
    Connect(#[source] InfluxError),
    #[error("failed to write point: {0}")]
    Write(#[from] InfluxError),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
///
/// Implementations must drop readings from sensors rejected by `filter`.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        filter: Option<MacFilter>,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawReading>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        filter: Option<MacFilter>,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawReading>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend, filter).await })
    }
}

/// Open the database connection the loop writes to.
pub async fn connect(config: &Config) -> Result<InfluxDbClient, RunError> {
    InfluxDbClient::connect(config)
        .await
        .map_err(RunError::Connect)
}

/// Everything a reading needs to become a stored point.
pub struct Ingestor<'a> {
    pub config: Arc<Config>,
    pub writer: &'a dyn PointWriter,
}

/// What happened to a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Written,
    /// None of the configured fields were in the payload
    SkippedEmpty,
}

/// Turn one reading into a point and write it on its own.
pub async fn handle_reading(
    ingestor: &Ingestor<'_>,
    reading: &RawReading,
) -> Result<Outcome, InfluxError> {
    let point = Point::build(&ingestor.config, reading);
    if !point.has_fields() {
        debug!(mac = %reading.identifier, "No configured fields in reading, skipping");
        return Ok(Outcome::SkippedEmpty);
    }

    ingestor.writer.write_points(std::slice::from_ref(&point)).await?;
    debug!(mac = %point.tags.mac, fields = point.fields.len(), "Point written");
    Ok(Outcome::Written)
}

/// Subscribe to sensor readings and store them until `shutdown` completes or
/// the scanner stops.
///
/// The first failed write ends the loop with [`RunError::Write`]; nothing is
/// retried. `shutdown` also interrupts a write in progress. Readings still
/// queued when `shutdown` completes are dropped.
pub async fn run<F>(
    config: Arc<Config>,
    backend: Backend,
    scanner: &dyn Scanner,
    writer: &dyn PointWriter,
    shutdown: F,
) -> Result<(), RunError>
where
    F: Future<Output = ()>,
{
    let mut readings = scanner
        .start_scan(backend, config.mac_filter.clone())
        .await?;
    info!(
        %backend,
        filtered = config.mac_filter.as_ref().map_or(0, |f| f.len()),
        "Listening for RuuviTag broadcasts"
    );

    let ingestor = Ingestor { config, writer };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping");
                break;
            }
            reading = readings.recv() => match reading {
                Some(reading) => tokio::select! {
                    _ = &mut shutdown => {
                        info!("Interrupted during write, stopping");
                        break;
                    }
                    outcome = handle_reading(&ingestor, &reading) => {
                        outcome?;
                    }
                },
                None => {
                    info!("Scanner stopped");
                    break;
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::FieldValue;
    use crate::test_utils::{reading, test_config};
    use reqwest::StatusCode;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    /// Yields the given readings, applying the filter like a real backend.
    #[derive(Debug)]
    struct FakeScanner {
        readings: Vec<RawReading>,
        keep_open: bool,
        filter_seen: Mutex<Option<Option<MacFilter>>>,
    }

    impl FakeScanner {
        fn new(readings: Vec<RawReading>) -> Self {
            Self {
                readings,
                keep_open: false,
                filter_seen: Mutex::new(None),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
            filter: Option<MacFilter>,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawReading>, ScanError>> + Send + '_>>
        {
            *self.filter_seen.lock().unwrap() = Some(filter.clone());
            let readings: Vec<RawReading> = self
                .readings
                .iter()
                .filter(|r| crate::scanner::accepts(filter.as_ref(), &r.identifier))
                .cloned()
                .collect();
            let keep_open = self.keep_open;
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<RawReading>(readings.len().max(1));
                tokio::spawn(async move {
                    for r in readings {
                        let _ = tx.send(r).await;
                    }
                    if keep_open {
                        tx.closed().await;
                    }
                });
                Ok(rx)
            })
        }
    }

    #[derive(Default)]
    struct FakeWriter {
        batches: Mutex<Vec<Vec<Point>>>,
        fail: bool,
    }

    impl FakeWriter {
        fn batches(&self) -> Vec<Vec<Point>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl PointWriter for FakeWriter {
        fn write_points<'a>(
            &'a self,
            points: &'a [Point],
        ) -> Pin<Box<dyn Future<Output = Result<(), InfluxError>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail {
                    return Err(InfluxError::Rejected {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        body: "database not found".into(),
                    });
                }
                self.batches.lock().unwrap().push(points.to_vec());
                Ok(())
            })
        }
    }

    /// Signals once a write has started, then never finishes it.
    #[derive(Default)]
    struct StalledWriter {
        started: Notify,
    }

    impl PointWriter for StalledWriter {
        fn write_points<'a>(
            &'a self,
            _points: &'a [Point],
        ) -> Pin<Box<dyn Future<Output = Result<(), InfluxError>> + Send + 'a>> {
            Box::pin(async move {
                self.started.notify_one();
                std::future::pending::<Result<(), InfluxError>>().await
            })
        }
    }

    fn temperature_reading(mac: &str, t: f64) -> RawReading {
        reading(
            mac,
            &[
                ("data_format", FieldValue::Integer(5)),
                ("temperature", FieldValue::Float(t)),
            ],
        )
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[tokio::test]
    async fn run_writes_one_single_point_batch_per_reading() {
        let scanner = FakeScanner::new(vec![
            temperature_reading("AA:BB", 20.0),
            temperature_reading("CC:DD", 21.0),
        ]);
        let writer = FakeWriter::default();

        run(Arc::new(test_config()), Backend::Bluer, &scanner, &writer, never())
            .await
            .unwrap();

        let batches = writer.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 1));
        assert_eq!(batches[0][0].tags.mac, "AA:BB");
        assert_eq!(
            batches[1][0].fields.get("temperature"),
            Some(&FieldValue::Float(21.0))
        );
    }

    #[tokio::test]
    async fn run_passes_mac_filter_to_scanner() {
        let mut config = test_config();
        config.mac_filter = Some(["AA:BB"].into_iter().collect());
        let scanner = FakeScanner::new(vec![
            temperature_reading("AA:BB", 20.0),
            temperature_reading("CC:DD", 21.0),
            temperature_reading("EE:FF", 22.0),
        ]);
        let writer = FakeWriter::default();

        run(Arc::new(config.clone()), Backend::Bluer, &scanner, &writer, never())
            .await
            .unwrap();

        assert_eq!(
            *scanner.filter_seen.lock().unwrap(),
            Some(config.mac_filter.clone())
        );
        let macs: Vec<String> = writer
            .batches()
            .iter()
            .map(|b| b[0].tags.mac.clone())
            .collect();
        assert_eq!(macs, vec!["AA:BB"]);
    }

    #[tokio::test]
    async fn run_skips_readings_without_configured_fields() {
        let scanner = FakeScanner::new(vec![
            reading("AA:BB", &[("pressure", FieldValue::Float(1012.0))]),
            temperature_reading("AA:BB", 20.0),
        ]);
        let writer = FakeWriter::default();

        run(Arc::new(test_config()), Backend::Bluer, &scanner, &writer, never())
            .await
            .unwrap();

        assert_eq!(writer.batches().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_write_error() {
        let scanner = FakeScanner::new(vec![
            temperature_reading("AA:BB", 20.0),
            temperature_reading("AA:BB", 21.0),
        ]);
        let writer = FakeWriter {
            fail: true,
            ..Default::default()
        };

        let err = run(Arc::new(test_config()), Backend::Bluer, &scanner, &writer, never())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Write(InfluxError::Rejected { .. })));
        assert!(err.to_string().contains("database not found"));
    }

    #[tokio::test]
    async fn run_exits_cleanly_on_shutdown() {
        let mut scanner = FakeScanner::new(vec![]);
        scanner.keep_open = true;
        let writer = FakeWriter::default();

        run(
            Arc::new(test_config()),
            Backend::Bluer,
            &scanner,
            &writer,
            async {},
        )
        .await
        .unwrap();

        assert!(writer.batches().is_empty());
    }

    #[tokio::test]
    async fn handle_reading_builds_enriched_point() {
        let mut config = test_config();
        config.store_fields = vec!["temperature".into(), "humidity".into()];
        config.device_names = Some([("AA:BB".to_string(), "kitchen".to_string())].into());
        config.locations = Some([("kitchen".to_string(), "indoors".to_string())].into());
        let writer = FakeWriter::default();
        let ingestor = Ingestor {
            config: Arc::new(config),
            writer: &writer,
        };

        let outcome = handle_reading(&ingestor, &temperature_reading("AA:BB", 21.5))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Written);

        let point = &writer.batches()[0][0];
        assert_eq!(point.tags.device.as_deref(), Some("kitchen"));
        assert_eq!(point.tags.location.as_deref(), Some("indoors"));
        assert_eq!(point.tags.format, Some(FieldValue::Integer(5)));
    }

    #[tokio::test]
    async fn run_reports_scan_errors() {
        struct BrokenScanner;

        impl Scanner for BrokenScanner {
            fn start_scan(
                &self,
                _backend: Backend,
                _filter: Option<MacFilter>,
            ) -> Pin<
                Box<dyn Future<Output = Result<mpsc::Receiver<RawReading>, ScanError>> + Send + '_>,
            > {
                Box::pin(async { Err(ScanError::Bluetooth("no adapter".into())) })
            }
        }

        let writer = FakeWriter::default();
        let err = run(
            Arc::new(test_config()),
            Backend::Bluer,
            &BrokenScanner,
            &writer,
            never(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Bluetooth error: no adapter");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_during_stalled_write() {
        let mut scanner = FakeScanner::new(vec![temperature_reading("AA:BB", 20.0)]);
        scanner.keep_open = true;
        let writer = StalledWriter::default();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run(
                Arc::new(test_config()),
                Backend::Bluer,
                &scanner,
                &writer,
                writer.started.notified(),
            ),
        )
        .await;

        assert!(
            matches!(result, Ok(Ok(()))),
            "run did not stop while a write was pending"
        );
    }

    #[tokio::test]
    async fn connect_failure_is_not_a_write_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config();
        config.host = "127.0.0.1".to_string();
        config.port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, RunError::Connect(InfluxError::Http(_))));
        assert!(err.to_string().starts_with("failed to connect to InfluxDB:"));
    }
}
