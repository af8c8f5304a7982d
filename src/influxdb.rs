//! InfluxDB 1.x HTTP client.
//!
//! Points are written with the `/write` endpoint in line protocol, one request
//! per batch. Connection setup pings the server so an unreachable database is
//! reported before any sensor is observed.

use crate::config::Config;
use crate::point::Point;
use reqwest::{Client, StatusCode, Url};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info};

/// Errors talking to InfluxDB.
#[derive(Error, Debug)]
pub enum InfluxError {
    #[error("invalid InfluxDB URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("InfluxDB rejected request with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Database capability used by the ingestion loop.
pub trait PointWriter: Send + Sync {
    /// Persist a batch of points.
    fn write_points<'a>(
        &'a self,
        points: &'a [Point],
    ) -> Pin<Box<dyn Future<Output = Result<(), InfluxError>> + Send + 'a>>;
}

/// Join points into a line protocol request body, skipping points without
/// fields. Returns `None` when nothing is left to write.
pub fn line_protocol_body(points: &[Point]) -> Option<String> {
    let lines: Vec<String> = points.iter().filter_map(Point::to_line_protocol).collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Client bound to one InfluxDB server and database.
#[derive(Debug, Clone)]
pub struct InfluxDbClient {
    http: Client,
    base_url: Url,
    database: String,
    credentials: Option<(String, String)>,
}

impl InfluxDbClient {
    /// Create a client for the configured server and select the configured
    /// database as the write target. Does not touch the network.
    pub fn new(config: &Config) -> Result<Self, InfluxError> {
        let scheme = if config.ssl { "https" } else { "http" };
        let base = format!("{scheme}://{}:{}/", config.host, config.port);
        let base_url =
            Url::parse(&base).map_err(|e| InfluxError::InvalidUrl(format!("{base}: {e}")))?;

        Ok(Self {
            http: Client::builder().build()?,
            base_url,
            database: config.database.clone(),
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        })
    }

    /// Create a client and verify the server answers `/ping`.
    pub async fn connect(config: &Config) -> Result<Self, InfluxError> {
        let client = Self::new(config)?;
        client.ping().await?;
        info!(url = %client.base_url, database = %client.database, "Connected to InfluxDB");
        Ok(client)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfluxError> {
        self.base_url
            .join(path)
            .map_err(|e| InfluxError::InvalidUrl(format!("{path}: {e}")))
    }

    /// URL of the write endpoint for the selected database.
    pub fn write_url(&self) -> Result<Url, InfluxError> {
        let mut url = self.endpoint("write")?;
        url.query_pairs_mut().append_pair("db", &self.database);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    /// Check that the server is reachable.
    pub async fn ping(&self) -> Result<(), InfluxError> {
        let request = self.authorize(self.http.get(self.endpoint("ping")?));
        let response = request.send().await?;
        check_status(response).await
    }

    /// Write line protocol text to the selected database.
    pub async fn write_lines(&self, body: String) -> Result<(), InfluxError> {
        let request = self.authorize(self.http.post(self.write_url()?)).body(body);
        let response = request.send().await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), InfluxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(InfluxError::Rejected {
        status,
        body: body.trim().to_string(),
    })
}

impl PointWriter for InfluxDbClient {
    fn write_points<'a>(
        &'a self,
        points: &'a [Point],
    ) -> Pin<Box<dyn Future<Output = Result<(), InfluxError>> + Send + 'a>> {
        Box::pin(async move {
            match line_protocol_body(points) {
                Some(body) => {
                    debug!(points = points.len(), "Writing points");
                    self.write_lines(body).await
                }
                None => Ok(()),
            }
        })
    }
}
