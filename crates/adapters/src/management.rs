//! Client for the backend's HTTP management API.

use std::time::Duration;

use otterstax_core::environments::DataSource;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub const ADD_CONNECTION_PATH: &str = "/add_connection";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of an `add_connection` call. The port travels as a string.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AddConnectionRequest {
    pub alias: String,
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

impl std::fmt::Debug for AddConnectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddConnectionRequest")
            .field("alias", &self.alias)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl AddConnectionRequest {
    #[must_use]
    pub fn new(
        alias: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            host: host.into(),
            port: port.to_string(),
            username: username.into(),
            password: password.into(),
            database: database.into(),
            table: String::new(),
        }
    }

    /// What gets remembered locally once the backend accepted the source.
    /// The password is left out.
    #[must_use]
    pub fn to_data_source(&self, port: u16) -> DataSource {
        DataSource {
            alias: self.alias.clone(),
            host: self.host.clone(),
            port,
            username: self.username.clone(),
            database: self.database.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("failed to reach management API at {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("management API at {url} answered {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
}

#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl ManagementClient {
    pub fn new() -> Result<Self, ManagementError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ManagementError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ManagementError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self { http, timeout })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers an external data source with the backend. Only `200 OK`
    /// counts as accepted.
    pub async fn add_connection(
        &self,
        endpoint: &str,
        request: &AddConnectionRequest,
    ) -> Result<(), ManagementError> {
        let url = format!("{}{ADD_CONNECTION_PATH}", endpoint.trim_end_matches('/'));
        tracing::debug!(%url, alias = %request.alias, "registering data source");

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|source| ManagementError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ManagementError::Status { url, status, body });
        }

        tracing::info!(alias = %request.alias, "data source registered");
        Ok(())
    }
}
