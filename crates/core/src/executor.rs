use std::time::Instant;

use thiserror::Error;

use crate::connection::{BackendError, ConnectionParams, DriverRegistry, Session};
use crate::environments::Protocol;
use crate::results::{CellValue, QueryResult};

const READ_PREFIXES: [&str; 4] = ["SELECT", "SHOW", "DESCRIBE", "\\D"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        let normalized = sql.trim().to_uppercase();
        if READ_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
        {
            Self::Read
        } else {
            Self::Write
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no {protocol} driver is available in this build")]
    DriverUnavailable { protocol: Protocol },
    #[error("connection failed: {0}")]
    Connection(#[source] BackendError),
    #[error("query failed: {0}")]
    Query(#[source] BackendError),
}

/// Runs single statements against the backend over one protocol.
///
/// Each call opens its own session and closes it before returning; there is
/// no pooling and no retry.
#[derive(Debug)]
pub struct ProtocolExecutor<'r> {
    registry: &'r DriverRegistry,
    protocol: Protocol,
    params: ConnectionParams,
}

impl<'r> ProtocolExecutor<'r> {
    #[must_use]
    pub fn new(registry: &'r DriverRegistry, protocol: Protocol, params: ConnectionParams) -> Self {
        Self {
            registry,
            protocol,
            params,
        }
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub async fn execute(
        &self,
        sql: &str,
        params: &[CellValue],
    ) -> Result<QueryResult, ExecutorError> {
        let mut session = self.open_session().await?;

        let kind = StatementKind::classify(sql);
        let started_at = Instant::now();
        tracing::debug!(protocol = %self.protocol, ?kind, bound = params.len(), "executing statement");

        let outcome = run_statement(session.as_mut(), kind, sql, params).await;

        if let Err(error) = session.close().await {
            tracing::warn!(protocol = %self.protocol, %error, "failed to close session cleanly");
        }

        let result = outcome.map_err(ExecutorError::Query)?;
        tracing::debug!(
            protocol = %self.protocol,
            rows = result.len(),
            elapsed_ms = started_at.elapsed().as_millis(),
            "statement completed"
        );
        Ok(result)
    }

    pub async fn test_connectivity(&self) -> bool {
        match self.execute("SELECT 1", &[]).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(
                    protocol = %self.protocol,
                    host = %self.params.host,
                    port = self.params.port,
                    %error,
                    "connectivity check failed"
                );
                false
            }
        }
    }

    async fn open_session(&self) -> Result<Box<dyn Session>, ExecutorError> {
        let connector =
            self.registry
                .connector(self.protocol)
                .ok_or(ExecutorError::DriverUnavailable {
                    protocol: self.protocol,
                })?;

        tracing::debug!(
            driver = connector.driver_name(),
            host = %self.params.host,
            port = self.params.port,
            "opening session"
        );
        connector
            .open(&self.params)
            .await
            .map_err(ExecutorError::Connection)
    }
}

async fn run_statement(
    session: &mut dyn Session,
    kind: StatementKind,
    sql: &str,
    params: &[CellValue],
) -> Result<QueryResult, BackendError> {
    match kind {
        StatementKind::Read => {
            let row_set = session.query(sql, params).await?;
            Ok(QueryResult::from_row_set(row_set))
        }
        StatementKind::Write => {
            let affected = session.execute(sql, params).await?;
            Ok(QueryResult::affected_rows(affected))
        }
    }
}
