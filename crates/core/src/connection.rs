use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::environments::{EnvironmentProfile, Protocol};
use crate::results::{CellValue, RowSet};

pub const LOOPBACK_HOST: &str = "127.0.0.1";
pub const DEFAULT_USER: &str = "testuser";
pub const DEFAULT_PASSWORD: &str = "testpass";
pub const DEFAULT_POSTGRES_DATABASE: &str = "postgres";

/// Concrete parameters for one connection attempt. Derived per operation.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Host the backend is reachable on. Cluster deployments are only reachable
/// through a port-forward bound on loopback, whatever the profile says.
#[must_use]
pub fn effective_host(profile: &EnvironmentProfile) -> &str {
    if profile.topology.is_cluster() {
        LOOPBACK_HOST
    } else {
        &profile.host
    }
}

#[must_use]
pub fn resolve_connection_params(
    profile: &EnvironmentProfile,
    protocol: Protocol,
) -> ConnectionParams {
    let database = match protocol {
        Protocol::Postgres => Some(
            profile
                .database
                .clone()
                .unwrap_or_else(|| DEFAULT_POSTGRES_DATABASE.to_string()),
        ),
        Protocol::Mysql => None,
    };

    ConnectionParams {
        host: effective_host(profile).to_string(),
        port: profile.port_for(protocol),
        user: profile
            .user
            .clone()
            .unwrap_or_else(|| DEFAULT_USER.to_string()),
        password: profile
            .password
            .clone()
            .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
        database,
    }
}

#[must_use]
pub fn resolve_management_endpoint(profile: &EnvironmentProfile) -> String {
    format!("http://{}:{}", effective_host(profile), profile.http_port)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An open connection owned by one executor call.
#[async_trait]
pub trait Session: Send {
    /// Runs a statement that returns rows. `columns` is empty when the
    /// statement carries no result metadata.
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> Result<RowSet, BackendError>;

    /// Runs a statement inside a transaction, commits it and returns the
    /// affected-row count.
    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, BackendError>;

    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn driver_name(&self) -> &'static str;

    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Session>, BackendError>;
}

/// Drivers available to this build, at most one per protocol.
#[derive(Default)]
pub struct DriverRegistry {
    connectors: HashMap<Protocol, Box<dyn Connector>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector unless one is already present for the protocol,
    /// so the first registration is the preferred driver.
    pub fn register(&mut self, protocol: Protocol, connector: Box<dyn Connector>) -> bool {
        if self.connectors.contains_key(&protocol) {
            tracing::debug!(
                %protocol,
                driver = connector.driver_name(),
                "driver already registered, keeping the earlier one"
            );
            return false;
        }

        tracing::debug!(%protocol, driver = connector.driver_name(), "driver registered");
        self.connectors.insert(protocol, connector);
        true
    }

    #[must_use]
    pub fn connector(&self, protocol: Protocol) -> Option<&dyn Connector> {
        self.connectors.get(&protocol).map(|connector| &**connector)
    }

    #[must_use]
    pub fn supports(&self, protocol: Protocol) -> bool {
        self.connectors.contains_key(&protocol)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut drivers = self
            .connectors
            .iter()
            .map(|(protocol, connector)| (protocol.as_str(), connector.driver_name()))
            .collect::<Vec<_>>();
        drivers.sort_unstable();
        f.debug_struct("DriverRegistry")
            .field("drivers", &drivers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        resolve_connection_params, resolve_management_endpoint, BackendError, ConnectionParams,
        Connector, DriverRegistry, Session,
    };
    use crate::environments::{EnvironmentProfile, Protocol, Topology};

    struct NamedConnector(&'static str);

    #[async_trait]
    impl Connector for NamedConnector {
        fn driver_name(&self) -> &'static str {
            self.0
        }

        async fn open(
            &self,
            _params: &ConnectionParams,
        ) -> Result<Box<dyn Session>, BackendError> {
            Err(BackendError::new("not connectable"))
        }
    }

    fn cluster_profile(host: &str) -> EnvironmentProfile {
        EnvironmentProfile::new(
            "k8s",
            host,
            Topology::Cluster {
                namespace: "otterstax".to_string(),
                service: "otterstax-server".to_string(),
            },
        )
    }

    #[test]
    fn non_cluster_topologies_keep_configured_host() {
        let topologies = [
            Topology::Local,
            Topology::Container {
                container: "otterstax".to_string(),
            },
        ];
        for topology in topologies {
            for host in ["0.0.0.0", "db.internal", "10.1.2.3"] {
                let profile = EnvironmentProfile::new("env", host, topology.clone());
                for protocol in [Protocol::Mysql, Protocol::Postgres] {
                    assert_eq!(resolve_connection_params(&profile, protocol).host, host);
                }
            }
        }
    }

    #[test]
    fn cluster_topology_always_resolves_to_loopback() {
        for host in ["0.0.0.0", "db.internal", "", "10.1.2.3"] {
            let profile = cluster_profile(host);
            for protocol in [Protocol::Mysql, Protocol::Postgres] {
                assert_eq!(
                    resolve_connection_params(&profile, protocol).host,
                    "127.0.0.1"
                );
            }
        }
    }

    #[test]
    fn protocol_selects_port_and_database() {
        let mut profile = EnvironmentProfile::new("local", "0.0.0.0", Topology::Local);
        profile.mysql_port = 3307;
        profile.postgres_port = 6432;

        let mysql = resolve_connection_params(&profile, Protocol::Mysql);
        assert_eq!(mysql.port, 3307);
        assert_eq!(mysql.database, None);

        let postgres = resolve_connection_params(&profile, Protocol::Postgres);
        assert_eq!(postgres.port, 6432);
        assert_eq!(postgres.database.as_deref(), Some("postgres"));

        profile.database = Some("analytics".to_string());
        let postgres = resolve_connection_params(&profile, Protocol::Postgres);
        assert_eq!(postgres.database.as_deref(), Some("analytics"));
        assert_eq!(resolve_connection_params(&profile, Protocol::Mysql).database, None);
    }

    #[test]
    fn credentials_default_only_when_absent() {
        let profile = EnvironmentProfile::new("local", "0.0.0.0", Topology::Local);
        let params = resolve_connection_params(&profile, Protocol::Mysql);
        assert_eq!(params.user, "testuser");
        assert_eq!(params.password, "testpass");

        let profile = profile.with_credentials("admin", "");
        let params = resolve_connection_params(&profile, Protocol::Mysql);
        assert_eq!(params.user, "admin");
        assert_eq!(params.password, "");
    }

    #[test]
    fn debug_output_redacts_password() {
        let profile = EnvironmentProfile::new("local", "0.0.0.0", Topology::Local)
            .with_credentials("admin", "hunter2");
        let rendered = format!("{:?}", resolve_connection_params(&profile, Protocol::Mysql));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("admin"));
    }

    #[test]
    fn management_endpoint_follows_host_rewrite() {
        let mut local = EnvironmentProfile::new("local", "db.internal", Topology::Local);
        local.http_port = 9000;
        assert_eq!(resolve_management_endpoint(&local), "http://db.internal:9000");
        assert_eq!(
            resolve_management_endpoint(&cluster_profile("db.internal")),
            "http://127.0.0.1:8085"
        );
    }

    #[test]
    fn registry_keeps_first_driver_per_protocol() {
        let mut registry = DriverRegistry::new();
        assert!(!registry.supports(Protocol::Mysql));
        assert!(registry.register(Protocol::Mysql, Box::new(NamedConnector("primary"))));
        assert!(!registry.register(Protocol::Mysql, Box::new(NamedConnector("fallback"))));

        let connector = registry
            .connector(Protocol::Mysql)
            .expect("mysql driver should be registered");
        assert_eq!(connector.driver_name(), "primary");
        assert!(registry.connector(Protocol::Postgres).is_none());
    }
}
