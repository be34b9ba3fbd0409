use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_MYSQL_PORT: u16 = 8816;
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
pub const DEFAULT_HTTP_PORT: u16 = 8085;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Mysql,
    Postgres,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = EnvironmentStoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => Err(EnvironmentStoreError::UnknownProtocol(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    #[default]
    Local,
    Container {
        container: String,
    },
    Cluster {
        namespace: String,
        service: String,
    },
}

impl Topology {
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster { .. })
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Container { .. } => "container",
            Self::Cluster { .. } => "cluster",
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_postgres_port() -> u16 {
    DEFAULT_POSTGRES_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

/// One named deployment of the backend: where it listens and how to log in.
///
/// The profile name is the key it is stored under and is not repeated in the
/// serialized table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentProfile {
    #[serde(skip)]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub mysql_port: u16,
    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub topology: Topology,
}

impl EnvironmentProfile {
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, topology: Topology) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            mysql_port: DEFAULT_MYSQL_PORT,
            postgres_port: DEFAULT_POSTGRES_PORT,
            http_port: DEFAULT_HTTP_PORT,
            user: None,
            password: None,
            database: None,
            topology,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn port_for(&self, protocol: Protocol) -> u16 {
        match protocol {
            Protocol::Mysql => self.mysql_port,
            Protocol::Postgres => self.postgres_port,
        }
    }
}

/// A downstream connection registered with the management API.
///
/// Stored for reference only; the password never reaches disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSource {
    pub alias: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
}

#[derive(Debug, Error)]
pub enum EnvironmentStoreError {
    #[error("unknown environment `{0}`")]
    UnknownEnvironment(String),
    #[error("unknown protocol `{0}`, use `mysql` or `postgres`")]
    UnknownProtocol(String),
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EnvironmentStoreError {
    /// Whether this is a bad environment or protocol name rather than an I/O problem.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::UnknownEnvironment(_) | Self::UnknownProtocol(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EnvironmentsDocument {
    environments: BTreeMap<String, EnvironmentProfile>,
    current_environment: String,
    #[serde(default)]
    protocol: Protocol,
    #[serde(default)]
    data_sources: Vec<DataSource>,
}

impl Default for EnvironmentsDocument {
    fn default() -> Self {
        let profiles = [
            EnvironmentProfile::new("local", DEFAULT_HOST, Topology::Local),
            EnvironmentProfile::new(
                "docker",
                "localhost",
                Topology::Container {
                    container: "otterstax".to_string(),
                },
            ),
            EnvironmentProfile::new(
                "k8s",
                DEFAULT_HOST,
                Topology::Cluster {
                    namespace: "otterstax".to_string(),
                    service: "otterstax-server".to_string(),
                },
            ),
        ];

        Self {
            environments: profiles
                .into_iter()
                .map(|profile| {
                    let profile = profile.with_credentials("testuser", "testpass");
                    (profile.name.clone(), profile)
                })
                .collect(),
            current_environment: "local".to_string(),
            protocol: Protocol::Mysql,
            data_sources: Vec::new(),
        }
    }
}

impl EnvironmentsDocument {
    fn normalize(&mut self) {
        for (name, profile) in &mut self.environments {
            profile.name.clone_from(name);
        }
    }
}

/// Named environment profiles plus the active environment and protocol.
///
/// Every mutation is written back to disk before it returns.
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    path: PathBuf,
    document: EnvironmentsDocument,
}

impl EnvironmentStore {
    pub fn load_default() -> Result<Self, EnvironmentStoreError> {
        let path = default_config_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, EnvironmentStoreError> {
        let path = path.into();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self {
                path,
                document: EnvironmentsDocument::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| EnvironmentStoreError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                document: EnvironmentsDocument::default(),
            });
        }

        let mut document: EnvironmentsDocument =
            toml::from_str(&raw).map_err(|source| EnvironmentStoreError::Parse {
                path: path.clone(),
                source,
            })?;
        document.normalize();

        if !document
            .environments
            .contains_key(&document.current_environment)
        {
            return Err(EnvironmentStoreError::UnknownEnvironment(
                document.current_environment,
            ));
        }

        Ok(Self { path, document })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn environments(&self) -> impl Iterator<Item = &EnvironmentProfile> {
        self.document.environments.values()
    }

    #[must_use]
    pub fn environment(&self, name: &str) -> Option<&EnvironmentProfile> {
        self.document.environments.get(name)
    }

    #[must_use]
    pub fn active_name(&self) -> &str {
        &self.document.current_environment
    }

    /// The active profile. Loading and `set_active` keep the active name a
    /// key of the map, so this lookup cannot miss.
    #[must_use]
    pub fn active(&self) -> &EnvironmentProfile {
        &self.document.environments[&self.document.current_environment]
    }

    pub fn set_active(&mut self, name: &str) -> Result<(), EnvironmentStoreError> {
        if !self.document.environments.contains_key(name) {
            return Err(EnvironmentStoreError::UnknownEnvironment(name.to_string()));
        }

        self.document.current_environment = name.to_string();
        tracing::info!(environment = name, "active environment changed");
        self.persist()
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.document.protocol
    }

    pub fn set_protocol(&mut self, raw: &str) -> Result<Protocol, EnvironmentStoreError> {
        let protocol = raw.parse::<Protocol>()?;
        self.document.protocol = protocol;
        tracing::info!(%protocol, "active protocol changed");
        self.persist()?;
        Ok(protocol)
    }

    #[must_use]
    pub fn data_sources(&self) -> &[DataSource] {
        &self.document.data_sources
    }

    pub fn upsert_environment(
        &mut self,
        profile: EnvironmentProfile,
    ) -> Result<(), EnvironmentStoreError> {
        self.document
            .environments
            .insert(profile.name.clone(), profile);
        self.persist()
    }

    pub fn record_data_source(&mut self, source: DataSource) -> Result<(), EnvironmentStoreError> {
        if let Some(existing) = self
            .document
            .data_sources
            .iter_mut()
            .find(|existing| existing.alias == source.alias)
        {
            *existing = source;
        } else {
            self.document.data_sources.push(source);
        }
        self.persist()
    }

    pub fn persist(&self) -> Result<(), EnvironmentStoreError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| EnvironmentStoreError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.document)
            .map_err(|source| EnvironmentStoreError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| EnvironmentStoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "config persisted");
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, EnvironmentStoreError> {
    if let Some(custom) = env::var_os("OTTERSTAX_CONFIG_DIR") {
        return Ok(PathBuf::from(custom).join("config.toml"));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(EnvironmentStoreError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(EnvironmentStoreError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("otterstax").join("config.toml"))
}
