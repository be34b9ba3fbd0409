use std::future::Future;
use std::time::Duration;

use otterstax_adapters::management::{AddConnectionRequest, ManagementClient};
use otterstax_adapters::render::{render, OutputFormat};
use otterstax_core::connection::{
    resolve_connection_params, resolve_management_endpoint, DriverRegistry,
};
use otterstax_core::environments::{
    EnvironmentProfile, EnvironmentStore, EnvironmentStoreError, Protocol,
};
use otterstax_core::executor::{ExecutorError, ProtocolExecutor};
use otterstax_core::results::CellValue;
use otterstax_core::schema::{IntrospectionRequest, SchemaIntrospector};
use otterstax_core::tunnel::{
    TunnelSupervisor, TunnelTarget, DEFAULT_GRACE_PERIOD, DEFAULT_TUNNEL_PROGRAM,
};
use serde_json::Value;

use crate::cli::{AddSourceArgs, Command, EnvAction, GlobalArgs, ProtocolAction};
use crate::error::AppError;

const PASSWORD_MASK: &str = "********";

/// How port-forward processes are launched for cluster environments.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub program: String,
    pub leading_args: Vec<String>,
    pub grace_period: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_TUNNEL_PROGRAM.to_string(),
            leading_args: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl TunnelSettings {
    /// Runs the port-forward against a named kubeconfig context instead of
    /// the current one.
    #[must_use]
    pub fn with_context(mut self, context: Option<&str>) -> Self {
        if let Some(context) = context {
            self.leading_args
                .extend(["--context".to_string(), context.to_string()]);
        }
        self
    }

    fn supervisor(&self, target: TunnelTarget) -> TunnelSupervisor {
        TunnelSupervisor::new(target)
            .with_command(self.program.clone(), self.leading_args.clone())
            .with_grace_period(self.grace_period)
    }

    fn command_line(&self, target: &TunnelTarget) -> String {
        std::iter::once(self.program.clone())
            .chain(self.leading_args.iter().cloned())
            .chain(target.port_forward_args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes one parsed command and returns what should go to stdout.
pub struct Runner<'r> {
    registry: &'r DriverRegistry,
    protocol_override: Option<Protocol>,
    no_tunnel: bool,
    tunnel: TunnelSettings,
}

impl<'r> Runner<'r> {
    #[must_use]
    pub fn new(registry: &'r DriverRegistry, global: &GlobalArgs) -> Self {
        Self {
            registry,
            protocol_override: global.protocol,
            no_tunnel: global.no_tunnel,
            tunnel: TunnelSettings::default(),
        }
    }

    #[must_use]
    pub fn with_tunnel_settings(mut self, tunnel: TunnelSettings) -> Self {
        self.tunnel = tunnel;
        self
    }

    pub async fn run(
        &self,
        command: &Command,
        store: &mut EnvironmentStore,
    ) -> Result<String, AppError> {
        match command {
            Command::Connect { env } => self.connect(store, env.as_deref()).await,
            Command::Query { sql, format, binds } => {
                let bound = binds
                    .iter()
                    .map(|raw| CellValue::parse_binding(raw))
                    .collect::<Vec<_>>();
                self.query(store, sql, &bound, *format).await
            }
            Command::Schema {
                database,
                table,
                format,
            } => {
                let request =
                    IntrospectionRequest::from_scope(database.as_deref(), table.as_deref());
                self.schema(store, &request, *format).await
            }
            Command::AddSource(args) => self.add_source(store, args).await,
            Command::Env { action } => env_command(store, action),
            Command::Protocol { action } => protocol_command(store, action),
        }
    }

    fn protocol(&self, store: &EnvironmentStore) -> Protocol {
        self.protocol_override.unwrap_or_else(|| store.protocol())
    }

    async fn connect(
        &self,
        store: &mut EnvironmentStore,
        env: Option<&str>,
    ) -> Result<String, AppError> {
        if let Some(name) = env {
            store.set_active(name)?;
        }

        let protocol = self.protocol(store);
        let profile = store.active();
        let port = profile.port_for(protocol);
        let executor = self.executor(profile, protocol);

        let reachable = self
            .run_with_tunnel(profile, port, async {
                Ok::<_, AppError>(executor.test_connectivity().await)
            })
            .await?;

        if reachable {
            Ok(format!(
                "Successfully connected to OtterStax via {} ({})",
                protocol.as_str().to_uppercase(),
                profile.name
            ))
        } else {
            Err(AppError::ConnectFailed {
                protocol,
                environment: profile.name.clone(),
                hint: self
                    .manual_tunnel_command(profile, port)
                    .map(|command| format!("; is the port-forward running? try `{command}`"))
                    .unwrap_or_default(),
            })
        }
    }

    async fn query(
        &self,
        store: &EnvironmentStore,
        sql: &str,
        params: &[CellValue],
        format: OutputFormat,
    ) -> Result<String, AppError> {
        let protocol = self.protocol(store);
        let profile = store.active();
        let port = profile.port_for(protocol);
        let executor = self.executor(profile, protocol);

        let result = self
            .run_with_tunnel(profile, port, async {
                executor
                    .execute(sql, params)
                    .await
                    .map_err(|error| self.explain(profile, port, error))
            })
            .await?;

        Ok(render(&result, format)?)
    }

    async fn schema(
        &self,
        store: &EnvironmentStore,
        request: &IntrospectionRequest,
        format: OutputFormat,
    ) -> Result<String, AppError> {
        let protocol = self.protocol(store);
        let profile = store.active();
        let port = profile.port_for(protocol);
        let executor = self.executor(profile, protocol);
        let introspector = SchemaIntrospector::new(&executor);

        let result = self
            .run_with_tunnel(profile, port, async {
                introspector
                    .run(request)
                    .await
                    .map_err(|error| self.explain(profile, port, error))
            })
            .await?;

        Ok(render(&result, format)?)
    }

    async fn add_source(
        &self,
        store: &mut EnvironmentStore,
        args: &AddSourceArgs,
    ) -> Result<String, AppError> {
        let request = AddConnectionRequest::new(
            &args.alias,
            &args.host,
            args.port,
            &args.user,
            &args.password,
            &args.database,
        );
        let client = ManagementClient::new()?;

        let profile = store.active();
        let endpoint = resolve_management_endpoint(profile);
        self.run_with_tunnel(profile, profile.http_port, async {
            client
                .add_connection(&endpoint, &request)
                .await
                .map_err(AppError::from)
        })
        .await?;

        store.record_data_source(request.to_data_source(args.port))?;
        Ok(format!("Data source '{}' added successfully", args.alias))
    }

    fn executor(&self, profile: &EnvironmentProfile, protocol: Protocol) -> ProtocolExecutor<'r> {
        ProtocolExecutor::new(
            self.registry,
            protocol,
            resolve_connection_params(profile, protocol),
        )
    }

    /// Runs `operation` behind a port-forward when the profile lives in a
    /// cluster and tunnelling was not turned off. The tunnel is stopped on
    /// every path.
    async fn run_with_tunnel<T, F>(
        &self,
        profile: &EnvironmentProfile,
        port: u16,
        operation: F,
    ) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let target = match TunnelTarget::for_profile(profile, port) {
            Some(target) if !self.no_tunnel => target,
            _ => return operation.await,
        };

        tracing::info!(
            environment = %profile.name,
            namespace = %target.namespace,
            service = %target.service,
            port,
            "starting port-forward for cluster environment"
        );
        let mut supervisor = self.tunnel.supervisor(target);
        supervisor.scoped(operation).await
    }

    fn manual_tunnel_command(&self, profile: &EnvironmentProfile, port: u16) -> Option<String> {
        if !self.no_tunnel {
            return None;
        }
        TunnelTarget::for_profile(profile, port).map(|target| self.tunnel.command_line(&target))
    }

    fn explain(&self, profile: &EnvironmentProfile, port: u16, error: ExecutorError) -> AppError {
        match (&error, self.manual_tunnel_command(profile, port)) {
            (ExecutorError::Connection(_), Some(command)) => AppError::PortForwardDown {
                source: error,
                command,
            },
            _ => AppError::Executor(error),
        }
    }
}

fn env_command(store: &mut EnvironmentStore, action: &EnvAction) -> Result<String, AppError> {
    match action {
        EnvAction::List => {
            let active = store.active_name();
            Ok(store
                .environments()
                .map(|profile| {
                    let marker = if profile.name == active { '*' } else { ' ' };
                    format!("{marker} {}", profile.name)
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        EnvAction::Set { name } => {
            store.set_active(name)?;
            Ok(format!("Environment set to: {name}"))
        }
        EnvAction::Show { name } => {
            let profile = match name {
                Some(name) => store
                    .environment(name)
                    .ok_or_else(|| EnvironmentStoreError::UnknownEnvironment(name.clone()))?,
                None => store.active(),
            };
            Ok(serde_json::to_string_pretty(&profile_json(profile)?)?)
        }
    }
}

fn profile_json(profile: &EnvironmentProfile) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(profile)?;
    if let Value::Object(object) = &mut value {
        object.insert("name".to_string(), Value::String(profile.name.clone()));
        if let Some(password) = object.get_mut("password") {
            if !password.is_null() {
                *password = Value::String(PASSWORD_MASK.to_string());
            }
        }
    }
    Ok(value)
}

fn protocol_command(
    store: &mut EnvironmentStore,
    action: &ProtocolAction,
) -> Result<String, AppError> {
    match action {
        ProtocolAction::Show => Ok(format!("Current protocol: {}", store.protocol())),
        ProtocolAction::Set { name } => {
            let protocol = store.set_protocol(name)?;
            Ok(format!("Protocol set to: {protocol}"))
        }
    }
}
