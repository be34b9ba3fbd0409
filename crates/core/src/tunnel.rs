use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::environments::{EnvironmentProfile, Topology};

pub const DEFAULT_TUNNEL_PROGRAM: &str = "kubectl";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Stopped,
    Starting,
    Running,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub namespace: String,
    pub service: String,
    pub local_port: u16,
    pub remote_port: u16,
}

impl TunnelTarget {
    /// Forwards `port` on loopback to the same port on the profile's service.
    /// Only cluster profiles need a tunnel.
    #[must_use]
    pub fn for_profile(profile: &EnvironmentProfile, port: u16) -> Option<Self> {
        match &profile.topology {
            Topology::Cluster { namespace, service } => Some(Self {
                namespace: namespace.clone(),
                service: service.clone(),
                local_port: port,
                remote_port: port,
            }),
            Topology::Local | Topology::Container { .. } => None,
        }
    }

    #[must_use]
    pub fn port_forward_args(&self) -> Vec<String> {
        vec![
            "port-forward".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            format!("svc/{}", self.service),
            format!("{}:{}", self.local_port, self.remote_port),
        ]
    }
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel can only start when stopped (currently {0:?})")]
    InvalidState(TunnelState),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("port-forward exited before becoming ready ({status}): {stderr}")]
    BindFailed { status: ExitStatus, stderr: String },
    #[error("failed to check port-forward liveness: {0}")]
    Probe(#[source] io::Error),
    #[error("failed to stop port-forward: {0}")]
    Stop(#[source] io::Error),
}

/// Owns the port-forward child process for one cluster environment.
///
/// `Stopped -> Starting -> Running`, or `Starting -> Failed`; `stop` returns
/// to `Stopped` from anywhere. The child handle exists only while Starting or
/// Running. Callers must `stop` on every path; dropping the supervisor kills
/// the child as a last resort.
#[derive(Debug)]
pub struct TunnelSupervisor {
    target: TunnelTarget,
    program: String,
    leading_args: Vec<String>,
    grace_period: Duration,
    state: TunnelState,
    child: Option<Child>,
}

impl TunnelSupervisor {
    #[must_use]
    pub fn new(target: TunnelTarget) -> Self {
        Self {
            target,
            program: DEFAULT_TUNNEL_PROGRAM.to_string(),
            leading_args: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            state: TunnelState::Stopped,
            child: None,
        }
    }

    /// Replaces the forwarding program. `leading_args` go before the
    /// `port-forward` arguments, e.g. `--context prod` for kubectl.
    #[must_use]
    pub fn with_command(mut self, program: impl Into<String>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn target(&self) -> &TunnelTarget {
        &self.target
    }

    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.state
    }

    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.target.local_port
    }

    #[must_use]
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub async fn start(&mut self) -> Result<(), TunnelError> {
        if self.state != TunnelState::Stopped {
            return Err(TunnelError::InvalidState(self.state));
        }

        tracing::info!(
            namespace = %self.target.namespace,
            service = %self.target.service,
            local_port = self.target.local_port,
            remote_port = self.target.remote_port,
            "starting port-forward"
        );

        let spawned = Command::new(&self.program)
            .args(&self.leading_args)
            .args(self.target.port_forward_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.state = TunnelState::Failed;
                return Err(TunnelError::Spawn {
                    program: self.program.clone(),
                    source,
                });
            }
        };

        self.child = Some(child);
        self.state = TunnelState::Starting;
        tokio::time::sleep(self.grace_period).await;
        self.await_ready().await
    }

    async fn await_ready(&mut self) -> Result<(), TunnelError> {
        let Some(child) = self.child.as_mut() else {
            self.state = TunnelState::Failed;
            return Err(TunnelError::InvalidState(TunnelState::Failed));
        };

        match child.try_wait() {
            Ok(None) => {
                self.state = TunnelState::Running;
                tracing::info!(local_port = self.target.local_port, "port-forward running");
                Ok(())
            }
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    if let Err(error) = pipe.read_to_string(&mut stderr).await {
                        tracing::debug!(%error, "could not read port-forward stderr");
                    }
                }
                self.child = None;
                self.state = TunnelState::Failed;
                tracing::warn!(%status, "port-forward exited during startup");
                Err(TunnelError::BindFailed {
                    status,
                    stderr: stderr.trim().to_string(),
                })
            }
            Err(error) => {
                if let Err(kill_error) = self.terminate().await {
                    tracing::warn!(%kill_error, "failed to kill unready port-forward");
                }
                self.state = TunnelState::Failed;
                Err(TunnelError::Probe(error))
            }
        }
    }

    pub async fn stop(&mut self) -> Result<(), TunnelError> {
        if self.state == TunnelState::Stopped {
            return Ok(());
        }

        let terminated = self.terminate().await;
        self.state = TunnelState::Stopped;
        tracing::info!(local_port = self.target.local_port, "port-forward stopped");
        terminated.map_err(TunnelError::Stop)
    }

    /// Starts the tunnel, runs `operation`, and stops the tunnel whatever the
    /// outcome. An operation error wins over a stop error.
    pub async fn scoped<F, T, E>(&mut self, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<TunnelError>,
    {
        if let Err(error) = self.start().await {
            if let Err(stop_error) = self.stop().await {
                tracing::warn!(%stop_error, "failed to clean up port-forward after start failure");
            }
            return Err(error.into());
        }

        let outcome = operation.await;
        let stopped = self.stop().await;
        match (outcome, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(stop_error)) => Err(stop_error.into()),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(stop_error)) => {
                tracing::warn!(%stop_error, "failed to stop port-forward after operation error");
                Err(error)
            }
        }
    }

    async fn terminate(&mut self) -> io::Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Err(error) = child.start_kill() {
            if child.try_wait()?.is_none() {
                return Err(error);
            }
        }
        let status = child.wait().await?;
        tracing::debug!(%status, "port-forward exited");
        Ok(())
    }
}

impl Drop for TunnelSupervisor {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            tracing::warn!(
                local_port = self.target.local_port,
                "port-forward still alive at drop, killing it"
            );
            let _ = child.start_kill();
        }
    }
}
