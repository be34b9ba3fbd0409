use otterstax_adapters::management::ManagementError;
use otterstax_adapters::render::RenderError;
use otterstax_core::environments::{EnvironmentStoreError, Protocol};
use otterstax_core::executor::ExecutorError;
use otterstax_core::tunnel::TunnelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] EnvironmentStoreError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("{source}; is the port-forward running? try `{command}`")]
    PortForwardDown {
        #[source]
        source: ExecutorError,
        command: String,
    },
    #[error("connection failed via {} ({environment}){hint}", .protocol.as_str().to_uppercase())]
    ConnectFailed {
        protocol: Protocol,
        environment: String,
        hint: String,
    },
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error("failed to add data source: {0}")]
    Management(#[from] ManagementError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to serialize environment: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}
