//! Error taxonomy for the autoscaler control loop

use thiserror::Error;

/// Errors returned by a [`PlatformClient`](crate::platform::PlatformClient)
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("platform rejected credentials: {message}")]
    Unauthorized { message: String },

    #[error("platform request failed: {message}")]
    Request { message: String },

    #[error("platform returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid platform response: {message}")]
    InvalidResponse { message: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
}

impl PlatformError {
    /// Whether the failure points at the session itself (expired or revoked token)
    pub fn is_auth(&self) -> bool {
        match self {
            PlatformError::Unauthorized { .. } => true,
            PlatformError::Status { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                PlatformError::Unauthorized {
                    message: err.to_string(),
                }
            }
            _ => PlatformError::Request {
                message: err.to_string(),
            },
        }
    }
}

/// Failures the orchestrator and startup path distinguish between
#[derive(Error, Debug)]
pub enum AutoscalerError {
    #[error("authentication failed: {source}")]
    Authentication { source: PlatformError },

    #[error("failed to list apps in {org}/{space}: {source}")]
    Snapshot {
        org: String,
        space: String,
        source: PlatformError,
    },

    #[error("failed to sample demand for {app}: {source:#}")]
    MetricSource { app: String, source: anyhow::Error },

    #[error("failed to scale {app} to {instances}: {source}")]
    ScaleCommand {
        app: String,
        instances: u32,
        source: PlatformError,
    },

    #[error("invalid configuration: {message}")]
    Configuration { message: String },
}

impl AutoscalerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        AutoscalerError::Configuration {
            message: message.into(),
        }
    }
}
