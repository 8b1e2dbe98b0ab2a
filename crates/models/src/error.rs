use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorShape {
    pub error_message: String,
    pub error_type: String,
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Path not found in build context: {path}")]
    MissingPath { path: String },

    #[error("Dependency resolution failed: {message}")]
    DependencyResolution { message: String },

    #[error("Host port {port} is unavailable: {reason}")]
    PortBinding { port: u16, reason: String },

    #[error("Entry point not found in image: {path}")]
    EntryPointNotFound { path: String },

    #[error("Invalid build spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("Image build failed: {message}")]
    BuildFailed { message: String },

    #[error("Image layers out of order: {reason}")]
    LayerOrder { reason: String },

    #[error("Image has not been built")]
    NotBuilt,

    #[error("Instance not ready after {timeout_ms}ms")]
    NotReady { timeout_ms: u64 },

    #[error("Docker error: {message}")]
    Docker { message: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootstrapError {
    pub fn to_error_shape(&self) -> ErrorShape {
        ErrorShape {
            error_message: self.to_string(),
            error_type: self.error_type().to_string(),
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            BootstrapError::MissingPath { .. } => "MissingPathError",
            BootstrapError::DependencyResolution { .. } => "DependencyResolutionError",
            BootstrapError::PortBinding { .. } => "PortBindingError",
            BootstrapError::EntryPointNotFound { .. } => "EntryPointNotFoundError",
            BootstrapError::InvalidSpec { .. } => "InvalidSpecError",
            BootstrapError::BuildFailed { .. } => "BuildError",
            BootstrapError::LayerOrder { .. } => "LayerOrderError",
            BootstrapError::NotBuilt => "NotBuiltError",
            BootstrapError::NotReady { .. } => "ReadinessTimeoutError",
            BootstrapError::Docker { .. } => "DockerError",
            BootstrapError::Config { .. } => "ConfigError",
            BootstrapError::Io(_) => "IoError",
        }
    }

    /// Process exit code used by the `bootspec` binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::InvalidSpec { .. } | BootstrapError::Config { .. } => 2,
            BootstrapError::MissingPath { .. } => 3,
            BootstrapError::DependencyResolution { .. } => 4,
            BootstrapError::BuildFailed { .. } | BootstrapError::LayerOrder { .. } => 5,
            BootstrapError::PortBinding { .. } => 6,
            BootstrapError::EntryPointNotFound { .. } => 7,
            BootstrapError::NotBuilt => 8,
            BootstrapError::NotReady { .. } => 9,
            BootstrapError::Docker { .. } | BootstrapError::Io(_) => 1,
        }
    }

    /// Whether the error is fatal to `build` (as opposed to `run`).
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            BootstrapError::MissingPath { .. }
                | BootstrapError::DependencyResolution { .. }
                | BootstrapError::BuildFailed { .. }
                | BootstrapError::LayerOrder { .. }
        )
    }
}
