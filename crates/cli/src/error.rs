//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// Worker started without the environment the master provides
    #[error("Invalid worker environment: {message}")]
    WorkerEnvironment { message: String },

    /// Cluster execution error
    #[error("Cluster execution failed: {message}")]
    ClusterExecution { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn worker_environment(message: impl Into<String>) -> Self {
        Self::WorkerEnvironment {
            message: message.into(),
        }
    }

    pub fn cluster_execution(message: impl Into<String>) -> Self {
        Self::ClusterExecution {
            message: message.into(),
        }
    }
}
