//! # Error Handling Module
//!
//! This module defines every error the reconciliation pipeline can produce, using the
//! `thiserror` crate. Errors fall into two groups:
//!
//! - **Fatal** errors abort the sync invocation and are returned to the caller, who
//!   retries the whole invocation on the next periodic trigger.
//! - **Degradations** (custom-entity fetch/parse failures, a single plugin failing to
//!   receive its defaults) are logged where they happen and never reach the caller.
//!
//! Fatal errors raised deep inside a strategy are wrapped with the name of the pipeline
//! stage that failed (see [`ReconcileError::stage`]), so a log line is enough to know
//! where a sync broke.
//!
//! ## Rust Concepts Used
//! - `Result<T, E>` with the `?` operator instead of exceptions
//! - `From` conversions so library errors turn into `ReconcileError` automatically
//! - `Box<Self>` to let an error variant wrap another error of the same type

use thiserror::Error;

/// Result type used throughout the reconciler
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Every error the reconciliation pipeline can report
#[derive(Debug, Error, Clone)]
pub enum ReconcileError {
    /// Invalid or missing configuration (bad secret reference, invalid URL, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The plugin schema service could not provide a schema
    #[error("Schema lookup failed for plugin '{plugin}': {message}")]
    SchemaLookup { plugin: String, message: String },

    /// Schema defaults could not be merged into a plugin configuration
    #[error("Filling defaults failed for plugin '{plugin}': {message}")]
    Fill { plugin: String, message: String },

    /// JSON or YAML (de)serialization failed
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// I/O errors (reading config files, desired-state snapshots)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// HTTP transport errors talking to the gateway admin API
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Secret retrieval errors
    #[error("Secret store error: {message}")]
    SecretStore { message: String },

    /// The live gateway state could not be retrieved or parsed
    #[error("Dump error: {message}")]
    Dump { message: String },

    /// A typed state could not be built (duplicate natural keys, etc.)
    #[error("State error: {message}")]
    State { message: String },

    /// The differencer could not build a plan
    #[error("Diff error: {message}")]
    Diff { message: String },

    /// The gateway bulk endpoint answered with a non-success status
    #[error("Gateway rejected configuration with status {status}: {body}")]
    Submit { status: u16, body: String },

    /// The solver reported one or more per-entity failures
    #[error("{} error(s) occurred while applying changes: {}", .errors.len(), .errors.join("; "))]
    Solve { errors: Vec<String> },

    /// Any error, annotated with the pipeline stage that produced it
    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a schema lookup error for a plugin
    pub fn schema_lookup<P: Into<String>, S: Into<String>>(plugin: P, message: S) -> Self {
        Self::SchemaLookup {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a default-fill error for a plugin
    pub fn fill<P: Into<String>, S: Into<String>>(plugin: P, message: S) -> Self {
        Self::Fill {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a secret store error with a custom message
    pub fn secret_store<S: Into<String>>(message: S) -> Self {
        Self::SecretStore {
            message: message.into(),
        }
    }

    /// Create a dump error with a custom message
    pub fn dump<S: Into<String>>(message: S) -> Self {
        Self::Dump {
            message: message.into(),
        }
    }

    /// Create a state error with a custom message
    pub fn state<S: Into<String>>(message: S) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a diff error with a custom message
    pub fn diff<S: Into<String>>(message: S) -> Self {
        Self::Diff {
            message: message.into(),
        }
    }

    /// Build the composite solver error from every reported failure
    pub fn solve(errors: Vec<ReconcileError>) -> Self {
        Self::Solve {
            errors: errors.iter().map(ToString::to_string).collect(),
        }
    }

    /// Wrap an error with the name of the pipeline stage that produced it
    pub fn stage<S: Into<String>>(stage: S, source: ReconcileError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, with every stage annotation peeled off
    pub fn root_cause(&self) -> &ReconcileError {
        match self {
            Self::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if retrying the same invocation later may succeed
    ///
    /// Transport, gateway and solver failures are transient from the reconciler's point
    /// of view. Configuration and schema problems will fail again until someone
    /// fixes the input.
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Self::HttpClient { .. } => true,
            Self::Io { .. } => true,
            Self::Dump { .. } => true,
            Self::Solve { .. } => true,
            Self::SecretStore { .. } => true,
            Self::Submit { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get a string representation of the error type for logs and metrics labels
    pub fn error_type(&self) -> &'static str {
        match self.root_cause() {
            Self::Configuration { .. } => "configuration_error",
            Self::SchemaLookup { .. } => "schema_lookup_error",
            Self::Fill { .. } => "fill_error",
            Self::Serialization { .. } => "serialization_error",
            Self::Io { .. } => "io_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::SecretStore { .. } => "secret_store_error",
            Self::Dump { .. } => "dump_error",
            Self::State { .. } => "state_error",
            Self::Diff { .. } => "diff_error",
            Self::Submit { .. } => "submit_error",
            Self::Solve { .. } => "solve_error",
            Self::Stage { .. } => "stage_error",
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for ReconcileError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for ReconcileError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from reqwest::Error
impl From<reqwest::Error> for ReconcileError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from kube::Error
impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        Self::SecretStore {
            message: err.to_string(),
        }
    }
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid concurrency: {}", value)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::ReconcileError::config(format!($($arg)*))
    };
}
