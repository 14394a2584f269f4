//! Error types for the Dossier core library.
//!
//! Uses `thiserror` for public API error types, with one enum per domain
//! (job lifecycle, remote service, export, persistence, configuration)
//! wrapped by the top-level [`DossierError`].

use std::path::PathBuf;

use crate::types::ResearchStatus;

/// Top-level error type for the Dossier core library.
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an error, used by callers that only need to
/// decide how to react (surface, record, recover).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation was invoked while the record was in the wrong status.
    InvalidState,
    /// The remote service reported failure or was unreachable.
    RemoteFailure,
    /// Export was requested without a completed result.
    PreconditionFailed,
    /// Durable storage could not be read.
    PersistenceCorrupt,
    /// The job was cancelled before it reached a terminal state on its own.
    Cancelled,
    /// The referenced job does not exist.
    NotFound,
    /// Anything else (configuration, IO, serialization).
    Other,
}

impl DossierError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DossierError::Job(JobError::InvalidState { .. })
            | DossierError::Job(JobError::AlreadyExists { .. }) => ErrorKind::InvalidState,
            DossierError::Job(JobError::NotFound { .. }) => ErrorKind::NotFound,
            DossierError::Job(JobError::Cancelled { .. }) => ErrorKind::Cancelled,
            DossierError::Remote(_) => ErrorKind::RemoteFailure,
            DossierError::Export(ExportError::PreconditionFailed { .. }) => {
                ErrorKind::PreconditionFailed
            }
            DossierError::Persistence(PersistenceError::Corrupt { .. }) => {
                ErrorKind::PersistenceCorrupt
            }
            _ => ErrorKind::Other,
        }
    }
}

/// Errors from the research job lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid state for job {id} ({status}): {reason}")]
    InvalidState {
        id: String,
        status: ResearchStatus,
        reason: String,
    },

    #[error("Job not found: {id}")]
    NotFound { id: String },

    #[error("Job already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Job {id} was cancelled")]
    Cancelled { id: String },

    #[error("Job {id} task ended abnormally: {message}")]
    TaskFailed { id: String, message: String },
}

/// Errors from the remote research and prompt refinement services.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Research job failed remotely: {message}")]
    JobFailed { message: String },

    #[error("Research job exceeded the maximum duration of {max_secs}s")]
    TimedOut { max_secs: u64 },
}

/// Errors from the export pipeline and document sinks.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Cannot export job {id}: {reason}")]
    PreconditionFailed { id: String, reason: String },

    #[error("Failed to render {format}: {message}")]
    Render { format: String, message: String },

    #[error("Failed to write {file_name}: {message}")]
    Sink { file_name: String, message: String },

    #[error("Unknown export format: {name}")]
    UnknownFormat { name: String },
}

/// Errors from durable storage.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Stored data at {location} is unreadable: {message}")]
    Corrupt { location: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `DossierError`.
pub type Result<T> = std::result::Result<T, DossierError>;
