//! Error types for walletdesk.

use crate::permissions::PermissionKind;

/// Top-level error type for the wallet host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Auth info error: {0}")]
    AuthInfo(#[from] AuthInfoError),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn missing(key: &str, hint: &str) -> Self {
        Self::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        }
    }
}

/// Failures fetching the remote auth-method metadata.
#[derive(Debug, thiserror::Error)]
pub enum AuthInfoError {
    #[error("Auth endpoint URL is invalid: {0}")]
    InvalidUrl(String),

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed auth info response: {0}")]
    Decode(String),
}

/// Bootstrap state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Configuration is not complete")]
    NotConfigured,

    #[error("Missing bootstrap dependencies: {}", .0.join(", "))]
    MissingDependencies(Vec<&'static str>),

    #[error("Auth info has not been fetched yet")]
    AuthInfoUnavailable,

    #[error("Auth method '{0}' is not supported by the auth endpoint")]
    UnsupportedAuthMethod(String),

    #[error("Configuration can't change while a wallet engine is installed")]
    ConfigLocked,

    #[error("Wallet construction failed at {stage}: {source}")]
    Construction {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Session ended while wallet construction was in flight")]
    Superseded,

    #[error("Wallet engine is not available")]
    EngineUnavailable,
}

/// Permission arbitration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("{kind} request {request_id} was denied by the user")]
    Denied {
        kind: PermissionKind,
        request_id: String,
    },

    #[error("Session ended before {kind} request {request_id} was decided")]
    SessionEnded {
        kind: PermissionKind,
        request_id: String,
    },

    #[error("{kind} request {request_id} is not the head of its queue")]
    NotHead {
        kind: PermissionKind,
        request_id: String,
    },

    #[error("Decision channel for request {0} closed unexpectedly")]
    ChannelClosed(String),
}

/// Snapshot persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Persisted snapshot is not valid base64: {0}")]
    Decode(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Engine rejected snapshot: {0}")]
    Rejected(#[from] EngineError),
}

/// Local key-value store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Local store file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

/// User settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("The user must be logged in to update settings")]
    NotLoggedIn,

    #[error("Settings manager failed: {0}")]
    Manager(#[from] EngineError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors reported by the external wallet engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Storage provider unreachable: {0}")]
    StorageUnavailable(String),

    #[error("Engine construction failed: {0}")]
    Construction(String),

    #[error("Snapshot incompatible: {0}")]
    Snapshot(String),

    #[error("Engine call failed: {0}")]
    Call(String),
}

/// Result type alias for the wallet host.
pub type Result<T> = std::result::Result<T, Error>;
