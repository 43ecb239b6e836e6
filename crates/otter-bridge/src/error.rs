//! Error types for otter-bridge

use std::path::PathBuf;
use thiserror::Error;

use crate::holt::HoltError;
use crate::status::Status;

/// Errors raised while converting between host and engine values.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The engine rejected an operation (allocation, property access).
    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    /// A native value nests deeper than the configured limit, usually a cycle.
    #[error("Value nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Result type alias for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Operation on a VM that has already been disposed
    #[error("VM has been disposed")]
    Disposed,

    /// The process-wide engine was torn down with [`crate::dispose`]
    #[error("Script engine has been torn down")]
    EngineDisposed,

    /// Entry script could not be read
    #[error("Entry script not found: {}", path.display())]
    EntryMissing { path: PathBuf },

    /// The script raised an exception
    #[error("{message}")]
    Script { message: String },

    /// An import could not be resolved by the host resolver
    #[error("Module ({specifier}) has not been loaded (imported from {referrer}, code {code})")]
    Resolution {
        specifier: String,
        referrer: String,
        code: i32,
    },

    /// Engine-level failure outside script execution (runtime or context creation)
    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error(transparent)]
    Holt(#[from] HoltError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An integer outside the dispatch status code space
    #[error("Unknown status code: {0}")]
    UnknownStatus(i32),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Create a script error from an exception description
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The dispatch status this error surfaces as.
    pub fn status(&self) -> Status {
        match self {
            Self::Disposed | Self::EngineDisposed => Status::Disposed,
            Self::EntryMissing { .. } => Status::EntryMissing,
            Self::Script { .. } | Self::Resolution { .. } | Self::Engine(_) | Self::Codec(_) => {
                Status::ScriptException
            }
            Self::Holt(_) | Self::UnknownStatus(_) | Self::Config(_) => Status::Unavailable,
        }
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
