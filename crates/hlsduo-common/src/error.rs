//! Error taxonomy shared by the stream manager and the HTTP layer.
//!
//! Every failure the core can report maps onto one variant here, and each
//! variant knows which HTTP status the transport layer should answer with
//! ([`Error::http_status`]).

use std::path::PathBuf;

use crate::StreamName;

/// Common error type for hlsduo.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A source file does not exist.
    #[error("video file not found: {}", path.display())]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A read, mkdir, or cleanup operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A buffer range exceeds the mapped size.
    #[error("range {offset}+{length} is out of bounds for {size} bytes")]
    OutOfBounds {
        offset: u64,
        length: u64,
        size: u64,
    },

    /// Start was requested on a pipeline that is not idle.
    #[error("stream {0} is already active")]
    AlreadyActive(StreamName),

    /// The pipeline name is neither `play` nor `push`.
    #[error("unknown stream type: {0}")]
    UnknownStream(String),

    /// The external transcoder could not be started.
    #[error("failed to start {tool}: {message}")]
    ProcessLaunch {
        /// Name of the program that failed to launch.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The source buffer has already been released.
    #[error("source buffer already closed")]
    AlreadyClosed,

    /// Request data failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Io { .. } => 500,
            Error::OutOfBounds { .. } => 416,
            Error::AlreadyActive(_) => 409,
            Error::UnknownStream(_) => 400,
            Error::ProcessLaunch { .. } => 502,
            Error::AlreadyClosed => 500,
            Error::InvalidInput(_) => 400,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Io { .. } => "io_error",
            Error::OutOfBounds { .. } => "out_of_bounds",
            Error::AlreadyActive(_) => "already_active",
            Error::UnknownStream(_) => "unknown_stream",
            Error::ProcessLaunch { .. } => "process_launch_failure",
            Error::AlreadyClosed => "already_closed",
            Error::InvalidInput(_) => "invalid_input",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Convenience constructor for [`Error::Io`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::ProcessLaunch`].
    pub fn process_launch(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ProcessLaunch {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::io("I/O error", source)
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
