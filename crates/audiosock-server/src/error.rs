//! Error types for session and server operations
//!
//! Transport failures are deliberately not surfaced through `read`/`write`
//! as IO errors: the receive loop owns the socket and reports failure by
//! flipping the session's connected flag and firing the error event. The
//! errors here cover invalid-state use and setup problems.

use thiserror::Error;

use audiosock_audio::AudioError;

/// Errors returned by session-level operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has been closed, or closed while the call was blocked.
    /// Distinct from waiting on an empty queue, which simply suspends.
    #[error("Session is not connected")]
    NotConnected,

    /// A resampling stage could not be constructed.
    #[error("Audio conversion error: {0}")]
    Audio(#[from] AudioError),
}

/// Errors returned by the listener server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind AudioSocket listener to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Timed out waiting for stream {stream_id} to register")]
    AcceptTimeout { stream_id: String },

    #[error("Server is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
pub type ServerResult<T> = std::result::Result<T, ServerError>;
