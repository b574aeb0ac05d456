//! Error types for the MythTV client.

use std::time::Duration;

use mythtv_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by connections, recorders and the session manager.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket read, write or connect failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend traffic could not be framed or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// TCP connect did not complete in time.
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Backend closed the socket.
    #[error("Connection closed by backend")]
    ConnectionClosed,

    /// Command issued on a connection that is not open.
    #[error("Connection is not open")]
    NotOpen,

    /// Backend refused the version probe.
    #[error("Backend rejected protocol version {version}: {reply}")]
    VersionRejected { version: u32, reply: String },

    /// Backend refused the announce command.
    #[error("Backend rejected announce: {0}")]
    AnnounceRejected(String),

    /// Handle does not name a playing session.
    #[error("Session {0} is not playing")]
    SessionNotPlaying(u32),

    /// No storage group map covers the recording's group.
    #[error("No storage group map for group {0:?}")]
    NoStorageGroupMap(String),

    /// Recording path is not under the mapped backend directory.
    #[error("{path} is outside storage group directory {dir}")]
    PathOutsideStorageGroup { path: String, dir: String },

    /// Caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Recording never started growing before the deadline.
    #[error("Recording did not start within {0:?}")]
    PollTimeout(Duration),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true for errors caused by configuration rather than the backend.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ClientError::Config(_)
                | ClientError::NoStorageGroupMap(_)
                | ClientError::PathOutsideStorageGroup { .. }
                | ClientError::Protocol(ProtocolError::UnknownVersion(_))
        )
    }
}
