//! Error types for the MythTV backend protocol.

use thiserror::Error;

/// Protocol-level errors raised while framing or decoding backend traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload does not fit in the 8 character length header.
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    /// Length header is not a decimal number.
    #[error("Invalid length header: {0:?}")]
    InvalidLength(String),

    /// Backend speaks a protocol version missing from the token table.
    #[error("Unknown protocol version {0}")]
    UnknownVersion(u32),

    /// Field list cannot be split into whole records.
    #[error("Expected a multiple of {group} fields, got {actual}")]
    FieldCount { group: usize, actual: usize },

    /// Field list is shorter than the layout requires.
    #[error("Missing field {index} (response has {len} fields)")]
    MissingField { index: usize, len: usize },

    /// A field could not be parsed into its expected type.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidField { name: &'static str, value: String },

    /// Event frame carries no message.
    #[error("Empty backend event")]
    EmptyEvent,

    /// Event frame names a message kind outside the known set.
    #[error("Unrecognized backend message: {0:?}")]
    UnknownBackendMessage(String),
}

impl ProtocolError {
    /// Returns true for faults that only invalidate a single event frame.
    ///
    /// The event listener skips such frames and keeps reading; every other
    /// variant points at a version mismatch or a broken stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::EmptyEvent | ProtocolError::UnknownBackendMessage(_)
        )
    }
}
