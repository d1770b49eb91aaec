//! Engine error types.

use tds_codec::CodecError;
use tds_protocol::{ProtocolError, TdsVersion};
use thiserror::Error;

use crate::session::SessionState;

/// Errors returned by session, connection, result and bulk-copy operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Wire bytes could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Packet buffering or framing failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory for a buffer or array could not be reserved.
    #[error("failed to allocate {requested} bytes")]
    Allocation {
        /// Bytes or slots requested.
        requested: usize,
    },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The negotiated protocol version does not support the operation.
    #[error("{0} does not support this operation")]
    UnsupportedVersion(TdsVersion),

    /// Multiplexing is not enabled on the connection.
    #[error("connection is not multiplexed")]
    NotMultiplexed,

    /// No session id could be assigned.
    #[error("no session id available")]
    SessionIdExhausted,

    /// The session has no live connection.
    #[error("session is not connected")]
    SessionDead,

    /// The requested state change is not allowed.
    #[error("invalid session state change from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// The connection was torn down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server (or peer) ended the session.
    #[error("session {0} closed by peer")]
    SessionClosed(u16),

    /// A read timed out and the interrupt handler asked to cancel.
    #[error("timed out after {timeouts} consecutive timeouts")]
    Timeout {
        /// Consecutive timeouts counted.
        timeouts: u32,
    },

    /// Buffer resize below the minimum block size.
    #[error("block size {requested} is below the minimum of {minimum}")]
    BlockSizeTooSmall {
        /// Requested size.
        requested: usize,
        /// Smallest accepted size.
        minimum: usize,
    },

    /// Buffer resize above the largest packet the header can describe.
    #[error("block size {requested} is above the maximum of {maximum}")]
    BlockSizeTooLarge {
        /// Requested size.
        requested: usize,
        /// Largest accepted size.
        maximum: usize,
    },

    /// Buffer resize would discard unflushed output.
    #[error("cannot resize to {requested} bytes with {pending} bytes pending")]
    PendingOutput {
        /// Bytes already written.
        pending: usize,
        /// Requested size.
        requested: usize,
    },

    /// Output is frozen pending a retry.
    #[error("session output is frozen")]
    Frozen,

    /// A registry entry with the same id already exists.
    #[error("identifier already in use: {0}")]
    DuplicateId(String),

    /// Id generation found no unused identifier.
    #[error("could not generate a unique identifier")]
    IdExhausted,

    /// A column has not been given a type yet.
    #[error("column has no type")]
    InvalidColumnType,

    /// Parameters cannot be added while a row is allocated.
    #[error("parameter store already holds a row")]
    ParamsHaveRow,

    /// The result store has no row buffer.
    #[error("no row allocated")]
    NoRow,

    /// Value conversion failed.
    #[error("cannot convert {from} to {to}: {reason}")]
    Conversion {
        /// Source type.
        from: String,
        /// Destination type.
        to: String,
        /// What went wrong.
        reason: &'static str,
    },

    /// Bulk-copy direction is not `in` or `out`.
    #[error("invalid bulk copy direction {0}")]
    InvalidDirection(i32),

    /// Bulk-copy table name is missing.
    #[error("table name must not be null")]
    MissingTableName,

    /// Identifier is not a valid (optionally qualified) object name.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Bulk-copy table name length is invalid.
    #[error("invalid table name length {0}")]
    InvalidNameLength(i32),

    /// Column item, action or property out of range.
    #[error("{what} {value} is out of range")]
    OutOfRange {
        /// Which argument.
        what: &'static str,
        /// Offending value.
        value: i64,
    },

    /// Array bind count differs from earlier bindings.
    #[error("bind count {found} does not match earlier bind count {expected}")]
    BindCountMismatch {
        /// Count established by the first binding.
        expected: usize,
        /// Count supplied now.
        found: usize,
    },

    /// Null supplied for a column that does not allow it.
    #[error("null value in non-nullable column {column}, row {row}")]
    NullNotAllowed {
        /// 1-based column number.
        column: usize,
        /// 1-based row number.
        row: usize,
    },

    /// Bulk transfer could not proceed.
    #[error("bulk copy failed: {0}")]
    Transfer(String),
}

impl Error {
    /// Numbered client diagnostic associated with this error, if any.
    #[must_use]
    pub fn message_number(&self) -> Option<u32> {
        match self {
            Self::InvalidNameLength(_) => Some(4),
            Self::MissingTableName => Some(6),
            Self::InvalidDirection(_) => Some(15),
            Self::BindCountMismatch { .. } => Some(137),
            Self::Transfer(_) => Some(140),
            Self::OutOfRange { .. } => Some(141),
            Self::NullNotAllowed { .. } => Some(142),
            Self::Timeout { .. } => Some(17000),
            Self::ConnectionClosed | Self::SessionClosed(_) => Some(20004),
            Self::Io(_) => Some(20006),
            _ => None,
        }
    }

    /// Whether the error is a caller contract violation.
    ///
    /// These are never transient and retrying the same call fails again.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId(_)
                | Self::InvalidDirection(_)
                | Self::MissingTableName
                | Self::InvalidNameLength(_)
                | Self::InvalidIdentifier(_)
                | Self::OutOfRange { .. }
                | Self::BindCountMismatch { .. }
                | Self::ParamsHaveRow
                | Self::InvalidColumnType
                | Self::NotMultiplexed
                | Self::InvalidTransition { .. }
                | Self::Frozen
                | Self::BlockSizeTooSmall { .. }
                | Self::BlockSizeTooLarge { .. }
                | Self::PendingOutput { .. }
        )
    }

    /// Whether the error came from the transport.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Codec(CodecError::Io(_)))
    }

    pub(crate) fn conversion(from: impl Into<String>, to: impl Into<String>, reason: &'static str) -> Self {
        Self::Conversion {
            from: from.into(),
            to: to.into(),
            reason,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
