//! Client-side diagnostics.
//!
//! Errors raised by the engine itself (as opposed to messages sent by the
//! server) are numbered. Bulk-copy paths deliver them to the context's
//! message handler in addition to returning them as [`Error`].

use crate::error::Error;

/// Severity used for caller contract violations.
pub const SEVERITY_USER: u8 = 16;

/// Severity used for transport and session failures.
pub const SEVERITY_FATAL: u8 = 20;

/// Which layer raised a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Generated by this library.
    Client,
    /// Relayed from the server.
    Server,
}

/// A numbered diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    /// Where the message came from.
    pub origin: MessageOrigin,
    /// Message number.
    pub number: u32,
    /// Severity level.
    pub severity: u8,
    /// Message state.
    pub state: u8,
    /// Operation that raised the message.
    pub routine: &'static str,
    /// Message text.
    pub text: String,
}

impl ClientMessage {
    /// Create a client message.
    pub fn new(number: u32, severity: u8, routine: &'static str, text: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::Client,
            number,
            severity,
            state: 0,
            routine,
            text: text.into(),
        }
    }

    /// Build the diagnostic for a numbered error.
    ///
    /// Returns `None` when the error carries no message number.
    #[must_use]
    pub fn from_error(routine: &'static str, error: &Error) -> Option<Self> {
        let number = error.message_number()?;
        let severity = if error.is_misuse() {
            SEVERITY_USER
        } else {
            SEVERITY_FATAL
        };
        Some(Self::new(number, severity, routine, error.to_string()))
    }

    /// SQLSTATE for this message, if one is defined.
    #[must_use]
    pub fn sqlstate(&self) -> Option<&'static str> {
        match self.origin {
            MessageOrigin::Client => client_sqlstate(self.number),
            MessageOrigin::Server => None,
        }
    }
}

/// Map a client message number to its SQLSTATE.
#[must_use]
pub fn client_sqlstate(number: u32) -> Option<&'static str> {
    match number {
        17000 => Some("S1T00"),
        20004 | 20006 | 20009 | 20020 => Some("08S01"),
        20019 => Some("24000"),
        20014 => Some("28000"),
        2400 | 2401 | 2403 | 2404 => Some("42000"),
        2402 => Some("S1000"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_sqlstate() {
        assert_eq!(client_sqlstate(17000), Some("S1T00"));
        assert_eq!(client_sqlstate(20009), Some("08S01"));
        assert_eq!(client_sqlstate(20019), Some("24000"));
        assert_eq!(client_sqlstate(2402), Some("S1000"));
        assert_eq!(client_sqlstate(142), None);
    }

    #[test]
    fn test_from_error() {
        let msg = ClientMessage::from_error("blk_init", &Error::InvalidDirection(3)).unwrap();
        assert_eq!(msg.number, 15);
        assert_eq!(msg.severity, SEVERITY_USER);
        assert_eq!(msg.routine, "blk_init");
        assert!(msg.sqlstate().is_none());

        let msg = ClientMessage::from_error("read", &Error::Timeout { timeouts: 1 }).unwrap();
        assert_eq!(msg.sqlstate(), Some("S1T00"));
        assert_eq!(msg.severity, SEVERITY_FATAL);

        assert!(ClientMessage::from_error("x", &Error::NoRow).is_none());
    }
}
