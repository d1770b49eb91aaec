//! Per-application context shared by every connection created from it.

use std::fmt;
use std::sync::Arc;

use crate::config::Locale;
use crate::error::Error;
use crate::message::ClientMessage;

/// Receives client diagnostics.
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    fn handle(&self, message: &ClientMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&ClientMessage) + Send + Sync,
{
    fn handle(&self, message: &ClientMessage) {
        self(message)
    }
}

/// What to do after a read timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Keep waiting.
    Continue,
    /// Give up and surface a timeout.
    Cancel,
}

/// Consulted whenever a session read times out.
pub trait InterruptHandler: Send + Sync {
    /// Decide whether session `sid` keeps waiting after `timeouts`
    /// consecutive timeouts.
    fn check(&self, sid: u16, timeouts: u32) -> InterruptAction;
}

impl<F> InterruptHandler for F
where
    F: Fn(u16, u32) -> InterruptAction + Send + Sync,
{
    fn check(&self, sid: u16, timeouts: u32) -> InterruptAction {
        self(sid, timeouts)
    }
}

/// Locale plus callbacks.
#[derive(Default)]
pub struct Context {
    /// Locale used for new logins.
    pub locale: Locale,
    /// Print money with two decimal digits instead of four.
    pub money_use_2_digits: bool,
    message_handler: Option<Arc<dyn MessageHandler>>,
    interrupt_handler: Option<Arc<dyn InterruptHandler>>,
}

impl Context {
    /// Context with the locale taken from the environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locale: Locale::from_env(),
            ..Self::default()
        }
    }

    /// Set the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Install a message handler.
    #[must_use]
    pub fn with_message_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.message_handler = Some(Arc::new(handler));
        self
    }

    /// Install an interrupt handler.
    #[must_use]
    pub fn with_interrupt_handler(mut self, handler: impl InterruptHandler + 'static) -> Self {
        self.interrupt_handler = Some(Arc::new(handler));
        self
    }

    /// Deliver a message to the handler, if any.
    pub fn report(&self, message: &ClientMessage) {
        match &self.message_handler {
            Some(handler) => handler.handle(message),
            None => tracing::debug!(
                number = message.number,
                routine = message.routine,
                text = %message.text,
                "client message without handler"
            ),
        }
    }

    /// Report `error` if it is numbered, then hand it back.
    pub fn report_error(&self, routine: &'static str, error: Error) -> Error {
        if let Some(message) = ClientMessage::from_error(routine, &error) {
            self.report(&message);
        }
        error
    }

    /// Ask the interrupt handler what to do after a timeout.
    ///
    /// Without a handler every timeout cancels.
    #[must_use]
    pub fn check_interrupt(&self, sid: u16, timeouts: u32) -> InterruptAction {
        self.interrupt_handler
            .as_ref()
            .map_or(InterruptAction::Cancel, |h| h.check(sid, timeouts))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("locale", &self.locale)
            .field("money_use_2_digits", &self.money_use_2_digits)
            .field("message_handler", &self.message_handler.is_some())
            .field("interrupt_handler", &self.interrupt_handler.is_some())
            .finish()
    }
}
