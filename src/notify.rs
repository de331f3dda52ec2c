//! Delivery seam for one-time codes.

use std::fmt;

use tracing::info;

use crate::account::Destination;

/// A code could not be handed to the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub message: String,
}

impl SendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code delivery failed: {}", self.message)
    }
}

impl std::error::Error for SendError {}

/// Delivers one-time codes to a destination. Implementations wrap an SMS
/// gateway, a mailer, or whatever channel the deployment uses.
pub trait CodeSender: Send + Sync {
    /// Deliver `code` to `destination`.
    fn send_code(&self, destination: &Destination, code: &str) -> Result<(), SendError>;
}

/// Sender that only logs the code. Good enough for development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCodeSender;

impl CodeSender for LogCodeSender {
    fn send_code(&self, destination: &Destination, code: &str) -> Result<(), SendError> {
        info!(destination = %destination, code, "one-time code issued");
        Ok(())
    }
}
