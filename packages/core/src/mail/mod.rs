//! Mail Sender boundary.
//!
//! The scheduler hands a fully composed [`MenuEmail`] to a [`MailSender`]
//! and only cares whether delivery succeeded. Transport details (TLS mode,
//! authentication, timeouts) live in the implementation.

pub mod message;
pub mod mock;
pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;

pub use message::{compose, display_date, MenuEmail, MenuLinks, MENU_IMAGE_CID};
pub use mock::MockMailer;
pub use smtp::SmtpMailer;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid address '{address}': {message}")]
    Address { address: String, message: String },

    #[error("Failed to build message: {message}")]
    Build { message: String },

    #[error("Failed to read menu image {path}: {message}")]
    Image { path: String, message: String },

    #[error("SMTP error: {message}")]
    Transport { message: String },

    #[error("Mail delivery timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl MailError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::Build { message: message.into() }
    }
}

#[async_trait]
pub trait MailSender {
    /// Deliver one message to all of its recipients.
    async fn send(&self, email: &MenuEmail) -> Result<(), MailError>;

    /// Name of this sender for logging/debugging
    fn sender_name(&self) -> &str;
}
