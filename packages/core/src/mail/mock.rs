//! In-memory mail sender for tests and dry runs.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{MailError, MailSender, MenuEmail};

/// Records every message it is asked to send; can be switched into a
/// failing mode to exercise retry paths.
#[derive(Debug, Default)]
pub struct MockMailer {
    sent: Mutex<Vec<MenuEmail>>,
    attempts: Mutex<usize>,
    failure: Mutex<Option<String>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        let mailer = Self::default();
        mailer.set_failure(Some(message.into()));
        mailer
    }

    pub fn set_failure(&self, failure: Option<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    pub fn sent(&self) -> Vec<MenuEmail> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of `send` calls, successful or not.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MailSender for MockMailer {
    async fn send(&self, email: &MenuEmail) -> Result<(), MailError> {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(message) = failure {
            return Err(MailError::transport(message));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.clone());
        Ok(())
    }

    fn sender_name(&self) -> &str {
        "mock"
    }
}
