//! Best-effort push notification after a successful send.
//!
//! Failures here are logged by the caller and never change the outcome of
//! the send that triggered them.

pub mod ntfy;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::mail::{display_date, MenuLinks};

pub use ntfy::NtfyNotifier;

/// Payload describing a delivered menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    /// Click-through link, usually the calendar view.
    pub click: Option<String>,
    /// URL of the image for clients that render attachments.
    pub attach: Option<String>,
    pub filename: String,
    pub message: String,
}

impl Notification {
    pub fn menu_sent(date: NaiveDate, links: &MenuLinks) -> Self {
        let display = display_date(date);
        Self {
            title: format!("School menu - {}", display),
            click: links.calendar_link(date),
            attach: links.image_url(date),
            filename: format!("menu-{}.png", date),
            message: format!("School menu for {} has been emailed.", display),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification request failed: {message}")]
    Request { message: String },

    #[error("Notification endpoint returned HTTP {status}")]
    Status { status: u16 },
}

#[async_trait]
pub trait Notifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}
