use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Notification, Notifier, NotifyError};
use crate::config::NotifySettings;

pub const NTFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes notifications to an ntfy topic.
#[derive(Clone)]
pub struct NtfyNotifier {
    url: String,
    http: Client,
}

impl NtfyNotifier {
    pub fn new(base_url: &str, topic: &str) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(NTFY_TIMEOUT)
            .build()
            .map_err(|err| NotifyError::Request { message: err.to_string() })?;

        Ok(Self {
            url: format!(
                "{}/{}",
                base_url.trim().trim_end_matches('/'),
                topic.trim().trim_start_matches('/')
            ),
            http,
        })
    }

    /// `None` unless both the base URL and the topic are configured.
    pub fn from_settings(settings: &NotifySettings) -> Result<Option<Self>, NotifyError> {
        if !settings.is_enabled() {
            return Ok(None);
        }
        Self::new(&settings.ntfy_base_url, &settings.ntfy_topic).map(Some)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header("Title", notification.title.as_str())
            .header("Filename", notification.filename.as_str());
        if let Some(click) = &notification.click {
            request = request.header("Click", click.as_str());
        }
        if let Some(attach) = &notification.attach {
            request = request.header("Attach", attach.as_str());
        }

        let response = request
            .body(notification.message.clone())
            .send()
            .await
            .map_err(|err| NotifyError::Request { message: err.to_string() })?;

        if !response.status().is_success() {
            return Err(NotifyError::Status {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}
