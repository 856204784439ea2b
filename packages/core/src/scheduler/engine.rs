//! The daily send state machine.
//!
//! All mutations of [`SchedulerState`] happen while holding the one
//! `state` mutex, so a periodic tick and an on-demand send can never both
//! deliver for the same day. After each mutation the record is published on
//! a watch channel; [`MenuScheduler::status`] reads that copy and never
//! waits for a delivery in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, LocalResult, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use tokio::sync::{watch, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::config::{MailSettings, ScheduleConfig};
use crate::drivers::scan_once;
use crate::index::ImageIndex;
use crate::mail::{compose, MailError, MailSender, MenuLinks};
use crate::metrics::AppMetrics;
use crate::notify::{Notification, Notifier};

use super::state::{
    LastResult, SchedulerState, SchedulerStatus, SendNowResult, SendNowStatus, TickOutcome,
};

/// Minimum gap between two automatic delivery attempts.
pub const SEND_RETRY_INTERVAL_SECONDS: i64 = 120;
/// Minimum gap between two "still waiting for the image" log lines.
pub const MISSING_LOG_INTERVAL_SECONDS: i64 = 300;
/// Upper bound on one delivery, whatever the sender does internally.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

pub type SharedMailer = Arc<dyn MailSender + Send + Sync>;
pub type SharedNotifier = Arc<dyn Notifier + Send + Sync>;

pub struct MenuScheduler {
    schedule: ScheduleConfig,
    mail: MailSettings,
    timezone: Tz,
    links: MenuLinks,
    index: Arc<ImageIndex>,
    mailer: SharedMailer,
    notifier: Option<SharedNotifier>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<AppMetrics>>,
    state: Mutex<SchedulerState>,
    published: watch::Sender<SchedulerState>,
}

impl MenuScheduler {
    pub fn new(
        schedule: ScheduleConfig,
        mail: MailSettings,
        index: Arc<ImageIndex>,
        mailer: SharedMailer,
    ) -> Self {
        let timezone = resolve_timezone(&schedule.timezone);
        let links = MenuLinks::new(schedule.menu_web_base_url.clone());
        let (published, _) = watch::channel(SchedulerState::default());

        Self {
            schedule,
            mail,
            timezone,
            links,
            index,
            mailer,
            notifier: None,
            clock: Arc::new(SystemClock),
            metrics: None,
            state: Mutex::new(SchedulerState::default()),
            published,
        }
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Snapshot of the scheduler state plus the configured time zone.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus::from_state(&self.published.borrow(), self.timezone.name())
    }

    /// Run one scheduling decision for the current instant.
    pub async fn tick(&self) -> TickOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.ticks_total.inc();
        }

        let mut state = self.state.lock().await;
        let outcome = self.tick_locked(&mut state).await;
        self.publish(&state);

        tracing::trace!("tick: {:?}", outcome);
        outcome
    }

    async fn tick_locked(&self, state: &mut SchedulerState) -> TickOutcome {
        let now = self.now();
        let today = now.date_naive();

        if self.schedule.skip_weekends && is_weekend(today) {
            if state.last_handled_date != Some(today) {
                tracing::info!("Skipping weekend send for {}", today);
                state.last_result = LastResult::SkippedWeekend;
                state.last_handled_date = Some(today);
            }
            return TickOutcome::SkippedWeekend;
        }

        let send_start = self.send_start(today);
        // `None` when the window overflows the representable range: never missed.
        let send_deadline = chrono::Duration::try_minutes(self.schedule.retry_window_minutes)
            .and_then(|window| send_start.checked_add_signed(window));

        if now < send_start {
            return TickOutcome::NotYetTime;
        }

        if state.last_sent_date == Some(today) {
            return TickOutcome::AlreadySent;
        }

        if let Some(deadline) = send_deadline.filter(|deadline| now > *deadline) {
            if state.last_handled_date != Some(today) {
                tracing::warn!(
                    "Send window missed for {} (deadline {})",
                    today,
                    deadline.to_rfc3339()
                );
                state.last_result = LastResult::Missed;
                state.last_handled_date = Some(today);
            }
            return TickOutcome::Missed;
        }

        if let Some(last_attempt) = state.last_attempt_at {
            if now - last_attempt < chrono::Duration::seconds(SEND_RETRY_INTERVAL_SECONDS) {
                return TickOutcome::Debounced;
            }
        }

        let Some(image_path) = self.todays_image(today) else {
            self.log_missing_image(state, now, today);
            state.last_result = LastResult::WaitingImage;
            return TickOutcome::WaitingImage;
        };

        if !self.mail_config_ready(state) {
            state.last_result = LastResult::ConfigError;
            return TickOutcome::ConfigError;
        }

        match self.deliver(state, now, today, &image_path).await {
            Ok(()) => TickOutcome::Sent,
            Err(err) => TickOutcome::Failed(err.to_string()),
        }
    }

    /// Refresh the index and send today's menu immediately, ignoring the
    /// weekend rule, the send window and the retry debounce.
    pub async fn send_now(&self) -> SendNowResult {
        scan_once(&self.index, self.metrics.as_ref()).await;

        let mut state = self.state.lock().await;
        let result = self.send_now_locked(&mut state).await;
        self.publish(&state);
        result
    }

    async fn send_now_locked(&self, state: &mut SchedulerState) -> SendNowResult {
        let now = self.now();
        let today = now.date_naive();

        let Some(image_path) = self.todays_image(today) else {
            let detail = format!("Menu image not found for {}", today);
            tracing::info!("Manual send skipped: {}", detail);
            state.last_result = LastResult::MissingImage;
            state.last_error = detail.clone();
            return SendNowResult::failed(SendNowStatus::MissingImage, today, detail);
        };

        if !self.mail_config_ready(state) {
            state.last_result = LastResult::ConfigError;
            return SendNowResult::failed(SendNowStatus::ConfigError, today, state.last_error.clone());
        }

        match self.deliver(state, now, today, &image_path).await {
            Ok(()) => SendNowResult::sent(today, now),
            Err(err) => SendNowResult::failed(SendNowStatus::Error, today, err.to_string()),
        }
    }

    /// Mark the attempt, send, and record the result.
    async fn deliver(
        &self,
        state: &mut SchedulerState,
        now: DateTime<FixedOffset>,
        today: NaiveDate,
        image_path: &Path,
    ) -> Result<(), MailError> {
        state.last_attempt_at = Some(now);
        self.publish(state);
        if let Some(metrics) = &self.metrics {
            metrics.send_attempts_total.inc();
        }

        if let Err(err) = self.send_email(today, image_path).await {
            tracing::error!(
                "Failed to send menu email for {} via {}: {}",
                today,
                self.mailer.sender_name(),
                err
            );
            state.last_error = err.to_string();
            state.last_result = LastResult::Error;
            if let Some(metrics) = &self.metrics {
                metrics.send_failures_total.inc();
            }
            return Err(err);
        }

        state.last_sent_date = Some(today);
        state.last_sent_at = Some(now);
        state.last_result = LastResult::Sent;
        state.last_error.clear();
        state.last_handled_date = Some(today);
        tracing::info!("Menu email sent for {}", today);
        if let Some(metrics) = &self.metrics {
            metrics.sends_total.inc();
        }

        self.notify_sent(today);
        Ok(())
    }

    async fn send_email(&self, today: NaiveDate, image_path: &Path) -> Result<(), MailError> {
        let image = tokio::fs::read(image_path)
            .await
            .map_err(|err| MailError::Image {
                path: image_path.display().to_string(),
                message: err.to_string(),
            })?;
        let filename = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.png", today));

        let email = compose(
            today,
            &self.mail.mail_from,
            self.mail.recipients(),
            &self.links,
            image,
            &filename,
        );

        match tokio::time::timeout(DELIVERY_TIMEOUT, self.mailer.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(MailError::Timeout {
                seconds: DELIVERY_TIMEOUT.as_secs(),
            }),
        }
    }

    /// Fire-and-forget; the send is already recorded as successful.
    fn notify_sent(&self, today: NaiveDate) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let notification = Notification::menu_sent(today, &self.links);
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&notification).await {
                tracing::error!("Failed to send ntfy notification: {}", err);
                if let Some(metrics) = metrics {
                    metrics.notification_failures_total.inc();
                }
            }
        });
    }

    fn todays_image(&self, today: NaiveDate) -> Option<PathBuf> {
        let path = self.index.lookup(today)?;
        if path.is_file() {
            Some(path)
        } else {
            tracing::debug!("Indexed image {} no longer exists", path.display());
            None
        }
    }

    fn log_missing_image(
        &self,
        state: &mut SchedulerState,
        now: DateTime<FixedOffset>,
        today: NaiveDate,
    ) {
        if let Some(last_logged) = state.last_missing_image_log_at {
            if now - last_logged < chrono::Duration::seconds(MISSING_LOG_INTERVAL_SECONDS) {
                return;
            }
        }
        tracing::info!("Menu image not found for {}, will retry", today);
        state.last_missing_image_log_at = Some(now);
    }

    /// Records the problem in `last_error`; logs only on the transition
    /// into `config_error`.
    fn mail_config_ready(&self, state: &mut SchedulerState) -> bool {
        let missing = self.mail.missing_fields();
        if !missing.is_empty() {
            state.last_error = format!("Missing settings: {}", missing.join(", "));
            if state.last_result != LastResult::ConfigError {
                tracing::error!("{}", state.last_error);
            }
            return false;
        }

        if self.mail.has_username_without_password() {
            tracing::warn!("SMTP_USERNAME is set but SMTP_PASSWORD is empty");
        }
        true
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.timezone).fixed_offset()
    }

    /// Today's send time in the configured zone. A time that falls in a DST
    /// gap moves forward by an hour.
    fn send_start(&self, today: NaiveDate) -> DateTime<FixedOffset> {
        let time = NaiveTime::from_hms_opt(self.schedule.send_hour, self.schedule.send_minute, 0)
            .unwrap_or(NaiveTime::MIN);
        let local = today.and_time(time);

        match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(at) => at.fixed_offset(),
            LocalResult::Ambiguous(earliest, _) => earliest.fixed_offset(),
            LocalResult::None => self
                .timezone
                .from_local_datetime(&(local + chrono::Duration::hours(1)))
                .earliest()
                .unwrap_or_else(|| self.timezone.from_utc_datetime(&local))
                .fixed_offset(),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SchedulerState {
        self.published.borrow().clone()
    }

    fn publish(&self, state: &SchedulerState) {
        self.published.send_replace(state.clone());
    }
}

/// Parse an IANA zone name, falling back to UTC.
pub fn resolve_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!("Invalid timezone '{}', falling back to UTC", name);
            Tz::UTC
        }
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
