//! Scheduler state record and the values reported from it.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent scheduling decision, as shown on `/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastResult {
    #[default]
    Idle,
    SkippedWeekend,
    WaitingImage,
    MissingImage,
    ConfigError,
    Error,
    Sent,
    Missed,
}

/// Everything the scheduler remembers. Lives only in memory; a restart
/// starts again from `Default`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub last_sent_date: Option<NaiveDate>,
    pub last_sent_at: Option<DateTime<FixedOffset>>,
    pub last_attempt_at: Option<DateTime<FixedOffset>>,
    pub last_result: LastResult,
    pub last_error: String,
    /// Day whose terminal transition (weekend, missed, sent) was already
    /// recorded; repeats on the same day are silent.
    pub last_handled_date: Option<NaiveDate>,
    pub last_missing_image_log_at: Option<DateTime<FixedOffset>>,
}

/// Read-only view of [`SchedulerState`] for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub last_sent_date: Option<NaiveDate>,
    pub last_sent_at: Option<DateTime<FixedOffset>>,
    pub last_attempt_at: Option<DateTime<FixedOffset>>,
    pub last_result: LastResult,
    pub last_error: String,
    pub timezone: String,
}

impl SchedulerStatus {
    pub fn from_state(state: &SchedulerState, timezone: &str) -> Self {
        Self {
            last_sent_date: state.last_sent_date,
            last_sent_at: state.last_sent_at,
            last_attempt_at: state.last_attempt_at,
            last_result: state.last_result,
            last_error: state.last_error.clone(),
            timezone: timezone.to_string(),
        }
    }
}

/// What a single `tick()` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    SkippedWeekend,
    NotYetTime,
    AlreadySent,
    Missed,
    Debounced,
    WaitingImage,
    ConfigError,
    Failed(String),
    Sent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendNowStatus {
    Sent,
    MissingImage,
    ConfigError,
    Error,
}

/// Response of an on-demand send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNowResult {
    pub status: SendNowStatus,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<FixedOffset>>,
}

impl SendNowResult {
    pub fn sent(date: NaiveDate, sent_at: DateTime<FixedOffset>) -> Self {
        Self {
            status: SendNowStatus::Sent,
            date,
            detail: None,
            sent_at: Some(sent_at),
        }
    }

    pub fn failed(status: SendNowStatus, date: NaiveDate, detail: impl Into<String>) -> Self {
        Self {
            status,
            date,
            detail: Some(detail.into()),
            sent_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_result_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(LastResult::SkippedWeekend).unwrap(),
            json!("skipped_weekend")
        );
        assert_eq!(
            serde_json::to_value(LastResult::WaitingImage).unwrap(),
            json!("waiting_image")
        );
    }

    #[test]
    fn fresh_status_is_idle_with_nulls() {
        let status = SchedulerStatus::from_state(&SchedulerState::default(), "Europe/London");
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["last_result"], json!("idle"));
        assert!(value["last_sent_date"].is_null());
        assert!(value["last_attempt_at"].is_null());
        assert_eq!(value["last_error"], json!(""));
        assert_eq!(value["timezone"], json!("Europe/London"));
    }

    #[test]
    fn send_now_result_omits_absent_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let missing = SendNowResult::failed(
            SendNowStatus::MissingImage,
            date,
            "Menu image not found for 2024-01-08",
        );
        let value = serde_json::to_value(&missing).unwrap();

        assert_eq!(value["status"], json!("missing_image"));
        assert_eq!(value["date"], json!("2024-01-08"));
        assert!(value.get("sent_at").is_none());
    }
}
