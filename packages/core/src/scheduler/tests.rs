//! State machine tests for `MenuScheduler`.
//!
//! Time is driven by `ManualClock`; all dates are in January so
//! `Europe/London` local time equals UTC.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::clock::ManualClock;
use crate::config::{MailSettings, ScheduleConfig};
use crate::index::ImageIndex;
use crate::mail::{MailError, MailSender, MenuEmail, MockMailer};
use crate::metrics::AppMetrics;
use crate::notify::{Notification, Notifier, NotifyError};

// ---- Helpers ----------------------------------------------------------------

const MONDAY: (i32, u32, u32) = (2024, 1, 8);
const SATURDAY: (i32, u32, u32) = (2024, 1, 6);

fn day(ymd: (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(ymd.0, ymd.1, ymd.2).unwrap()
}

fn at(ymd: (i32, u32, u32), hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ymd.0, ymd.1, ymd.2, hour, minute, 0).unwrap()
}

fn complete_mail() -> MailSettings {
    MailSettings {
        smtp_host: "smtp.example.com".into(),
        smtp_port: 587,
        smtp_use_tls: true,
        mail_from: "menu@example.com".into(),
        mail_to: "parent@example.com".into(),
        ..MailSettings::default()
    }
}

fn schedule() -> ScheduleConfig {
    ScheduleConfig {
        send_hour: 7,
        send_minute: 0,
        timezone: "Europe/London".into(),
        skip_weekends: true,
        retry_window_minutes: 60,
        menu_web_base_url: "https://menu.example.com".into(),
    }
}

struct Harness {
    scheduler: MenuScheduler,
    clock: Arc<ManualClock>,
    index: Arc<ImageIndex>,
    dir: TempDir,
}

impl Harness {
    fn add_image(&self, name: &str) {
        fs::write(self.dir.path().join(name), b"\x89PNG").unwrap();
        self.index.scan();
    }

    async fn tick_at(&self, ymd: (i32, u32, u32), hour: u32, minute: u32) -> TickOutcome {
        self.clock.set(at(ymd, hour, minute));
        self.scheduler.tick().await
    }
}

fn build(
    schedule: ScheduleConfig,
    mail: MailSettings,
    mailer: SharedMailer,
    images: &[&str],
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    for name in images {
        fs::write(dir.path().join(name), b"\x89PNG").unwrap();
    }
    let index = Arc::new(ImageIndex::new(dir.path()));
    index.scan();

    let clock = Arc::new(ManualClock::new(at(MONDAY, 0, 0)));
    let scheduler = MenuScheduler::new(schedule, mail, index.clone(), mailer)
        .with_clock(clock.clone());

    Harness {
        scheduler,
        clock,
        index,
        dir,
    }
}

fn harness_with(mailer: Arc<MockMailer>, images: &[&str]) -> Harness {
    build(schedule(), complete_mail(), mailer, images)
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<Notification>>,
    fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(NotifyError::Status { status: 500 });
        }
        Ok(())
    }
}

/// Never completes a send.
struct HangingMailer;

#[async_trait]
impl MailSender for HangingMailer {
    async fn send(&self, _email: &MenuEmail) -> Result<(), MailError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn sender_name(&self) -> &str {
        "hanging"
    }
}

/// Tracks how many sends overlap in time.
#[derive(Default)]
struct OverlapProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sends: AtomicUsize,
}

#[async_trait]
impl MailSender for OverlapProbe {
    async fn send(&self, _email: &MenuEmail) -> Result<(), MailError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sender_name(&self) -> &str {
        "probe"
    }
}

async fn let_spawned_tasks_run() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ---- Send window ------------------------------------------------------------

#[tokio::test]
async fn tick_before_send_time_does_nothing() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);

    assert_eq!(h.tick_at(MONDAY, 6, 59).await, TickOutcome::NotYetTime);

    assert_eq!(mailer.attempts(), 0);
    assert_eq!(h.scheduler.status().last_result, LastResult::Idle);
}

#[tokio::test]
async fn tick_at_send_time_with_image_sends() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::Sent);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "School menu - Mon 8 Jan");
    assert_eq!(sent[0].to, vec!["parent@example.com".to_string()]);
    assert_eq!(sent[0].image_filename, "2024-01-08.png");
    assert_eq!(sent[0].image, b"\x89PNG".to_vec());

    let status = h.scheduler.status();
    assert_eq!(status.last_result, LastResult::Sent);
    assert_eq!(status.last_sent_date, Some(day(MONDAY)));
    assert_eq!(status.last_sent_at.map(|t| t.with_timezone(&Utc)), Some(at(MONDAY, 7, 0)));
    assert!(status.last_error.is_empty());
}

#[tokio::test]
async fn ticks_after_a_send_are_no_ops_for_the_rest_of_the_day() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);

    h.tick_at(MONDAY, 7, 0).await;
    assert_eq!(h.tick_at(MONDAY, 7, 30).await, TickOutcome::AlreadySent);
    assert_eq!(h.tick_at(MONDAY, 7, 30).await, TickOutcome::AlreadySent);
    assert_eq!(h.tick_at(MONDAY, 23, 0).await, TickOutcome::AlreadySent);

    assert_eq!(mailer.attempts(), 1);
    assert_eq!(h.scheduler.status().last_result, LastResult::Sent);
}

#[tokio::test]
async fn deadline_is_inclusive() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);

    assert_eq!(h.tick_at(MONDAY, 8, 0).await, TickOutcome::Sent);
}

#[tokio::test]
async fn oversized_window_never_panics_and_never_misses() {
    let mailer = Arc::new(MockMailer::new());
    let h = build(
        ScheduleConfig {
            retry_window_minutes: 200_000_000_000,
            ..schedule()
        },
        complete_mail(),
        mailer.clone(),
        &["2024-01-08.png"],
    );

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::Sent);
    assert_eq!(mailer.sent_count(), 1);
}

#[tokio::test]
async fn window_closes_and_stays_missed_even_if_image_appears() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &[]);

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::WaitingImage);
    assert_eq!(h.scheduler.status().last_result, LastResult::WaitingImage);

    assert_eq!(h.tick_at(MONDAY, 8, 1).await, TickOutcome::Missed);
    assert_eq!(h.scheduler.status().last_result, LastResult::Missed);

    h.add_image("2024-01-08.png");
    assert_eq!(h.tick_at(MONDAY, 8, 30).await, TickOutcome::Missed);
    assert_eq!(h.tick_at(MONDAY, 12, 0).await, TickOutcome::Missed);

    assert_eq!(mailer.attempts(), 0);
    assert_eq!(h.scheduler.state().last_handled_date, Some(day(MONDAY)));
}

#[tokio::test]
async fn next_day_starts_fresh_after_a_miss() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-09.png"]);

    assert_eq!(h.tick_at(MONDAY, 9, 0).await, TickOutcome::Missed);
    assert_eq!(h.tick_at((2024, 1, 9), 7, 0).await, TickOutcome::Sent);
    assert_eq!(h.scheduler.status().last_sent_date, Some(day((2024, 1, 9))));
}

// ---- Retry & debounce -------------------------------------------------------

#[tokio::test]
async fn failed_send_is_retried_only_after_debounce_interval() {
    let mailer = Arc::new(MockMailer::failing("connection refused"));
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);

    let first = h.tick_at(MONDAY, 7, 0).await;
    assert!(matches!(first, TickOutcome::Failed(ref msg) if msg.contains("connection refused")));
    let status = h.scheduler.status();
    assert_eq!(status.last_result, LastResult::Error);
    assert!(status.last_error.contains("connection refused"));
    assert_eq!(status.last_attempt_at.map(|t| t.with_timezone(&Utc)), Some(at(MONDAY, 7, 0)));

    assert_eq!(h.tick_at(MONDAY, 7, 1).await, TickOutcome::Debounced);
    assert_eq!(mailer.attempts(), 1);

    mailer.set_failure(None);
    assert_eq!(h.tick_at(MONDAY, 7, 2).await, TickOutcome::Sent);
    assert_eq!(mailer.attempts(), 2);
    assert!(h.scheduler.status().last_error.is_empty());
}

#[tokio::test]
async fn indexed_image_deleted_from_disk_counts_as_missing() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);
    fs::remove_file(h.dir.path().join("2024-01-08.png")).unwrap();

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::WaitingImage);
    assert_eq!(mailer.attempts(), 0);
}

#[tokio::test]
async fn waiting_log_is_throttled() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer, &[]);

    h.tick_at(MONDAY, 7, 0).await;
    let first_log = h.scheduler.state().last_missing_image_log_at;
    assert_eq!(first_log.map(|t| t.with_timezone(&Utc)), Some(at(MONDAY, 7, 0)));

    h.tick_at(MONDAY, 7, 4).await;
    assert_eq!(h.scheduler.state().last_missing_image_log_at, first_log);

    h.tick_at(MONDAY, 7, 5).await;
    assert_eq!(
        h.scheduler.state().last_missing_image_log_at.map(|t| t.with_timezone(&Utc)),
        Some(at(MONDAY, 7, 5))
    );
}

#[tokio::test(start_paused = true)]
async fn hung_mail_sender_surfaces_as_delivery_failure() {
    let h = build(
        schedule(),
        complete_mail(),
        Arc::new(HangingMailer),
        &["2024-01-08.png"],
    );

    let outcome = h.tick_at(MONDAY, 7, 0).await;

    assert!(matches!(outcome, TickOutcome::Failed(ref msg) if msg.contains("timed out")));
    assert_eq!(h.scheduler.status().last_result, LastResult::Error);
}

#[tokio::test]
async fn status_does_not_wait_for_an_in_flight_send() {
    let h = build(
        schedule(),
        complete_mail(),
        Arc::new(HangingMailer),
        &["2024-01-08.png"],
    );
    h.clock.set(at(MONDAY, 7, 0));
    let scheduler = Arc::new(h.scheduler);

    let ticking = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.tick().await })
    };

    let mut attempt_seen = None;
    for _ in 0..200 {
        attempt_seen = scheduler.status().last_attempt_at;
        if attempt_seen.is_some() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    // The tick still holds the state lock while the mailer hangs.
    assert!(!ticking.is_finished());
    assert_eq!(attempt_seen.map(|t| t.with_timezone(&Utc)), Some(at(MONDAY, 7, 0)));
    let status = scheduler.status();
    assert_eq!(status.last_result, LastResult::Idle);
    assert!(status.last_sent_date.is_none());

    ticking.abort();
}

// ---- Weekends ---------------------------------------------------------------

#[tokio::test]
async fn weekend_ticks_never_call_the_mailer() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-06.png", "2024-01-07.png"]);

    for (hour, minute) in [(6, 0), (7, 0), (7, 30), (12, 0)] {
        assert_eq!(h.tick_at(SATURDAY, hour, minute).await, TickOutcome::SkippedWeekend);
    }
    assert_eq!(h.tick_at((2024, 1, 7), 7, 0).await, TickOutcome::SkippedWeekend);

    assert_eq!(mailer.attempts(), 0);
    assert_eq!(h.scheduler.status().last_result, LastResult::SkippedWeekend);
}

#[tokio::test]
async fn weekend_send_happens_when_skipping_is_disabled() {
    let mailer = Arc::new(MockMailer::new());
    let h = build(
        ScheduleConfig {
            skip_weekends: false,
            ..schedule()
        },
        complete_mail(),
        mailer.clone(),
        &["2024-01-06.png"],
    );

    assert_eq!(h.tick_at(SATURDAY, 7, 0).await, TickOutcome::Sent);
    assert_eq!(mailer.sent_count(), 1);
}

// ---- Configuration ----------------------------------------------------------

#[tokio::test]
async fn incomplete_mail_config_does_not_consume_the_debounce() {
    let mailer = Arc::new(MockMailer::new());
    let h = build(schedule(), MailSettings::default(), mailer.clone(), &["2024-01-08.png"]);

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::ConfigError);
    let status = h.scheduler.status();
    assert_eq!(status.last_result, LastResult::ConfigError);
    assert_eq!(status.last_error, "Missing settings: SMTP_HOST, MAIL_FROM, MAIL_TO");
    assert!(status.last_attempt_at.is_none());

    // Re-evaluated on the very next tick rather than after the debounce.
    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::ConfigError);
    assert_eq!(mailer.attempts(), 0);
}

#[tokio::test]
async fn username_without_password_only_warns() {
    let mailer = Arc::new(MockMailer::new());
    let h = build(
        schedule(),
        MailSettings {
            smtp_username: "bot".into(),
            ..complete_mail()
        },
        mailer.clone(),
        &["2024-01-08.png"],
    );

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::Sent);
}

#[test]
fn unknown_timezone_falls_back_to_utc() {
    let mailer = Arc::new(MockMailer::new());
    let h = build(
        ScheduleConfig {
            timezone: "Mars/Olympus_Mons".into(),
            ..schedule()
        },
        complete_mail(),
        mailer,
        &[],
    );

    assert_eq!(h.scheduler.status().timezone, "UTC");
}

#[tokio::test]
async fn send_time_follows_configured_timezone() {
    let mailer = Arc::new(MockMailer::new());
    let h = build(
        ScheduleConfig {
            timezone: "America/New_York".into(),
            ..schedule()
        },
        complete_mail(),
        mailer.clone(),
        &["2024-01-08.png"],
    );

    // 07:00 in New York during winter is 12:00 UTC.
    assert_eq!(h.tick_at(MONDAY, 11, 59).await, TickOutcome::NotYetTime);
    assert_eq!(h.tick_at(MONDAY, 12, 0).await, TickOutcome::Sent);
    assert_eq!(h.scheduler.status().timezone, "America/New_York");
}

fn london_every_day() -> ScheduleConfig {
    ScheduleConfig {
        send_hour: 1,
        send_minute: 30,
        skip_weekends: false,
        ..schedule()
    }
}

#[tokio::test]
async fn send_time_in_spring_forward_gap_moves_an_hour_later() {
    let mailer = Arc::new(MockMailer::new());
    // 01:30 does not exist in London on 2024-03-31; 02:30 BST is 01:30 UTC.
    let h = build(london_every_day(), complete_mail(), mailer.clone(), &["2024-03-31.png"]);

    assert_eq!(h.tick_at((2024, 3, 31), 1, 29).await, TickOutcome::NotYetTime);
    assert_eq!(h.tick_at((2024, 3, 31), 1, 30).await, TickOutcome::Sent);
    assert_eq!(
        h.scheduler.status().last_sent_at.map(|t| t.with_timezone(&Utc)),
        Some(at((2024, 3, 31), 1, 30))
    );
}

#[tokio::test]
async fn ambiguous_send_time_in_autumn_uses_the_earlier_instant() {
    let mailer = Arc::new(MockMailer::new());
    // 01:30 happens twice in London on 2024-10-27; the BST one is 00:30 UTC.
    let h = build(london_every_day(), complete_mail(), mailer.clone(), &["2024-10-27.png"]);

    assert_eq!(h.tick_at((2024, 10, 27), 0, 29).await, TickOutcome::NotYetTime);
    assert_eq!(h.tick_at((2024, 10, 27), 0, 30).await, TickOutcome::Sent);
    assert_eq!(mailer.sent_count(), 1);
}

// ---- Manual sends -----------------------------------------------------------

#[tokio::test]
async fn send_now_without_image_reports_missing_and_keeps_last_sent_date() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &[]);
    h.clock.set(at(MONDAY, 9, 30));

    let result = h.scheduler.send_now().await;

    assert_eq!(result.status, SendNowStatus::MissingImage);
    assert_eq!(result.date, day(MONDAY));
    assert_eq!(result.detail.as_deref(), Some("Menu image not found for 2024-01-08"));
    let status = h.scheduler.status();
    assert_eq!(status.last_sent_date, None);
    assert_eq!(status.last_result, LastResult::MissingImage);
    assert_eq!(mailer.attempts(), 0);
}

#[tokio::test]
async fn send_now_rescans_and_suppresses_the_automatic_send() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &[]);
    // Written after the last scan; only the refresh inside send_now sees it.
    fs::write(h.dir.path().join("2024-01-08_lunch.png"), b"\x89PNG").unwrap();
    h.clock.set(at(MONDAY, 6, 15));

    let result = h.scheduler.send_now().await;

    assert_eq!(result.status, SendNowStatus::Sent);
    assert_eq!(result.date, day(MONDAY));
    assert_eq!(result.sent_at.map(|t| t.with_timezone(&Utc)), Some(at(MONDAY, 6, 15)));
    assert_eq!(h.scheduler.status().last_sent_date, Some(day(MONDAY)));

    assert_eq!(h.tick_at(MONDAY, 7, 0).await, TickOutcome::AlreadySent);
    assert_eq!(mailer.sent_count(), 1);
}

#[tokio::test]
async fn send_now_rescan_updates_index_metrics() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &[]);
    let metrics = Arc::new(AppMetrics::new().unwrap());
    let scheduler = h.scheduler.with_metrics(metrics.clone());
    fs::write(h.dir.path().join("2024-01-08.png"), b"\x89PNG").unwrap();
    h.clock.set(at(MONDAY, 9, 0));

    let result = scheduler.send_now().await;

    assert_eq!(result.status, SendNowStatus::Sent);
    assert!((metrics.scans_total.get() - 1.0).abs() < f64::EPSILON);
    assert!((metrics.images_indexed.get() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn send_now_ignores_weekend_and_window() {
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer.clone(), &["2024-01-06.png"]);
    h.clock.set(at(SATURDAY, 22, 0));

    let result = h.scheduler.send_now().await;

    assert_eq!(result.status, SendNowStatus::Sent);
    assert_eq!(mailer.sent_count(), 1);
}

#[tokio::test]
async fn send_now_reports_config_and_delivery_errors() {
    let h = build(
        schedule(),
        MailSettings::default(),
        Arc::new(MockMailer::new()),
        &["2024-01-08.png"],
    );
    h.clock.set(at(MONDAY, 7, 0));
    let result = h.scheduler.send_now().await;
    assert_eq!(result.status, SendNowStatus::ConfigError);
    assert!(result.detail.unwrap().contains("SMTP_HOST"));

    let mailer = Arc::new(MockMailer::failing("mailbox unavailable"));
    let h = harness_with(mailer.clone(), &["2024-01-08.png"]);
    h.clock.set(at(MONDAY, 7, 0));
    let result = h.scheduler.send_now().await;
    assert_eq!(result.status, SendNowStatus::Error);
    assert!(result.detail.unwrap().contains("mailbox unavailable"));
    assert_eq!(h.scheduler.status().last_result, LastResult::Error);
}

#[tokio::test]
async fn tick_and_send_now_never_deliver_concurrently() {
    let probe = Arc::new(OverlapProbe::default());
    let h = build(schedule(), complete_mail(), probe.clone(), &["2024-01-08.png"]);
    h.clock.set(at(MONDAY, 7, 0));

    let _ = tokio::join!(h.scheduler.tick(), h.scheduler.send_now());

    assert!(probe.sends.load(Ordering::SeqCst) >= 1);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
}

// ---- Notifications ----------------------------------------------------------

#[tokio::test]
async fn successful_send_fires_notification() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer, &["2024-01-08.png"]);
    let scheduler = h.scheduler.with_notifier(notifier.clone());
    h.clock.set(at(MONDAY, 7, 0));

    assert_eq!(scheduler.tick().await, TickOutcome::Sent);
    let_spawned_tasks_run().await;

    let calls = notifier.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].title, "School menu - Mon 8 Jan");
    assert_eq!(calls[0].filename, "menu-2024-01-08.png");
}

#[tokio::test]
async fn notification_failure_does_not_revert_the_send() {
    let notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    });
    let mailer = Arc::new(MockMailer::new());
    let h = harness_with(mailer, &["2024-01-08.png"]);
    let scheduler = h.scheduler.with_notifier(notifier.clone());
    h.clock.set(at(MONDAY, 7, 0));

    assert_eq!(scheduler.tick().await, TickOutcome::Sent);
    let_spawned_tasks_run().await;

    assert_eq!(notifier.calls.lock().unwrap().len(), 1);
    assert_eq!(scheduler.status().last_result, LastResult::Sent);
}

#[tokio::test]
async fn failed_send_fires_no_notification() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mailer = Arc::new(MockMailer::failing("boom"));
    let h = harness_with(mailer, &["2024-01-08.png"]);
    let scheduler = h.scheduler.with_notifier(notifier.clone());
    h.clock.set(at(MONDAY, 7, 0));

    scheduler.tick().await;
    let_spawned_tasks_run().await;

    assert!(notifier.calls.lock().unwrap().is_empty());
}
