//! Prometheus metrics registry for the menu mailer.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the drivers and the scheduler.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, Gauge, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Completed index scans (including ones that found no directory).
    pub scans_total: Counter,
    /// Scans whose directory enumeration failed.
    pub scan_errors_total: Counter,
    /// Number of dated images in the current index snapshot.
    pub images_indexed: Gauge,
    /// Scheduler ticks executed.
    pub ticks_total: Counter,
    /// Delivery attempts, automatic and manual.
    pub send_attempts_total: Counter,
    /// Successful deliveries.
    pub sends_total: Counter,
    /// Failed deliveries.
    pub send_failures_total: Counter,
    /// Notifications that could not be delivered.
    pub notification_failures_total: Counter,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated (should not happen in practice).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<Counter, prometheus::Error> {
            let metric = Counter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };

        let scans_total = counter("menu_mailer_scans_total", "Completed image directory scans")?;
        let scan_errors_total =
            counter("menu_mailer_scan_errors_total", "Image directory scans that failed")?;
        let ticks_total = counter("menu_mailer_ticks_total", "Scheduler ticks executed")?;
        let send_attempts_total =
            counter("menu_mailer_send_attempts_total", "Menu email delivery attempts")?;
        let sends_total = counter("menu_mailer_sends_total", "Menu emails delivered")?;
        let send_failures_total =
            counter("menu_mailer_send_failures_total", "Menu email deliveries that failed")?;
        let notification_failures_total = counter(
            "menu_mailer_notification_failures_total",
            "Push notifications that failed",
        )?;

        let images_indexed = Gauge::with_opts(Opts::new(
            "menu_mailer_images_indexed",
            "Dated menu images in the current index",
        ))?;
        registry.register(Box::new(images_indexed.clone()))?;

        Ok(Self {
            scans_total,
            scan_errors_total,
            images_indexed,
            ticks_total,
            send_attempts_total,
            sends_total,
            send_failures_total,
            notification_failures_total,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
