use std::env;
use std::path::PathBuf;

use crate::cli::Cli;

/// Longest accepted send window: one day.
pub const MAX_RETRY_WINDOW_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub image_dir: PathBuf,
    pub scan_interval_seconds: u64,
    pub tick_interval_seconds: u64,
    pub schedule: ScheduleConfig,
    pub mail: MailSettings,
    pub notify: NotifySettings,
    pub bind_host: String,
    pub bind_port: u16,
    pub log_level: String,
}

/// When and how the daily send happens.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub send_hour: u32,
    pub send_minute: u32,
    pub timezone: String,
    pub skip_weekends: bool,
    pub retry_window_minutes: i64,
    /// Base URL of the calendar web view, used for links in mails and
    /// notifications. Empty disables the links.
    pub menu_web_base_url: String,
}

#[derive(Clone, Default)]
pub struct MailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
    pub mail_from: String,
    pub mail_to: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub ntfy_base_url: String,
    pub ntfy_topic: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            send_hour: 7,
            send_minute: 0,
            timezone: "Europe/London".to_string(),
            skip_weekends: true,
            retry_window_minutes: 60,
            menu_web_base_url: String::new(),
        }
    }
}

impl MailSettings {
    /// Parsed recipient list; blank entries are dropped.
    pub fn recipients(&self) -> Vec<String> {
        self.mail_to
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Names of the settings a send cannot go without.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.smtp_host.trim().is_empty() {
            missing.push("SMTP_HOST");
        }
        if self.mail_from.trim().is_empty() {
            missing.push("MAIL_FROM");
        }
        if self.recipients().is_empty() {
            missing.push("MAIL_TO");
        }
        missing
    }

    pub fn has_username_without_password(&self) -> bool {
        !self.smtp_username.is_empty() && self.smtp_password.is_empty()
    }
}

// Keeps the password out of `Config` debug output.
impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &if self.smtp_password.is_empty() { "" } else { "***" })
            .field("smtp_use_tls", &self.smtp_use_tls)
            .field("mail_from", &self.mail_from)
            .field("mail_to", &self.mail_to)
            .finish()
    }
}

impl NotifySettings {
    pub fn is_enabled(&self) -> bool {
        !self.ntfy_base_url.trim().is_empty() && !self.ntfy_topic.trim().is_empty()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys take their
    /// defaults; malformed values are rejected with the variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let send_hour: u32 = parse_number(&lookup, "SEND_HOUR", 7)?;
        if send_hour > 23 {
            return Err(format!("SEND_HOUR must be between 0 and 23, got {}", send_hour));
        }
        let send_minute: u32 = parse_number(&lookup, "SEND_MINUTE", 0)?;
        if send_minute > 59 {
            return Err(format!("SEND_MINUTE must be between 0 and 59, got {}", send_minute));
        }
        let retry_window_minutes: i64 = parse_number(&lookup, "RETRY_WINDOW_MINUTES", 60)?;
        if !(0..=MAX_RETRY_WINDOW_MINUTES).contains(&retry_window_minutes) {
            return Err(format!(
                "RETRY_WINDOW_MINUTES must be between 0 and {}, got {}",
                MAX_RETRY_WINDOW_MINUTES, retry_window_minutes
            ));
        }
        let tick_interval_seconds: u64 = parse_number(&lookup, "TICK_INTERVAL_SECONDS", 30)?;
        if tick_interval_seconds == 0 {
            return Err("TICK_INTERVAL_SECONDS must be greater than zero".to_string());
        }

        Ok(Self {
            image_dir: PathBuf::from(text("MENU_IMAGE_DIR", "/mnt/menu-images")),
            scan_interval_seconds: parse_number(&lookup, "SCAN_INTERVAL_SECONDS", 300)?,
            tick_interval_seconds,
            schedule: ScheduleConfig {
                send_hour,
                send_minute,
                timezone: text("TIMEZONE", "Europe/London"),
                skip_weekends: parse_bool(&lookup, "SKIP_WEEKENDS", true)?,
                retry_window_minutes,
                menu_web_base_url: text("MENU_WEB_BASE_URL", ""),
            },
            mail: MailSettings {
                smtp_host: text("SMTP_HOST", ""),
                smtp_port: parse_number(&lookup, "SMTP_PORT", 587)?,
                smtp_username: text("SMTP_USERNAME", ""),
                smtp_password: text("SMTP_PASSWORD", ""),
                smtp_use_tls: parse_bool(&lookup, "SMTP_USE_TLS", true)?,
                mail_from: text("MAIL_FROM", ""),
                mail_to: text("MAIL_TO", ""),
            },
            notify: NotifySettings {
                ntfy_base_url: text("NTFY_BASE_URL", ""),
                ntfy_topic: text("NTFY_TOPIC", ""),
            },
            bind_host: text("BIND_HOST", "0.0.0.0"),
            bind_port: parse_number(&lookup, "BIND_PORT", 8082)?,
            log_level: text("LOG_LEVEL", "info"),
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(dir) = &cli.image_dir {
            self.image_dir = dir.clone();
        }
        if let Some(host) = &cli.bind_host {
            self.bind_host = host.clone();
        }
        if let Some(port) = cli.bind_port {
            self.bind_port = port;
        }
        self
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number, got '{}'", key, raw)),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, String>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("{} must be a boolean, got '{}'", key, raw)),
    }
}
