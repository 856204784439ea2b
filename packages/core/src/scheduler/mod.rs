//! Daily menu send scheduler.
//!
//! `MenuScheduler::tick` is driven on a fixed cadence and decides, for the
//! current local day, whether to wait, send, retry or give up.
//! `MenuScheduler::send_now` is the operator's manual trigger.

pub mod engine;
pub mod state;

#[cfg(test)]
mod tests;

pub use engine::{
    resolve_timezone, MenuScheduler, SharedMailer, SharedNotifier, DELIVERY_TIMEOUT,
    MISSING_LOG_INTERVAL_SECONDS, SEND_RETRY_INTERVAL_SECONDS,
};
pub use state::{
    LastResult, SchedulerState, SchedulerStatus, SendNowResult, SendNowStatus, TickOutcome,
};
