// Library root. Exposes the modules to integration tests in `tests/`;
// the production entry point is `src/main.rs`.

pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod drivers;
pub mod error;
pub mod index;
pub mod logging;
pub mod mail;
pub mod metrics;
pub mod notify;
pub mod scheduler;
