use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use menu_mailer::api::{self, AppState};
use menu_mailer::cli::Cli;
use menu_mailer::config::Config;
use menu_mailer::drivers::{scan_once, Drivers};
use menu_mailer::error::AppError;
use menu_mailer::index::ImageIndex;
use menu_mailer::logging::init_logging;
use menu_mailer::mail::SmtpMailer;
use menu_mailer::metrics::AppMetrics;
use menu_mailer::notify::ntfy::NtfyNotifier;
use menu_mailer::scheduler::MenuScheduler;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!("{}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|err| AppError::Config(format!("{}: {}", path.display(), err)))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let config = Config::from_env().map_err(AppError::Config)?.apply_cli(&cli);
    init_logging(&config.log_level);
    tracing::info!("Service starting with config: {:?}", config);

    let metrics = Arc::new(AppMetrics::new()?);
    let index = Arc::new(ImageIndex::new(config.image_dir.clone()));
    scan_once(&index, Some(&metrics)).await;

    let mailer = Arc::new(SmtpMailer::new(config.mail.clone()));
    let mut scheduler = MenuScheduler::new(
        config.schedule.clone(),
        config.mail.clone(),
        index.clone(),
        mailer,
    )
    .with_metrics(metrics.clone());
    match NtfyNotifier::from_settings(&config.notify)? {
        Some(notifier) => {
            tracing::info!("Push notifications enabled ({})", notifier.url());
            scheduler = scheduler.with_notifier(Arc::new(notifier));
        }
        None => tracing::info!("Push notifications disabled"),
    }
    let scheduler = Arc::new(scheduler);
    tracing::info!(
        "Daily send at {:02}:{:02} {}",
        config.schedule.send_hour,
        config.schedule.send_minute,
        scheduler.timezone()
    );

    let cancel = CancellationToken::new();
    let drivers = Drivers::spawn(
        index.clone(),
        scheduler.clone(),
        Some(metrics.clone()),
        Duration::from_secs(config.scan_interval_seconds),
        Duration::from_secs(config.tick_interval_seconds),
        cancel.clone(),
    );

    let app = api::router(AppState {
        scheduler,
        index,
        metrics,
    });

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| AppError::Server(format!("failed to bind {}: {}", addr, err)))?;
    tracing::info!("Listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    drivers.shutdown().await;
    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
