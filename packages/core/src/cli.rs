use std::path::PathBuf;

use clap::Parser;

/// Menu mailer CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "menu-mailer",
    version,
    about = "Emails the daily school menu image at a fixed local time"
)]
pub struct Cli {
    /// Load environment variables from this file instead of `.env`
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Directory holding the dated menu images
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Address the HTTP server binds to
    #[arg(long)]
    pub bind_host: Option<String>,

    /// Port the HTTP server listens on
    #[arg(long)]
    pub bind_port: Option<u16>,
}
