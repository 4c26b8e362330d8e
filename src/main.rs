use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use vctui::cli::{run_cli, Args};
use vctui::config::ConfigFile;
use vctui::log_rotate::LogRotator;

/// The console owns the terminal, so its logs go to a rotated file.
async fn init_file_logging(config: &ConfigFile, filter: EnvFilter) -> vctui::Result<()> {
    let rotator = LogRotator::new(
        LogRotator::default_path()?,
        config.log_max_bytes,
        config.log_keep,
    );
    if let Some(dir) = rotator.path().parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let rotated = rotator.rotate_if_needed().await?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(rotator.path())?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();

    if rotated {
        tracing::debug!("Rotated {}", rotator.path().display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match ConfigFile::load_or_default(args.config.as_deref()).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.is_interactive() {
        if let Err(e) = init_file_logging(&config, filter).await {
            eprintln!("Error: cannot open log file: {}", e);
            std::process::exit(1);
        }
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run_cli(args, config).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
