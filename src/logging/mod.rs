/*!
 * Logging Module
 * Console and rolling-file tracing output
 */
pub mod config;
pub mod middleware;

use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use config::LogConfig;

/// Installs the global subscriber.
///
/// The returned guards flush the background writers; hold them until exit.
pub fn init(config: &LogConfig) -> Vec<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(&config.directory) {
        eprintln!(
            "Failed to create log directory {}: {}",
            config.directory.display(),
            e
        );
    }

    let (file_writer, file_guard) = non_blocking(rolling::daily(&config.directory, "app.log"));
    let (error_writer, error_guard) =
        non_blocking(rolling::daily(&config.directory, "error.log"));
    let (console_writer, console_guard) = non_blocking(io::stdout());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.is_production() {
        let error_layer = fmt::layer()
            .json()
            .with_writer(error_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .json()
            .with_writer(console_writer)
            .with_target(false);

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .init();
    } else {
        let error_layer = fmt::layer()
            .json()
            .with_writer(error_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_target(true)
            .pretty();

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .init();
    }

    tracing::info!(
        "Logging initialized for {} environment ({})",
        config.environment,
        config.directory.display()
    );

    vec![file_guard, error_guard, console_guard]
}
