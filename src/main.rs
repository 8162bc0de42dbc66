//! Sortwise - media library organizer engine
//!
//! Entry point: parses arguments, sets up logging and runs one sort or undo
//! invocation, writing protocol records to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use sortwise::cli::Command;
use sortwise::report::{ResultRecord, Status};
use sortwise::{Cli, Processor, Reporter, shutdown, undo_session};
use std::path::Path;
use std::process::ExitCode;
use tracing::{Level, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status for payloads and arguments we refuse to run
const EXIT_PROTOCOL: u8 = 2;

fn main() -> ExitCode {
    // clap exits with status 2 on usage errors
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = shutdown::install_handler() {
        warn!(error = %e, "Could not install the signal handler; cancellation is unavailable");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let protocol = e
                .downcast_ref::<sortwise::Error>()
                .is_some_and(sortwise::Error::is_protocol);
            if protocol {
                ExitCode::from(EXIT_PROTOCOL)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut reporter = Reporter::stdout();

    let result = match &cli.command {
        Command::Sort(args) => {
            // A bad payload must fail before any record is written
            let config = args.load_config().context("Invalid sort payload")?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                folders = config.folders.len(),
                operation = ?config.file_operation,
                "Sortwise starting"
            );
            Processor::new(config).run(&mut reporter)
        }
        Command::Undo { journal } => undo(journal),
    };

    reporter
        .result(&result)
        .context("Failed to write the result record")
}

fn undo(journal: &Path) -> ResultRecord {
    info!(version = env!("CARGO_PKG_VERSION"), ?journal, "Sortwise undo starting");

    match undo_session(journal) {
        Ok(report) => ResultRecord {
            status: if report.is_complete() {
                Status::Success
            } else {
                Status::Partial
            },
            message: report.summary(),
            journal: Some(journal.to_path_buf()),
            summary: None,
            undo: Some(report),
        },
        Err(e) => {
            warn!(error = %e, "Undo failed");
            ResultRecord::error(e.to_string())
        }
    }
}

/// Setup logging to stderr, plus a non-blocking file writer when requested
fn setup_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_writer, guard) = match &cli.log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create log directory {}", parent.display()))?;
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("Cannot open log file {}", log_path.display()))?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (Some(non_blocking), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if cli.json_log {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .init();
    }

    Ok(guard)
}
