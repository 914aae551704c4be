//! Process boundary for one reconciliation run.
//!
//! Reads the JSON parameter bag and the resource descriptor, runs the
//! reconciliation, and reports a single JSON object on stdout:
//! `{changed, resource, commands}` on success, `{failed: true, msg}` on any
//! failure. Stdout stays a clean JSON channel; logs go to a file.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use converge::{reconcile, ResourceDescriptor, RunParams};

/// Declarative reconciliation engine for REST-managed resources
#[derive(Parser, Debug)]
#[command(name = "converge", version, about, long_about = None)]
struct Args {
    /// Resource descriptor file (JSON, produced by the offline generator)
    #[arg(short, long)]
    descriptor: PathBuf,

    /// Parameter bag file (JSON), or '-' to read from stdin
    #[arg(short, long, default_value = "-")]
    params: String,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Log file path
    #[arg(long, default_value = "converge.log")]
    log_file: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    path: &PathBuf,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("converge started with log level: {:?}", level);
    Ok(Some(guard))
}

fn read_params(source: &str) -> Result<RunParams> {
    let raw = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read parameters from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read parameter file {source}"))?
    };
    let value = serde_json::from_str(&raw).context("Parameter bag is not valid JSON")?;
    RunParams::from_value(value).context("Invalid parameter bag")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level, &args.log_file)?;

    let descriptor_file = std::fs::File::open(&args.descriptor)
        .with_context(|| format!("Failed to open descriptor {}", args.descriptor.display()))?;
    let descriptor = ResourceDescriptor::from_reader(descriptor_file)
        .context("Invalid resource descriptor")?;
    let params = read_params(&args.params)?;

    // Fatal conditions are reported through the JSON failure channel, never
    // as an uncaught error crossing the boundary.
    match reconcile(descriptor, params).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result.to_value())?);
            Ok(())
        }
        Err(err) => {
            tracing::error!("reconciliation failed: {err}");
            println!(
                "{}",
                serde_json::json!({ "failed": true, "msg": err.to_string() })
            );
            std::process::exit(1);
        }
    }
}
