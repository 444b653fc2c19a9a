use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
use commands::cli;
use taskbot_core::api::{load_config, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    let config = load_config(args.config.as_deref())?;
    let guard = init_logging(&config.logging)?;

    let exit = match args.command {
        cli::Commands::TaskRunner(run_args) => {
            commands::task_runner::run(run_args, &config).await?
        }
        cli::Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    // Flush buffered file logs before exiting.
    drop(guard);
    std::process::exit(exit);
}

/// `RUST_LOG` wins over `logging.level`. Logs go to stderr unless
/// `logging.file` is set.
fn init_logging(cfg: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .map_err(|e| anyhow::anyhow!("invalid log level {:?}: {e}", cfg.level))?,
    };

    let (writer, guard) = match &cfg.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("logging.file has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = cfg.file.is_none() && !cfg.json;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cfg.json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;
    Ok(guard)
}
