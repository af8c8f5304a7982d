use clap::Parser;
use ruuvi_influx::app::{self, RealScanner};
use ruuvi_influx::{Backend, Config, LogLevel};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit codes for the application
const EXIT_ERROR: u8 = 1;
const EXIT_PANIC: i32 = 2;

/// Listen to RuuviTags and store their measurements in InfluxDB.
#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Path to the TOML configuration file
    config: PathBuf,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    backend: Backend,
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(options: Options, config: Config) -> Result<(), app::RunError> {
    let config = Arc::new(config);
    let client = app::connect(&config).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    app::run(config, options.backend, &RealScanner, &client, shutdown).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Process managers (e.g. systemd) watch the exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    let config = match Config::from_file(&options.config) {
        Ok(config) => config,
        Err(why) => {
            init_logging(LogLevel::default());
            error!(path = %options.config.display(), "{why}");
            return ExitCode::from(EXIT_ERROR);
        }
    };
    init_logging(config.log_level);

    match run(options, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(why) => {
            error!("{why}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
