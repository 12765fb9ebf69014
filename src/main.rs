//! wearhook - capture flow correlator and payload decryptor
//!
//! `watch` reads capture messages (one JSON document per line) from a file
//! or stdin and writes completed flows for the configured routes to stdout.
//! `decrypt` decrypts an offline exchange record.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wearhook::app::{Config, FlowSink, GeneralConfig};
use wearhook::capture::{spawn_correlator, CaptureSender, FlowCorrelator};
use wearhook::crypto::{ExchangeRecord, SessionCipher};
use wearhook::WearhookError;

/// Correlate and decrypt captured companion-app HTTP flows
#[derive(Parser, Debug)]
#[command(name = "wearhook")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "WEARHOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Log every completed flow, not just observed ones
    #[arg(short, long, global = true, env = "WEARHOOK_VERBOSE")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WEARHOOK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log file path (enables file logging)
    #[arg(long, global = true, env = "WEARHOOK_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable JSON structured logging
    #[arg(long, global = true, env = "WEARHOOK_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Correlate capture messages and print matched flows (default)
    Watch {
        /// Read capture messages from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Decrypt an exchange record (ssecurity, nonce, req_data, res_data)
    Decrypt {
        /// JSON record file
        record: PathBuf,

        /// Leading keystream bytes to discard (overrides config)
        #[arg(long)]
        keystream_drop: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    let config = load_config(&cli)?;
    init_logging(&config.general)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting wearhook");

    match cli.command {
        Some(Command::Decrypt {
            record,
            keystream_drop,
        }) => run_decrypt(&config, &record, keystream_drop),
        Some(Command::Watch { input }) => run_watch(&config, input).await,
        None => run_watch(&config, None).await,
    }
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        let e = WearhookError::from(e);
        let hint = e.user_message();
        anyhow::Error::new(e).context(hint)
    })?;

    if cli.verbose {
        config.general.verbose = true;
    }
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(path) = &cli.log_file {
        config.general.log_file = Some(path.clone());
    }
    if cli.log_json {
        config.general.log_json = true;
    }

    config
        .validate()
        .map_err(|e| anyhow::Error::new(WearhookError::from(e)))?;

    Ok(config)
}

/// Initialize the logging system. Console logs go to stderr; stdout
/// carries flow output.
fn init_logging(general: &GeneralConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&general.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &general.log_file {
        let dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| Config::data_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;

        let filename = log_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("wearhook.log");
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, filename);

        if general.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);

            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false);

            subscriber.with(file_layer).init();
        }
    } else if general.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Handle shutdown signals
async fn handle_signals(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("Failed to register signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to register Ctrl+C handler: {}", e);
            return;
        }
        tracing::info!("Received Ctrl+C, initiating shutdown");
    }

    let _ = shutdown_tx.send(());
}

/// Correlate capture messages until the input ends or a signal arrives
async fn run_watch(config: &Config, input: Option<PathBuf>) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::spawn(handle_signals(shutdown_tx.clone()));

    let sink = FlowSink::new(std::io::stdout());
    let mut correlator = FlowCorrelator::new(config.correlator_config());
    for observer in &config.observers {
        correlator.register(&observer.route, observer.method_match(), sink.observer());
    }
    tracing::info!(
        "Watching {} routes: {}",
        correlator.observers().len(),
        correlator.observers().routes().join(", ")
    );

    let (sender, worker) = spawn_correlator(
        correlator,
        config.correlator.channel_capacity,
        shutdown_tx.subscribe(),
    );
    spawn_reader(input, sender)?;

    let correlator = worker.await.context("Correlator task failed")?;
    let stats = correlator.stats();
    tracing::info!(
        opened = stats.opened,
        dispatched = stats.dispatched,
        unobserved = stats.unobserved,
        orphaned = stats.orphaned,
        malformed = stats.malformed,
        evicted = stats.evicted,
        "Capture finished"
    );

    Ok(())
}

/// Read capture lines on a plain thread so a blocked stdin read never
/// holds up shutdown.
fn spawn_reader(input: Option<PathBuf>, sender: CaptureSender) -> Result<()> {
    let reader: Box<dyn BufRead + Send> = match &input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open capture input {:?}", path))?;
            Box::new(std::io::BufReader::new(file))
        }
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    std::thread::Builder::new()
        .name("capture-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => {
                        if sender.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to read capture input: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("Capture input closed");
        })
        .context("Failed to start capture reader")?;

    Ok(())
}

/// Decrypt both bodies of an offline exchange record
fn run_decrypt(config: &Config, record: &Path, keystream_drop: Option<usize>) -> Result<()> {
    let cipher = keystream_drop
        .map(SessionCipher::new)
        .unwrap_or_else(|| config.cipher());

    let exchange = ExchangeRecord::from_path(record)
        .and_then(|record| record.decrypt(&cipher))
        .map_err(|e| {
            let e = WearhookError::from(e);
            let hint = e.user_message();
            anyhow::Error::new(e).context(hint)
        })?;

    println!("req body: {}", exchange.request_text());
    println!("res data: {}", exchange.response_text());
    Ok(())
}
