//! faultstream CLI - Fault-Injecting SSE Streaming
//!
//! Usage:
//!   faultstream serve [OPTIONS]    Start the HTTP server
//!   faultstream watch [OPTIONS]    Consume a stream and print it as it plays
//!
//! Examples:
//!   faultstream serve --port 8080
//!   faultstream serve --config config.yaml --failure-rate 0.5 --seed 7
//!   faultstream watch --mode duplicate --message "Hello there"
//!   faultstream watch --question "로봇 충전은 어떻게 하나요?" --mode delay

use clap::{Parser, Subcommand};
use faultstream::cli::{Config, ConfigError};
use faultstream::client::{
    LifecycleEvent, NetworkCondition, StreamConsumer, StreamTarget,
};
use faultstream::StreamMode;
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "faultstream")]
#[command(author, version, about = "Fault-injecting SSE streaming server and client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the streaming HTTP server
    Serve {
        /// Configuration file path (YAML)
        #[arg(short, long, env = "FAULTSTREAM_CONFIG")]
        config: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "FAULTSTREAM_PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long, env = "FAULTSTREAM_HOST")]
        host: Option<String>,

        /// Probability that a suggestion request fails with 500 (0.0-1.0)
        #[arg(long)]
        failure_rate: Option<f64>,

        /// Seed for a repeatable failure sequence
        #[arg(long)]
        seed: Option<u64>,

        /// Output logs in JSON format
        #[arg(long)]
        json_logs: bool,
    },
    /// Consume a stream and print its text as the pacer releases it
    Watch {
        /// Configuration file path (YAML); only the `client` section is used
        #[arg(short, long, env = "FAULTSTREAM_CONFIG")]
        config: Option<String>,

        /// Server base URL
        #[arg(long, env = "FAULTSTREAM_URL")]
        url: Option<String>,

        /// Fault mode (normal, delay, missing, duplicate, error)
        #[arg(short, long, default_value = "normal")]
        mode: StreamMode,

        /// Message for the chat endpoint
        #[arg(long, conflicts_with = "question")]
        message: Option<String>,

        /// Question for the suggestions endpoint
        #[arg(long)]
        question: Option<String>,

        /// Simulated network (online, offline, slow)
        #[arg(long)]
        network: Option<NetworkCondition>,

        /// Cancel the stream after this many milliseconds
        #[arg(long)]
        max_duration_ms: Option<u64>,
    },
}

fn load_config(config_file: Option<&str>) -> Result<Config, ConfigError> {
    match config_file {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            Config::from_file(path)
        }
        None => Ok(Config::default()),
    }
}

fn init_tracing(default_filter: &str, json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            host,
            failure_rate,
            seed,
            json_logs,
        } => {
            init_tracing("faultstream=info,tower_http=info", json_logs);

            let mut config = load_config(config.as_deref())?;

            // Override with CLI arguments
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(rate) = failure_rate {
                config.dispatch.failure_rate = rate;
            }
            if seed.is_some() {
                config.dispatch.seed = seed;
            }
            config.validate()?;

            faultstream::cli::run_server(config).await?;
        }
        Commands::Watch {
            config,
            url,
            mode,
            message,
            question,
            network,
            max_duration_ms,
        } => {
            init_tracing("faultstream=warn", false);

            let config = load_config(config.as_deref())?;
            let mut consumer_config = config.consumer_config();
            if let Some(url) = url {
                consumer_config.base_url = url;
            }
            if let Some(network) = network {
                consumer_config.network = network;
            }
            if let Some(ms) = max_duration_ms {
                consumer_config.max_duration = Some(Duration::from_millis(ms));
            }

            let target = match question {
                Some(question) => StreamTarget::suggestion(question, mode),
                None => StreamTarget::chat(message.unwrap_or_default(), mode),
            };

            let succeeded = watch(consumer_config, target).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Print a stream as it plays; returns whether it completed
async fn watch(
    config: faultstream::client::ConsumerConfig,
    target: StreamTarget,
) -> Result<bool, Box<dyn std::error::Error>> {
    let consumer = StreamConsumer::new(config)?;
    let mut events = consumer.subscribe();
    let handle = consumer.start(target);

    let mut stdout = std::io::stdout();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                continue;
            }
        };

        match event {
            Some(LifecycleEvent::Chunk { text, .. }) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            Some(LifecycleEvent::Completed { .. }) => {
                writeln!(stdout)?;
                return Ok(true);
            }
            Some(LifecycleEvent::Failed { failure, .. }) => {
                writeln!(stdout)?;
                eprintln!("stream failed: {failure}");
                if failure.is_retryable() {
                    eprintln!("(the server may succeed on another attempt)");
                }
                return Ok(false);
            }
            Some(LifecycleEvent::Cancelled { reason, .. }) => {
                writeln!(stdout)?;
                eprintln!("stream cancelled ({reason:?})");
                return Ok(false);
            }
            Some(LifecycleEvent::Started { .. }) => {}
            None => return Ok(false),
        }
    }
}
