//! Binary executable for the SKR events listener.

use skr_listener::event::{EventLoggerConfig, LogDestination};
use skr_listener::{EventSource, ListenerConfig, SkrEventsListener};
use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// For command line argument parsing
struct Args {
    host: String,
    port: u16,
    component: Option<String>,
    max_body_bytes: usize,
    dispatch_timeout: Option<u64>,
    shutdown_grace: u64,
    logs_dir: Option<String>,
    structured_logs: bool,
    verbose: bool,
}

impl Args {
    fn parse() -> Result<Self, Box<dyn Error>> {
        let mut args = pico_args::Arguments::from_env();

        if args.contains("--help") {
            print_help();
            process::exit(0);
        }

        if args.contains("--version") {
            println!("skr-listener {}", env!("CARGO_PKG_VERSION"));
            process::exit(0);
        }

        let defaults = ListenerConfig::default();

        let any_component = args.contains("--any-component")
            || env::var("SKR_LISTENER_ANY_COMPONENT").is_ok();
        let component: Option<String> = args
            .opt_value_from_str(["-c", "--component"])?
            .or_else(|| env::var("SKR_LISTENER_COMPONENT").ok());

        let result = Args {
            host: args
                .opt_value_from_str(["-h", "--host"])?
                .unwrap_or_else(|| env::var("SKR_LISTENER_HOST").unwrap_or(defaults.host)),
            port: args
                .opt_value_from_str(["-p", "--port"])?
                .unwrap_or_else(|| env_parsed("SKR_LISTENER_PORT").unwrap_or(defaults.port)),
            component: if any_component {
                None
            } else {
                component.or(defaults.component)
            },
            max_body_bytes: args
                .opt_value_from_str("--max-body-bytes")?
                .unwrap_or_else(|| {
                    env_parsed("SKR_LISTENER_MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes)
                }),
            dispatch_timeout: args
                .opt_value_from_str("--dispatch-timeout")?
                .or_else(|| env_parsed("SKR_LISTENER_DISPATCH_TIMEOUT")),
            shutdown_grace: args
                .opt_value_from_str("--shutdown-grace")?
                .unwrap_or_else(|| {
                    env_parsed("SKR_LISTENER_SHUTDOWN_GRACE")
                        .unwrap_or(defaults.shutdown_grace_secs)
                }),
            logs_dir: args
                .opt_value_from_str("--logs-dir")?
                .or_else(|| env::var("SKR_LISTENER_LOGS_DIR").ok()),
            structured_logs: args.contains("--structured-logs")
                || env::var("SKR_LISTENER_STRUCTURED_LOGS").is_ok(),
            verbose: args.contains(["-v", "--verbose"]),
        };

        // Check for any remaining arguments (which would be invalid)
        let remaining = args.finish();
        if !remaining.is_empty() {
            return Err(format!("Unknown arguments: {:?}", remaining).into());
        }

        Ok(result)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

fn print_help() {
    println!("SKR Events Listener");
    println!("-------------------");
    println!("Receives SKR watcher events over HTTP and forwards them for reconciliation");
    println!();
    println!("USAGE:");
    println!("    skr-listener [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --host <HOST>              Host to bind to [default: 127.0.0.1]");
    println!("    -p, --port <PORT>              Port to listen on [default: 8082]");
    println!("    -c, --component <NAME>         Component segment of the event route [default: skr]");
    println!("    --any-component                Accept any component segment");
    println!("    --max-body-bytes <BYTES>       Largest accepted request body [default: 1048576]");
    println!("    --dispatch-timeout <SECONDS>   Give up forwarding an event after this long");
    println!("    --shutdown-grace <SECONDS>     Graceful shutdown budget [default: 10]");
    println!("    --logs-dir <DIR>               Write listener event logs to this directory");
    println!("    --structured-logs              Use structured JSON event logs");
    println!("    -v, --verbose                  Enable verbose logging");
    println!("    --help                         Print help information");
    println!("    --version                      Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    SKR_LISTENER_HOST              Host to bind to");
    println!("    SKR_LISTENER_PORT              Port to listen on");
    println!("    SKR_LISTENER_COMPONENT         Component segment of the event route");
    println!("    SKR_LISTENER_ANY_COMPONENT     Accept any component segment");
    println!("    SKR_LISTENER_MAX_BODY_BYTES    Largest accepted request body");
    println!("    SKR_LISTENER_DISPATCH_TIMEOUT  Forwarding timeout in seconds");
    println!("    SKR_LISTENER_SHUTDOWN_GRACE    Graceful shutdown budget in seconds");
    println!("    SKR_LISTENER_LOGS_DIR          Directory for event logs");
    println!("    SKR_LISTENER_STRUCTURED_LOGS   Use structured JSON event logs");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse().unwrap_or_else(|e| {
        eprintln!("Error parsing arguments: {}", e);
        process::exit(1);
    });

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("skr_listener={},warp=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SKR events listener v{}", env!("CARGO_PKG_VERSION"));

    let event_logger = args.logs_dir.map(|dir| {
        let log_path = PathBuf::from(dir).join("skr-listener.log");
        debug!("Event logging: {}", log_path.display());
        EventLoggerConfig {
            destination: LogDestination::File {
                path: log_path.to_string_lossy().to_string(),
                max_size: Some(10 * 1024 * 1024),
            },
            structured: args.structured_logs,
            log_level: tracing::Level::INFO,
        }
    });

    let config = ListenerConfig {
        host: args.host,
        port: args.port,
        component: args.component,
        max_body_bytes: args.max_body_bytes,
        dispatch_timeout_secs: args.dispatch_timeout,
        shutdown_grace_secs: args.shutdown_grace,
        event_logger,
    };

    info!("Listener configuration:");
    info!("  Address: {}", config.server_addr());
    info!("  Event URL: {}", config.event_url("1"));
    info!("  Max body: {} bytes", config.max_body_bytes);
    info!("  Dispatch timeout: {:?}", config.dispatch_timeout());
    info!("  Shutdown grace: {:?}", config.shutdown_grace());

    let (listener, mut events) = SkrEventsListener::new(config)?;

    // Stand-in for the reconciliation runtime: log every notification.
    let consumer = tokio::spawn(async move {
        while let Some(notification) = events.next_event().await {
            info!(
                namespace = %notification.namespace,
                name = %notification.name,
                "change notification received"
            );
        }
    });

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let result = listener.start(token).await;
    drop(listener);
    consumer.await?;

    if let Err(e) = result {
        error!("Error during shutdown: {}", e);
        return Err(e.into());
    }

    info!("Listener shutdown complete");
    Ok(())
}
