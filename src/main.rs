//! TideKV server.
//!
//! Parses command-line flags, opens the engine (replaying the append-only
//! file if enabled), and serves clients until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use tidekv::connection::{handle_connection, ConnectionStats};
use tidekv::engine::DEFAULT_DATABASES;
use tidekv::persistence::DEFAULT_AOF_PATH;
use tidekv::{AofConfig, Engine, EngineConfig, FsyncPolicy};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
struct Config {
    host: String,
    port: u16,
    databases: usize,
    /// Whether mutations are logged to the append-only file
    appendonly: bool,
    appendfilename: PathBuf,
    appendfsync: FsyncPolicy,
    /// Default log filter when `RUST_LOG` is unset
    log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: tidekv::DEFAULT_HOST.to_string(),
            port: tidekv::DEFAULT_PORT,
            databases: DEFAULT_DATABASES,
            appendonly: false,
            appendfilename: PathBuf::from(DEFAULT_AOF_PATH),
            appendfsync: FsyncPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, PartialEq)]
enum Action {
    Serve(Config),
    Help,
    Version,
}

impl Config {
    /// Parses flags (without the program name).
    fn parse<I>(args: I) -> Result<Action, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .ok_or_else(|| format!("{} requires a value", flag))
            };

            match flag.as_str() {
                "--host" | "-h" => config.host = value()?,
                "--port" | "-p" => {
                    config.port = value()?
                        .parse()
                        .map_err(|_| "invalid port number".to_string())?
                }
                "--databases" => {
                    config.databases = value()?
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| "--databases must be a positive integer".to_string())?
                }
                "--appendonly" => {
                    config.appendonly = match value()?.to_ascii_lowercase().as_str() {
                        "yes" => true,
                        "no" => false,
                        other => return Err(format!("--appendonly expects yes or no, got '{}'", other)),
                    }
                }
                "--appendfilename" => config.appendfilename = PathBuf::from(value()?),
                "--appendfsync" => config.appendfsync = value()?.parse()?,
                "--log-level" => config.log_level = value()?,
                "--help" => return Ok(Action::Help),
                "--version" | "-v" => return Ok(Action::Version),
                other => return Err(format!("unknown argument: {}", other)),
            }
        }

        Ok(Action::Serve(config))
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            databases: self.databases,
            aof: self.appendonly.then(|| AofConfig {
                path: self.appendfilename.clone(),
                fsync: self.appendfsync,
            }),
            ..EngineConfig::default()
        }
    }
}

fn print_help() {
    println!(
        r#"
TideKV - An In-Memory, Redis-Compatible Key-Value Store

USAGE:
    tidekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>               Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>               Port to listen on (default: 6379)
        --databases <N>             Number of databases (default: 16)
        --appendonly <yes|no>       Log mutations to the append-only file (default: no)
        --appendfilename <PATH>     Append-only file path (default: appendonly.aof)
        --appendfsync <POLICY>      always | everysec | no (default: everysec)
        --log-level <FILTER>        Log filter when RUST_LOG is unset (default: info)
    -v, --version                   Print version information
        --help                      Print this help message

EXAMPLES:
    tidekv                                   # Start on 127.0.0.1:6379
    tidekv --port 6380 --appendonly yes      # Persist to ./appendonly.aof
    tidekv --appendonly yes --appendfsync always
"#
    );
}

fn print_banner(config: &Config) {
    let persistence = if config.appendonly {
        format!(
            "{} (fsync {})",
            config.appendfilename.display(),
            config.appendfsync
        )
    } else {
        "off".to_string()
    };

    println!(
        r#"
  ~~~~ TideKV v{} ~~~~
──────────────────────────────────────
Listening on   {}
Databases      {}
Append-only    {}

Use Ctrl+C to shutdown gracefully.
"#,
        tidekv::VERSION,
        config.bind_address(),
        config.databases,
        persistence
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::parse(std::env::args().skip(1)) {
        Ok(Action::Serve(config)) => config,
        Ok(Action::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Action::Version) => {
            println!("TideKV version {}", tidekv::VERSION);
            return Ok(());
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            print_help();
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    print_banner(&config);

    let engine = Arc::new(Engine::open(config.engine_config())?);
    info!(databases = engine.database_count(), "Engine initialized");

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&engine), stats) => {}
        _ = shutdown => {}
    }

    engine.sync().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Accepts clients forever, one task each.
async fn accept_loop(listener: TcpListener, engine: Arc<Engine>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let engine = Arc::clone(&engine);
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, addr, engine, stats));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
