//! PrefixKV - A Prefix-Indexed In-Memory Key-Value Store
//!
//! This is the main entry point for the PrefixKV server.
//! It parses the configuration, starts the storage engine and cron, and
//! accepts incoming connections.

use prefixkv::commands::QueryHandler;
use prefixkv::connection::handle_connection;
use prefixkv::storage::{Cron, CronConfig, Engine, EngineConfig, Limits};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Engine limits
    limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: prefixkv::DEFAULT_HOST.to_string(),
            port: prefixkv::DEFAULT_PORT,
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        fn value_of(args: &[String], i: usize, flag: &str) -> String {
            match args.get(i + 1) {
                Some(v) => v.clone(),
                None => {
                    eprintln!("Error: {flag} requires a value");
                    std::process::exit(1);
                }
            }
        }

        fn numeric<T: std::str::FromStr>(raw: &str, flag: &str) -> T {
            raw.parse().unwrap_or_else(|_| {
                eprintln!("Error: invalid value for {flag}");
                std::process::exit(1);
            })
        }

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host");
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = numeric(&value_of(&args, i, "--port"), "--port");
                    i += 2;
                }
                "--max-memory" => {
                    config.limits.max_memory =
                        numeric(&value_of(&args, i, "--max-memory"), "--max-memory");
                    i += 2;
                }
                "--max-key-size" => {
                    config.limits.max_key_size =
                        numeric(&value_of(&args, i, "--max-key-size"), "--max-key-size");
                    i += 2;
                }
                "--max-value-size" => {
                    config.limits.max_value_size =
                        numeric(&value_of(&args, i, "--max-value-size"), "--max-value-size");
                    i += 2;
                }
                "--max-item-ttl" => {
                    config.limits.max_item_ttl =
                        numeric(&value_of(&args, i, "--max-item-ttl"), "--max-item-ttl");
                    i += 2;
                }
                "--compression" => {
                    config.limits.compression =
                        numeric(&value_of(&args, i, "--compression"), "--compression");
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("PrefixKV version {}", prefixkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
PrefixKV - A Prefix-Indexed In-Memory Key-Value Store

USAGE:
    prefixkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>             Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>             Port to listen on (default: 10128)
        --max-memory <BYTES>      Write gate: SET/MSET fail past this (default: 128MB)
        --max-key-size <BYTES>    Longest accepted key (default: 1024)
        --max-value-size <BYTES>  Longest accepted value (default: 1MB)
        --max-item-ttl <SECS>     Ceiling for client TTLs (default: 30 days)
        --compression <BYTES>     Compress values longer than this (default: 1024)
    -v, --version                 Print version information
        --help                    Print this help message

EXAMPLES:
    prefixkv                            # Start on 127.0.0.1:10128
    prefixkv --port 10200               # Start on port 10200
    prefixkv --host 0.0.0.0             # Listen on all interfaces
    prefixkv --max-memory 536870912     # Allow half a gigabyte of items
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
PrefixKV v{} - Prefix-Indexed In-Memory Key-Value Store
───────────────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        prefixkv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    // Create the storage engine (shared across all connections)
    let engine = Arc::new(Mutex::new(Engine::new(EngineConfig {
        limits: config.limits.clone(),
    })));
    info!("Storage engine initialized");

    // Start the background cron (clock refresh + expired-item sweep)
    let _cron = Cron::start(Arc::clone(&engine), CronConfig::default());

    let query_handler = QueryHandler::new(engine);

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    // Set up graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    // Main accept loop
    tokio::select! {
        _ = accept_loop(listener, query_handler) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, query_handler: QueryHandler) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let query_handler = query_handler.clone();

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    handle_connection(stream, addr, query_handler).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
