//! evalpipe - Single-Session Evaluation Server
//!
//! This is the main entry point for the evalpipe server.
//! It opens the local endpoint, serves one caller at a time with the
//! arithmetic evaluator, and shuts down on Ctrl+C.

use anyhow::Context;
use evalpipe::evaluator::ArithmeticEvaluator;
use evalpipe::server::{Server, ServerConfig};
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line configuration
struct Config {
    /// Endpoint name
    name: String,
    /// Read chunk and pipe buffer size
    buffer_size: usize,
    /// Instruction timeout in milliseconds
    timeout_ms: u64,
    /// Debug-level logging
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            name: defaults.channel_name,
            buffer_size: defaults.buffer_size,
            timeout_ms: defaults.instruction_timeout.as_millis() as u64,
            verbose: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--name" | "-n" => {
                    config.name = value_of(&args, i, "--name").to_string();
                    i += 2;
                }
                "--buffer-size" | "-b" => {
                    config.buffer_size = value_of(&args, i, "--buffer-size")
                        .parse::<usize>()
                        .ok()
                        .filter(|size| *size > 0)
                        .unwrap_or_else(|| {
                            eprintln!("Error: invalid buffer size");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--timeout-ms" | "-t" => {
                    config.timeout_ms = value_of(&args, i, "--timeout-ms")
                        .parse::<u64>()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid timeout");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--verbose" => {
                    config.verbose = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("evalpipe version {}", evalpipe::VERSION);
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

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            buffer_size: self.buffer_size,
            instruction_timeout: Duration::from_millis(self.timeout_ms),
            ..ServerConfig::new(self.name.clone())
        }
    }

    fn log_filter(&self) -> EnvFilter {
        EnvFilter::new(if self.verbose { "debug" } else { "info" })
    }
}

/// Returns the value following the flag at `i`, or exits.
fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
evalpipe - Single-Session Evaluation Server

USAGE:
    evalpipe [OPTIONS]

OPTIONS:
    -n, --name <NAME>           Endpoint name (default: evalpipe)
    -b, --buffer-size <BYTES>   Read chunk and pipe buffer size (default: 65535)
    -t, --timeout-ms <MS>       Time allowed for each instruction (default: 1000)
        --verbose               Log at debug level
    -v, --version               Print version information
    -h, --help                  Print this help message

EXAMPLES:
    evalpipe                          # Listen on the default endpoint
    evalpipe --name calc              # Listen on a custom endpoint
    evalpipe --timeout-ms 30000       # Allow slow callers

PROTOCOL:
    Every message ends with <END>.
    -> READY<END>
    <- GO_AHEAD<END>
    -> x = 5; x * 2<END>
    <- x = 510<END>
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
evalpipe v{} - Single-Session Evaluation Server
──────────────────────────────────────────────────────────────
Endpoint: {}
Ready to accept a caller.

Use Ctrl+C to shutdown gracefully.
"#,
        evalpipe::VERSION,
        evalpipe::transport::endpoint_address(&config.channel_name)
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_env_filter(config.log_filter())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let server_config = config.server_config();
    print_banner(&server_config);

    let mut handle = Server::new(server_config, ArithmeticEvaluator::new()).spawn();

    tokio::select! {
        result = handle.join() => {
            result.context("server stopped unexpectedly")?;
            return Ok(());
        }
        signal = signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    handle.shutdown().await?;
    info!("Server shutdown complete");
    Ok(())
}
