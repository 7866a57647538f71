//! consulns
//!
//! PowerDNS remote backend daemon. Serves authoritative zones from an
//! in-memory store over a Unix domain socket.

use anyhow::{anyhow, Context};
use clap::Parser;
use consulns_config::{zones::build_store, Config, ConfigHolder};
use consulns_metrics::metrics;
use consulns_metrics::tracing_setup::{init_tracing, parse_level, LogConfig, LogFormat};
use consulns_server::{register_all, Dispatcher, UnixServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// No socket path on the command line or in the configuration.
const EXIT_NO_SOCKET: u8 = 1;
/// Configuration or zone bootstrap failure.
const EXIT_CONFIG: u8 = 2;
/// The socket could not be bound.
const EXIT_BIND: u8 = 3;

/// consulns - PowerDNS remote backend over a Unix socket
#[derive(Parser, Debug)]
#[command(name = "consulns")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Unix socket to listen on (overrides server.socket_path)
    #[arg(value_name = "SOCKET", env = "CONSULNS_SOCKET")]
    socket: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

/// A startup failure and the exit code it maps to.
struct Fatal {
    code: u8,
    error: anyhow::Error,
}

trait ExitContext<T> {
    fn exit_code(self, code: u8) -> Result<T, Fatal>;
}

impl<T> ExitContext<T> for anyhow::Result<T> {
    fn exit_code(self, code: u8) -> Result<T, Fatal> {
        self.map_err(|error| Fatal { code, error })
    }
}

/// Find the configuration file in standard locations
fn find_config_file(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    [
        PathBuf::from("./consulns.yaml"),
        PathBuf::from("./consulns.yml"),
        PathBuf::from("/etc/consulns/consulns.yaml"),
    ]
    .into_iter()
    .find(|path| path.exists())
}

/// Loads and validates the configuration, applying command line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<ConfigHolder> {
    let holder = match find_config_file(cli.config.clone()) {
        Some(path) => ConfigHolder::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigHolder::default(),
    };

    if let Some(socket) = &cli.socket {
        holder.update(|config| config.server.socket_path = Some(socket.clone()));
    }

    Ok(holder)
}

/// Initialize logging/tracing subsystem
fn init_logging(config: &Config, cli: &Cli) {
    let level = parse_level(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let format_name = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    let format = format_name.parse().unwrap_or_else(|e| {
        eprintln!("consulns: {e}, using text");
        LogFormat::Text
    });

    init_tracing(&LogConfig {
        level,
        format,
        span_events: false,
    });
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = sigterm => info!("received SIGTERM, initiating graceful shutdown"),
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("received SIGINT, initiating graceful shutdown"),
            Err(e) => error!(error = %e, "failed to listen for SIGINT"),
        },
    }
}

async fn run(holder: ConfigHolder) -> Result<(), Fatal> {
    let config = holder.get();

    let socket = config
        .server
        .socket_path
        .clone()
        .ok_or_else(|| anyhow!("no socket path: pass one as argument or set server.socket_path"))
        .exit_code(EXIT_NO_SOCKET)?;

    let store = build_store(&config.bootstrap_zones())
        .context("Failed to load zones")
        .exit_code(EXIT_CONFIG)?;
    let store = Arc::new(store);
    for zone in store.zones() {
        metrics().set_zone_records(zone.name(), zone.record_count());
    }

    let mut dispatcher = Dispatcher::new(config.server.request_timeout());
    register_all(&mut dispatcher, Arc::clone(&store));

    let server_config = consulns_server::ServerConfig {
        request_timeout: config.server.request_timeout(),
        max_frame_len: config.server.max_frame_len,
    };
    let server = UnixServer::new(&socket, Arc::new(dispatcher), server_config);
    server
        .bind()
        .with_context(|| format!("Failed to bind {}", socket.display()))
        .exit_code(EXIT_BIND)?;

    info!(
        socket = %socket.display(),
        zones = store.len(),
        config = ?holder.path(),
        "consulns started"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if let Err(e) = server.serve(shutdown).await {
        error!(error = %e, "server error");
    }

    let metrics = metrics();
    info!(
        uptime_secs = metrics.uptime().as_secs(),
        requests = metrics.requests(),
        failures = metrics.failures(),
        connections = metrics.connections(),
        "consulns stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let holder = match load_config(&cli) {
        Ok(holder) => holder,
        Err(e) => {
            eprintln!("consulns: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&holder.get(), &cli);

    match run(holder).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Fatal { code, error }) => {
            error!(error = %format!("{error:#}"), code, "fatal");
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["consulns"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.log_level.is_none());

        let cli = Cli::try_parse_from([
            "consulns",
            "/run/pdns/backend.sock",
            "-c",
            "/etc/consulns/consulns.yaml",
            "-l",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.socket, Some(PathBuf::from("/run/pdns/backend.sock")));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/consulns/consulns.yaml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }

    #[test]
    fn test_socket_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consulns.yaml");
        std::fs::write(&path, "server:\n  socket_path: /tmp/from-config.sock\n").unwrap();

        let cli = Cli::try_parse_from(["consulns", "-c", path.to_str().unwrap()]).unwrap();
        let holder = load_config(&cli).unwrap();
        assert_eq!(
            holder.get().server.socket_path,
            Some(PathBuf::from("/tmp/from-config.sock"))
        );
        assert_eq!(holder.path(), Some(path.clone()));

        let cli =
            Cli::try_parse_from(["consulns", "/tmp/from-cli.sock", "-c", path.to_str().unwrap()])
                .unwrap();
        let holder = load_config(&cli).unwrap();
        assert_eq!(
            holder.get().server.socket_path,
            Some(PathBuf::from("/tmp/from-cli.sock"))
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consulns.yaml");
        std::fs::write(&path, "zones:\n  - name: missing-dot\n").unwrap();

        let cli = Cli::try_parse_from(["consulns", "-c", path.to_str().unwrap()]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[tokio::test]
    async fn test_missing_socket_exit_code() {
        let holder = ConfigHolder::default();
        let err = run(holder).await.err().unwrap();
        assert_eq!(err.code, EXIT_NO_SOCKET);
    }

    #[tokio::test]
    async fn test_bind_failure_exit_code() {
        let holder = ConfigHolder::default();
        holder.update(|c| {
            c.server.socket_path = Some(PathBuf::from("/nonexistent-dir/consulns/backend.sock"))
        });
        let err = run(holder).await.err().unwrap();
        assert_eq!(err.code, EXIT_BIND);
    }
}
