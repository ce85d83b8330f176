//! RGW Client
//!
//! Sends telemetry records to an RGW1 collector.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rgw_client::config::{default_config_path, Config};
use rgw_client::runner::Client;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Exit code on full completion.
const EXIT_SUCCESS: u8 = 0;

/// Exit code for any failure other than a missing key.
const EXIT_FAILURE: u8 = 1;

/// Exit code when no authentication key is available.
const EXIT_NO_AUTH_KEY: u8 = 2;

/// Handle used to swap in the configured log level once the config is loaded.
type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// RGW Client - sends telemetry records to a collector over RGW1.
#[derive(Parser, Debug)]
#[command(name = "rgw-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Collector host
    #[arg(long)]
    pub host: Option<String>,

    /// Collector port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pre-shared authentication key (overrides AUTH_KEY)
    #[arg(long, value_name = "KEY")]
    pub auth_key: Option<String>,

    /// Device identifier, e.g. DE:AD:BE:EF:00:01
    #[arg(long, value_name = "ID")]
    pub device_id: Option<String>,

    /// Number of data frames to send
    #[arg(short = 'n', long)]
    pub frames: Option<u32>,

    /// Pause between data frames in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Send a ping before the first data frame
    #[arg(long)]
    pub ping: bool,

    /// Retry failed sessions with exponential backoff
    #[arg(long)]
    pub reconnect: bool,

    /// Write the effective configuration (without the auth key) to the config path and exit
    #[arg(long)]
    pub write_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Applies command-line overrides on top of file and environment values.
    ///
    /// An empty `--auth-key` is ignored, like an empty `AUTH_KEY`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(key) = self.auth_key.as_ref().filter(|key| !key.is_empty()) {
            config.auth.key = Some(key.clone());
        }
        if let Some(id) = &self.device_id {
            config.device.id = id.clone();
        }
        if let Some(frames) = self.frames {
            config.session.frames = frames;
        }
        if let Some(interval) = self.interval_ms {
            config.session.interval_ms = interval;
        }
        if self.ping {
            config.session.ping = true;
        }
        if self.reconnect {
            config.reconnect.enabled = true;
        }
    }
}

/// Loads the file, then layers environment and command-line overrides.
///
/// Not validated here: a missing key must be reported before anything else.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::debug!("Using config file: {:?}", path);
            Config::load(path)?
        }
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    cli.apply(&mut config);
    Ok(config)
}

fn log_filter(verbose: bool, level: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

/// Installs the subscriber with a provisional `info` level.
fn init_tracing(verbose: bool) -> FilterHandle {
    let (filter, handle) = reload::Layer::new(log_filter(verbose, "info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    handle
}

fn write_config(cli: &Cli, config: &Config) -> anyhow::Result<PathBuf> {
    config.validate().context("Invalid configuration")?;

    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = config.clone();
    config.auth.key = None;
    config.save(&path)?;
    Ok(path)
}

/// Runs the client and returns the process exit status.
fn run(cli: &Cli, filter: Option<&FilterHandle>) -> u8 {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return EXIT_FAILURE;
        }
    };

    if let Some(handle) = filter {
        if let Err(e) = handle.reload(log_filter(cli.verbose, &config.logging.level)) {
            tracing::warn!("Failed to apply log level {}: {}", config.logging.level, e);
        }
    }

    if cli.write_config {
        return match write_config(cli, &config) {
            Ok(path) => {
                tracing::info!("Configuration written to {}", path.display());
                EXIT_SUCCESS
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                EXIT_FAILURE
            }
        };
    }

    if config.auth_key().is_none() {
        tracing::error!("No authentication key: set AUTH_KEY, pass --auth-key or set [auth] key");
        return EXIT_NO_AUTH_KEY;
    }

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return EXIT_FAILURE;
    }

    let client = match Client::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("{:#}", e);
            return EXIT_FAILURE;
        }
    };

    tracing::info!(
        "Sending {} frame(s) to {}:{} as {}",
        client.plan.frames,
        client.host,
        client.port,
        client.credentials.device_id
    );

    match client.run() {
        Ok(summary) => {
            tracing::info!(
                "Done: {} frame(s) acknowledged in {} attempt(s)",
                summary.frames_acknowledged,
                summary.attempts
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            tracing::error!(
                stage = %e.error.stage,
                attempts = e.attempts,
                acknowledged = e.frames_acknowledged,
                "{}",
                e
            );
            EXIT_FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = init_tracing(cli.verbose);
    ExitCode::from(run(&cli, Some(&filter)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("AUTH_KEY");
        std::env::remove_var("RGW_AUTH_KEY");
        std::env::remove_var("RGW_LOG_LEVEL");
    }

    /// Parses `args` with `--config` pointing into `dir`.
    fn cli_in(dir: &TempDir, args: &[&str]) -> Cli {
        let config = dir.path().join("client.toml");
        let mut argv = vec![
            "rgw-client".to_string(),
            "--config".to_string(),
            config.display().to_string(),
        ];
        argv.extend(args.iter().map(|arg| arg.to_string()));
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_no_args() {
        let cli = Cli::try_parse_from(["rgw-client"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(!cli.ping);
        assert!(!cli.reconnect);
        assert!(!cli.write_config);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_all_flags() {
        let cli = Cli::try_parse_from([
            "rgw-client",
            "--config",
            "/tmp/client.toml",
            "--host",
            "collector.local",
            "--port",
            "7000",
            "--auth-key",
            "secret",
            "--device-id",
            "AA:BB:CC:DD:EE:FF",
            "--frames",
            "3",
            "--interval-ms",
            "100",
            "--ping",
            "--reconnect",
            "--verbose",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/client.toml")));
        assert_eq!(cli.port, Some(7000));
        assert_eq!(cli.frames, Some(3));
        assert!(cli.ping && cli.reconnect && cli.verbose);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::try_parse_from(["rgw-client", "-p", "9191", "-n", "5", "-v"]).unwrap();
        assert_eq!(cli.port, Some(9191));
        assert_eq!(cli.frames, Some(5));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["rgw-client", "--port", "70000"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "rgw-client",
            "--host",
            "10.0.0.9",
            "--auth-key",
            "cli-key",
            "--frames",
            "8",
            "--ping",
        ])
        .unwrap();

        let mut config = Config::default();
        config.auth.key = Some("env-key".to_string());
        cli.apply(&mut config);

        assert_eq!(config.server.host, "10.0.0.9");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.auth.key.as_deref(), Some("cli-key"));
        assert_eq!(config.session.frames, 8);
        assert!(config.session.ping);
        assert!(!config.reconnect.enabled);
    }

    #[test]
    fn test_cli_ignores_empty_auth_key() {
        let cli = Cli::try_parse_from(["rgw-client", "--auth-key", ""]).unwrap();

        let mut config = Config::default();
        config.auth.key = Some("env-key".to_string());
        cli.apply(&mut config);
        assert_eq!(config.auth.key.as_deref(), Some("env-key"));
    }

    #[test]
    #[serial]
    fn test_run_without_key_exits_no_auth_key() {
        clear_env();
        let dir = TempDir::new().unwrap();
        assert_eq!(run(&cli_in(&dir, &[]), None), EXIT_NO_AUTH_KEY);
    }

    #[test]
    #[serial]
    fn test_run_empty_cli_key_exits_no_auth_key() {
        clear_env();
        let dir = TempDir::new().unwrap();
        assert_eq!(run(&cli_in(&dir, &["--auth-key", ""]), None), EXIT_NO_AUTH_KEY);
    }

    #[test]
    #[serial]
    fn test_run_empty_file_key_exits_no_auth_key() {
        clear_env();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("client.toml"), "[auth]\nkey = \"\"\n").unwrap();
        assert_eq!(run(&cli_in(&dir, &[]), None), EXIT_NO_AUTH_KEY);
    }

    #[test]
    #[serial]
    fn test_run_empty_env_key_exits_no_auth_key() {
        clear_env();
        std::env::set_var("AUTH_KEY", "");
        let dir = TempDir::new().unwrap();
        let code = run(&cli_in(&dir, &[]), None);
        clear_env();
        assert_eq!(code, EXIT_NO_AUTH_KEY);
    }

    #[test]
    #[serial]
    fn test_run_missing_key_reported_before_invalid_config() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let cli = cli_in(&dir, &["--device-id", "bad"]);
        assert_eq!(run(&cli, None), EXIT_NO_AUTH_KEY);
    }

    #[test]
    #[serial]
    fn test_run_invalid_config_with_key_exits_failure() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let cli = cli_in(&dir, &["--auth-key", "secret", "--device-id", "bad"]);
        assert_eq!(run(&cli, None), EXIT_FAILURE);
    }

    #[test]
    #[serial]
    fn test_run_unreadable_config_exits_failure() {
        clear_env();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("client.toml"), "[server\n").unwrap();
        let cli = cli_in(&dir, &["--auth-key", "secret"]);
        assert_eq!(run(&cli, None), EXIT_FAILURE);
    }

    #[test]
    #[serial]
    fn test_write_config_saves_effective_config_without_key() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let cli = cli_in(
            &dir,
            &["--write-config", "--host", "collector.local", "--auth-key", "secret"],
        );
        assert_eq!(run(&cli, None), EXIT_SUCCESS);

        let written = Config::load(dir.path().join("client.toml")).unwrap();
        assert_eq!(written.server.host, "collector.local");
        assert!(written.auth.key.is_none());
    }

    #[test]
    #[serial]
    fn test_write_config_rejects_invalid_config() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let cli = cli_in(&dir, &["--write-config", "--frames", "0"]);
        assert_eq!(run(&cli, None), EXIT_FAILURE);
        assert!(!dir.path().join("client.toml").exists());
    }
}
