//! Configuration module for the graceful-demo server
//!
//! Configuration is loaded with the following priority (highest first):
//! 1. Command line arguments
//! 2. Environment variables (prefixed with GRACEFUL_)
//! 3. Configuration file (config.toml or config.yaml)
//! 4. Default values

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Default host to bind to
const DEFAULT_HOST: &str = "0.0.0.0";
/// Default port
const DEFAULT_PORT: u16 = 8080;
/// Default time in-flight requests get before their connections are closed
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "graceful-demo")]
#[command(about = "An HTTP server that drains in-flight requests on SIGINT/SIGTERM")]
pub struct CliArgs {
    /// Host to bind the server to
    #[arg(long, env = "GRACEFUL_HOST")]
    pub host: Option<String>,

    /// Port to bind the server to
    #[arg(short, long, env = "GRACEFUL_PORT")]
    pub port: Option<u16>,

    /// Grace period for in-flight requests, e.g. "30s" or "500ms" ("0s" waits forever)
    #[arg(short, long, env = "GRACEFUL_GRACE_PERIOD", value_parser = humantime::parse_duration)]
    pub grace_period: Option<Duration>,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, env = "GRACEFUL_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key; enables TLS together with --tls-cert
    #[arg(long, env = "GRACEFUL_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Delay applied by the catch-all demo route
    #[arg(long, env = "GRACEFUL_HANDLER_DELAY", value_parser = humantime::parse_duration)]
    pub handler_delay: Option<Duration>,

    /// Path to configuration file
    #[arg(short, long, env = "GRACEFUL_CONFIG")]
    pub config: Option<PathBuf>,
}

/// File-based configuration (for TOML/YAML)
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    #[serde(with = "humantime_serde")]
    grace_period: Option<Duration>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    handler_delay: Option<Duration>,
}

/// Certificate and key for serving TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Configuration for the graceful-demo server
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind the server to
    pub host: String,

    /// Port to bind the server to
    pub port: u16,

    /// Time in-flight requests get after a shutdown signal (zero = unbounded)
    pub grace_period: Duration,

    /// TLS certificate and key, if TLS is enabled
    pub tls: Option<TlsFiles>,

    /// Delay applied by the catch-all demo route
    pub handler_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            grace_period: DEFAULT_GRACE_PERIOD,
            tls: None,
            handler_delay: Duration::ZERO,
        }
    }
}

impl Config {
    /// Load configuration from all sources (CLI > env > file > defaults)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(CliArgs::parse())
    }

    /// Load configuration from provided CLI args (for testing)
    pub fn load_from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let file_config = Self::load_file_config(&args.config)?;

        // Apply file config (file overrides defaults)
        if let Some(h) = file_config.host {
            config.host = h;
        }
        if let Some(p) = file_config.port {
            config.port = p;
        }
        if let Some(grace) = file_config.grace_period {
            config.grace_period = grace;
        }
        if let Some(delay) = file_config.handler_delay {
            config.handler_delay = delay;
        }
        let mut tls_cert = file_config.tls_cert;
        let mut tls_key = file_config.tls_key;

        // Apply CLI args (CLI overrides everything)
        if let Some(h) = args.host {
            config.host = h;
        }
        if let Some(p) = args.port {
            config.port = p;
        }
        if let Some(grace) = args.grace_period {
            config.grace_period = grace;
        }
        if let Some(delay) = args.handler_delay {
            config.handler_delay = delay;
        }
        if args.tls_cert.is_some() {
            tls_cert = args.tls_cert;
        }
        if args.tls_key.is_some() {
            tls_key = args.tls_key;
        }

        config.tls = match (tls_cert, tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Message(
                    "tls_cert and tls_key must be set together".to_string(),
                ))
            }
        };

        Ok(config)
    }

    /// Load configuration from file
    fn load_file_config(config_path: &Option<PathBuf>) -> Result<FileConfig, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.as_path()));
        } else {
            // Try default config files (optional)
            builder = builder
                .add_source(File::with_name("config").required(false))
                .add_source(File::with_name("graceful").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("GRACEFUL")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        settings.try_deserialize()
    }

    /// Get the socket address for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
