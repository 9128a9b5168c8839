use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

use crate::services::share_service::DEFAULT_VALID_PERIOD_MS;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL clients reach the service at; share and upload URLs hang off it.
    pub public_url: String,
    pub valid_period_ms: i64,
    /// Seconds between background sweeps; 0 disables the sweeper.
    pub sweep_interval_secs: u64,
    pub admin_token: Option<String>,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Temporary file sharing service")]
pub struct Args {
    /// Host to bind to (overrides SHAREME_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SHAREME_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides SHAREME_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SHAREME_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Externally reachable base URL (overrides SHAREME_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Share lifetime in milliseconds (overrides SHAREME_VALID_PERIOD_MS)
    #[arg(long)]
    pub valid_period_ms: Option<i64>,

    /// Seconds between expiration sweeps, 0 disables (overrides SHAREME_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Bearer token guarding /cleanup (overrides SHAREME_ADMIN_TOKEN)
    #[arg(long)]
    pub admin_token: Option<String>,

    /// Largest accepted upload body in bytes (overrides SHAREME_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// CLI values win over the environment, which wins over defaults.
    fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = args
            .host
            .or_else(|| lookup("SHAREME_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_env(&lookup, "SHAREME_PORT")?.unwrap_or(3000),
        };
        let storage_dir = args
            .storage_dir
            .or_else(|| lookup("SHAREME_STORAGE_DIR"))
            .unwrap_or_else(|| "./data/blobs".into());
        let database_url = args
            .database_url
            .or_else(|| lookup("SHAREME_DATABASE_URL"))
            .unwrap_or_else(|| "sqlite://./data/meta/shareme.db".into());
        let public_url = args
            .public_url
            .or_else(|| lookup("SHAREME_PUBLIC_URL"))
            .unwrap_or_else(|| {
                let visible = match host.as_str() {
                    "0.0.0.0" | "::" => "localhost",
                    other => other,
                };
                format!("http://{}:{}", visible, port)
            });
        let valid_period_ms = match args.valid_period_ms {
            Some(ms) => ms,
            None => parse_env(&lookup, "SHAREME_VALID_PERIOD_MS")?.unwrap_or(DEFAULT_VALID_PERIOD_MS),
        };
        if valid_period_ms <= 0 {
            anyhow::bail!("share lifetime must be positive, got {} ms", valid_period_ms);
        }
        let sweep_interval_secs = match args.sweep_interval_secs {
            Some(secs) => secs,
            None => parse_env(&lookup, "SHAREME_SWEEP_INTERVAL_SECS")?.unwrap_or(3600),
        };
        let admin_token = args
            .admin_token
            .or_else(|| lookup("SHAREME_ADMIN_TOKEN"))
            .filter(|token| !token.trim().is_empty());
        let max_upload_bytes = match args.max_upload_bytes {
            Some(bytes) => bytes,
            None => parse_env(&lookup, "SHAREME_MAX_UPLOAD_BYTES")?.unwrap_or(32 * 1024 * 1024),
        };

        Ok(Self {
            host,
            port,
            storage_dir,
            database_url,
            public_url: public_url.trim_end_matches('/').to_string(),
            valid_period_ms,
            sweep_interval_secs,
            admin_token,
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}
