//! Gateway configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use datastream_core::{Error, Result, DEFAULT_SYNC_INTERVAL};

/// Default capacity of the background error conduit.
pub const DEFAULT_ERROR_CAPACITY: usize = 64;

/// Which backend family serves the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Git repository, local or cloned.
    Git,
    /// S3-compatible bucket.
    S3,
    /// SQLite database file.
    Sqlite,
    /// PostgreSQL database.
    Postgres,
}

/// Datastream HTTP/JSON Gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "datastream-gateway")]
#[command(about = "HTTP/JSON gateway for datastream backends")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Backend serving the keys.
    #[arg(short, long, value_enum)]
    pub backend: BackendKind,

    /// Repository path or URL (git).
    #[arg(long)]
    pub repo: Option<String>,

    /// Directory to clone a remote repository into (git).
    #[arg(long)]
    pub clone_dir: Option<PathBuf>,

    /// Branch to track (git).
    #[arg(long)]
    pub branch: Option<String>,

    /// Basic auth username (git).
    #[arg(long)]
    pub username: Option<String>,

    /// Basic auth password or token (git).
    #[arg(long)]
    pub password: Option<String>,

    /// Endpoint URL, e.g. a MinIO server (s3).
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Bucket region (s3).
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Bucket name (s3).
    #[arg(long)]
    pub bucket: Option<String>,

    /// Access key id (s3).
    #[arg(long)]
    pub access_key_id: Option<String>,

    /// Secret access key (s3).
    #[arg(long)]
    pub secret_access_key: Option<String>,

    /// Allow plain-HTTP endpoints (s3).
    #[arg(long)]
    pub allow_http: bool,

    /// Database file path (sqlite) or connection URL (postgres).
    #[arg(long)]
    pub database: Option<String>,

    /// Table holding the keys (sqlite, postgres).
    #[arg(long, default_value = "data")]
    pub table: String,

    /// Seconds between two poll passes.
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL.as_secs())]
    pub sync_interval_secs: u64,

    /// Emit current values when a subscription starts.
    #[arg(long)]
    pub initial_snapshot: bool,

    /// Number of unread background errors kept before new ones are dropped.
    #[arg(long, default_value_t = DEFAULT_ERROR_CAPACITY)]
    pub error_capacity: usize,
}

/// Backend selection with the options each family needs.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSettings {
    /// Git repository.
    Git {
        repo: String,
        clone_dir: Option<PathBuf>,
        branch: Option<String>,
        username: Option<String>,
        password: Option<String>,
    },
    /// S3-compatible bucket.
    S3 {
        endpoint: Option<String>,
        region: String,
        bucket: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
    /// SQLite database file.
    Sqlite { path: PathBuf, table: String },
    /// PostgreSQL database.
    Postgres { url: String, table: String },
}

impl BackendSettings {
    /// Backend family.
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSettings::Git { .. } => BackendKind::Git,
            BackendSettings::S3 { .. } => BackendKind::S3,
            BackendSettings::Sqlite { .. } => BackendKind::Sqlite,
            BackendSettings::Postgres { .. } => BackendKind::Postgres,
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Backend serving the keys.
    pub backend: BackendSettings,
    /// Delay between two poll passes.
    pub sync_interval: Duration,
    /// Emit current values when a subscription starts.
    pub initial_snapshot: bool,
    /// Capacity of the background error conduit.
    pub error_capacity: usize,
}

fn required(value: &Option<String>, flag: &str, kind: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| Error::Config(format!("--{} is required for the {} backend", flag, kind)))
}

impl TryFrom<&Args> for GatewayConfig {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self> {
        let backend = match args.backend {
            BackendKind::Git => BackendSettings::Git {
                repo: required(&args.repo, "repo", "git")?,
                clone_dir: args.clone_dir.clone(),
                branch: args.branch.clone(),
                username: args.username.clone(),
                password: args.password.clone(),
            },
            BackendKind::S3 => BackendSettings::S3 {
                endpoint: args.endpoint.clone(),
                region: args.region.clone(),
                bucket: required(&args.bucket, "bucket", "s3")?,
                access_key_id: args.access_key_id.clone(),
                secret_access_key: args.secret_access_key.clone(),
                allow_http: args.allow_http,
            },
            BackendKind::Sqlite => BackendSettings::Sqlite {
                path: PathBuf::from(required(&args.database, "database", "sqlite")?),
                table: args.table.clone(),
            },
            BackendKind::Postgres => BackendSettings::Postgres {
                url: required(&args.database, "database", "postgres")?,
                table: args.table.clone(),
            },
        };

        Ok(Self {
            listen_addr: args.listen.clone(),
            backend,
            sync_interval: Duration::from_secs(args.sync_interval_secs),
            initial_snapshot: args.initial_snapshot,
            error_capacity: args.error_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("datastream-gateway").chain(args.iter().copied()))
    }

    #[test]
    fn test_git_args() {
        let args = parse(&["--backend", "git", "--repo", "/srv/settings", "--branch", "main"]);
        let config = GatewayConfig::try_from(&args).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.error_capacity, DEFAULT_ERROR_CAPACITY);
        assert_eq!(
            config.backend,
            BackendSettings::Git {
                repo: "/srv/settings".to_string(),
                clone_dir: None,
                branch: Some("main".to_string()),
                username: None,
                password: None,
            }
        );
    }

    #[test]
    fn test_s3_args() {
        let args = parse(&[
            "--backend",
            "s3",
            "--bucket",
            "settings",
            "--endpoint",
            "http://localhost:9000",
            "--allow-http",
            "--sync-interval-secs",
            "1",
        ]);
        let config = GatewayConfig::try_from(&args).unwrap();

        assert_eq!(config.backend.kind(), BackendKind::S3);
        assert_eq!(config.sync_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_required_option() {
        let args = parse(&["--backend", "sqlite"]);
        let err = GatewayConfig::try_from(&args).unwrap_err();
        assert_eq!(
            err,
            Error::Config("--database is required for the sqlite backend".to_string())
        );
    }

    #[test]
    fn test_relational_args() {
        let args = parse(&["--backend", "sqlite", "--database", "settings.db", "--table", "kv"]);
        let config = GatewayConfig::try_from(&args).unwrap();
        assert_eq!(
            config.backend,
            BackendSettings::Sqlite {
                path: PathBuf::from("settings.db"),
                table: "kv".to_string(),
            }
        );
    }
}
