use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub database_url: String,
    pub bucket: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Per-user cloud file storage API")]
pub struct Args {
    /// Host to bind to (overrides CLOUD_STORAGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CLOUD_STORAGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides CLOUD_STORAGE_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Database URL (overrides CLOUD_STORAGE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket holding every user's files (overrides CLOUD_STORAGE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI args over the environment and defaults.
    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("CLOUD_STORAGE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("CLOUD_STORAGE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CLOUD_STORAGE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 8080,
            Err(err) => return Err(err).context("reading CLOUD_STORAGE_PORT"),
        };
        let env_data_dir =
            env::var("CLOUD_STORAGE_DATA_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("CLOUD_STORAGE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/cloud_storage.db".into());
        let env_bucket = env::var("CLOUD_STORAGE_BUCKET").unwrap_or_else(|_| "user-files".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_dir: args.data_dir.unwrap_or(env_data_dir),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arguments_take_precedence() {
        let args = Args::parse_from([
            "cloud-storage",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--data-dir",
            "/tmp/objects",
            "--database-url",
            "sqlite::memory:",
            "--bucket",
            "team-files",
            "--migrate",
        ]);

        let (cfg, migrate) = AppConfig::from_args(args).unwrap();
        assert!(migrate);
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.data_dir, "/tmp/objects");
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.bucket, "team-files");
    }
}
