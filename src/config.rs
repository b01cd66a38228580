use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// In-flight upload bytes (stream temp files and chunk sessions).
    pub temp_dir: PathBuf,
    /// Finalized files.
    pub final_dir: PathBuf,
    pub database_url: String,
    /// `Tus-Resumable` version this server speaks.
    pub tus_version: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for in-progress uploads (overrides UPLOAD_STORE_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Directory for finalized files (overrides UPLOAD_STORE_FINAL_DIR)
    #[arg(long)]
    pub final_dir: Option<PathBuf>,

    /// Database URL (overrides UPLOAD_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Supported tus protocol version (overrides UPLOAD_STORE_TUS_VERSION)
    #[arg(long)]
    pub tus_version: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("UPLOAD_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("UPLOAD_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing UPLOAD_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading UPLOAD_STORE_PORT"),
        };
        let env_temp = env::var("UPLOAD_STORE_TEMP_DIR").unwrap_or_else(|_| "./data/tmp".into());
        let env_final =
            env::var("UPLOAD_STORE_FINAL_DIR").unwrap_or_else(|_| "./data/final".into());
        let env_db = env::var("UPLOAD_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/uploads.db".into());
        let env_tus = env::var("UPLOAD_STORE_TUS_VERSION").unwrap_or_else(|_| "1.0.0".into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            temp_dir: args.temp_dir.unwrap_or_else(|| env_temp.into()),
            final_dir: args.final_dir.unwrap_or_else(|| env_final.into()),
            database_url: args.database_url.unwrap_or(env_db),
            tus_version: args.tus_version.unwrap_or(env_tus),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Filesystem path of a `sqlite://` or `file:` URL, when it names one.
    pub fn database_path(&self) -> Option<PathBuf> {
        let path = self
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(database_url: &str) -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 3000,
            temp_dir: "./tmp".into(),
            final_dir: "./final".into(),
            database_url: database_url.into(),
            tus_version: "1.0.0".into(),
        }
    }

    #[test]
    fn cli_values_take_precedence() {
        let args = Args {
            host: Some("10.0.0.1".into()),
            port: Some(9000),
            final_dir: Some("/srv/final".into()),
            tus_version: Some("1.0.0".into()),
            ..Args::default()
        };
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.addr(), "10.0.0.1:9000");
        assert_eq!(cfg.final_dir, PathBuf::from("/srv/final"));
    }

    #[test]
    fn database_path_from_url() {
        assert_eq!(
            config("sqlite://./data/meta/uploads.db").database_path(),
            Some(PathBuf::from("./data/meta/uploads.db"))
        );
        assert_eq!(
            config("sqlite:///var/lib/up.db?mode=rwc").database_path(),
            Some(PathBuf::from("/var/lib/up.db"))
        );
        assert_eq!(config("sqlite::memory:").database_path(), None);
    }
}
