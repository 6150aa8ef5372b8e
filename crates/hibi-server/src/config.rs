//! Server configuration.
//!
//! Layered, lowest precedence first: built-in defaults, an optional TOML file,
//! then [`ConfigOverrides`], which clap fills from command-line flags or their
//! `HIBI_*` environment variables.
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! port = 4780
//! database = "/var/lib/hibi/hibi.db"
//! keepalive_secs = 30
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_DB_FILE, DEFAULT_PORT, MEMORY_DATABASE, SSE_KEEPALIVE_INTERVAL,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bind address {0}")]
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// SQLite file. `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    pub keepalive_secs: u64,
}

/// Per-invocation settings. Each one is a flag with a `HIBI_*` environment
/// fallback; unset ones leave the loaded config alone.
#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Bind address
    #[arg(long, env = "HIBI_BIND_ADDRESS")]
    pub bind: Option<String>,

    /// HTTP port
    #[arg(long, short, env = "HIBI_PORT")]
    pub port: Option<u16>,

    /// SQLite database file, or `:memory:`
    #[arg(long, env = "HIBI_DATABASE")]
    pub database: Option<PathBuf>,

    /// Keep everything in memory
    #[arg(long)]
    pub memory: bool,

    /// Event stream heartbeat interval in seconds
    #[arg(
        long,
        env = "HIBI_KEEPALIVE_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub keepalive: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            database: Some(Self::default_database_path()),
            keepalive_secs: SSE_KEEPALIVE_INTERVAL.as_secs(),
        }
    }
}

impl ServerConfig {
    /// Defaults suitable for tests: in-memory store, ephemeral port.
    pub fn ephemeral() -> Self {
        Self { port: 0, database: None, ..Self::default() }
    }

    /// Default database location (~/.local/share/hibi/hibi.db on Linux).
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hibi")
            .join(DEFAULT_DB_FILE)
    }

    /// Read a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Defaults, then `path` if given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Layer flag and environment values over whatever was loaded.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(bind) = overrides.bind {
            self.bind_address = bind;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(database) = overrides.database {
            self.database = (database.as_os_str() != MEMORY_DATABASE).then_some(database);
        }
        if overrides.memory {
            self.database = None;
        }
        if let Some(secs) = overrides.keepalive {
            self.keepalive_secs = secs;
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        addr.parse().map_err(|_| ConfigError::Address(addr))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};
    use std::io::Write;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        overrides: ConfigOverrides,
    }

    fn parse(args: &[&str]) -> Result<ConfigOverrides, clap::Error> {
        Cli::try_parse_from(std::iter::once("hibi-server").chain(args.iter().copied()))
            .map(|cli| cli.overrides)
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.keepalive(), SSE_KEEPALIVE_INTERVAL);
        assert!(config.database.unwrap().ends_with(DEFAULT_DB_FILE));
    }

    #[test]
    fn test_file_keeps_unset_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 9000\nkeepalive_secs = 5").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.keepalive_secs, 5);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(matches!(ServerConfig::from_file(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides_beat_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 9000\nbind_address = \"10.0.0.1\"").unwrap();
        let mut config = ServerConfig::load(Some(file.path())).unwrap();

        config.apply(parse(&["--port", "8081", "--database", ":memory:"]).unwrap());
        assert_eq!(config.port, 8081);
        assert_eq!(config.database, None);
        assert_eq!(config.socket_addr().unwrap().to_string(), "10.0.0.1:8081");
    }

    #[test]
    fn test_no_overrides_keep_loaded_values() {
        let mut config = ServerConfig::ephemeral();
        config.apply(ConfigOverrides::default());
        assert_eq!(config, ServerConfig::ephemeral());

        let mut config = ServerConfig::default();
        config.apply(parse(&["--memory"]).unwrap());
        assert_eq!(config.database, None);
    }

    #[test]
    fn test_overrides_reject_garbage() {
        assert!(parse(&["--port", "eighty"]).is_err());
        assert!(parse(&["--keepalive", "0"]).is_err());
        assert_eq!(parse(&["--keepalive", "5"]).unwrap().keepalive, Some(5));
    }

    #[test]
    fn test_overrides_read_hibi_env() {
        let cmd = Cli::command();
        let env_of = |id: &str| {
            cmd.get_arguments()
                .find(|a| a.get_id() == id)
                .and_then(|a| a.get_env())
                .map(|v| v.to_string_lossy().into_owned())
        };
        assert_eq!(env_of("bind").as_deref(), Some("HIBI_BIND_ADDRESS"));
        assert_eq!(env_of("port").as_deref(), Some("HIBI_PORT"));
        assert_eq!(env_of("database").as_deref(), Some("HIBI_DATABASE"));
        assert_eq!(env_of("keepalive").as_deref(), Some("HIBI_KEEPALIVE_SECS"));
        assert_eq!(env_of("memory"), None);
    }
}
