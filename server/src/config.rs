//! Server configuration (spec §6).
//!
//! Read from a TOML file; the path defaults to `./cdpd.toml` but can be
//! overridden with `CDPD_CONFIG`. Secrets (`access_key`, `secret_key`, `key`)
//! may also come from the environment so they don't need to sit in a file
//! that gets checked into version control.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid port {0}: must be in 1025..=65534")]
    InvalidPort(u16),
}

#[derive(Debug, Clone, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "mongodb")]
    MongoDb,
    #[serde(rename = "minio")]
    Minio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    pub backend_meta: BackendKind,
    pub backend_data: BackendKind,
    /// Hosts to enumerate for `cdpd-server export`; the dedup/backend core
    /// has no host registry of its own (spec §3 treats `host` as an opaque
    /// client-supplied field), so the export path needs this to know what
    /// to walk.
    #[serde(default)]
    pub known_hosts: Option<Vec<String>>,
}

fn default_port() -> u16 {
    8420
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MinioBackendSection {
    pub hostname: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket_data: Option<String>,
    pub bucket_filemeta: Option<String>,
    #[serde(default)]
    pub add_missing_bucket: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MongoDbBackendSection {
    pub host: Option<String>,
    #[serde(default = "default_mongo_port")]
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub key: Option<String>,
    #[serde(default)]
    pub hash_base64: bool,
}

fn default_mongo_port() -> u16 {
    27017
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileBackendSection {
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    #[serde(default)]
    pub minio_backend: MinioBackendSection,
    #[serde(default)]
    pub mongodb_backend: MongoDbBackendSection,
    #[serde(default)]
    pub file_backend: FileBackendSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        std::env::var("CDPD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("cdpd.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MINIO_ACCESS_KEY") {
            self.minio_backend.access_key = Some(v);
        }
        if let Ok(v) = std::env::var("MINIO_SECRET_KEY") {
            self.minio_backend.secret_key = Some(v);
        }
        if let Ok(v) = std::env::var("MONGODB_KEY") {
            self.mongodb_backend.key = Some(v);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1025..=65534).contains(&self.server.port) {
            return Err(ConfigError::InvalidPort(self.server.port));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_config() {
        let f = write_config(
            r#"
            [server]
            port = 8420
            backend_meta = "file"
            backend_data = "file"
            "#,
        );
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.server.port, 8420);
    }

    #[test]
    fn rejects_out_of_range_port() {
        let f = write_config(
            r#"
            [server]
            port = 80
            backend_meta = "file"
            backend_data = "file"
            "#,
        );
        assert!(matches!(
            Config::load(f.path()),
            Err(ConfigError::InvalidPort(80))
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = Config::load(Path::new("/nonexistent/cdpd.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
