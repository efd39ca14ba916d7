//! Store Configuration
//!
//! [`StoreConfig`] selects and parameterizes a store engine. It can be read
//! from a JSON file or from `DOCSTORE_*` environment variables:
//!
//! | Variable                  | Field             |
//! |---------------------------|-------------------|
//! | `DOCSTORE_BACKEND`        | `backend`         |
//! | `DOCSTORE_DB_PATH`        | `database_path`   |
//! | `DOCSTORE_IN_MEMORY`      | `in_memory`       |
//! | `DOCSTORE_NAMESPACE`      | `namespace`       |
//! | `DOCSTORE_DATABASE`       | `database`        |
//! | `DOCSTORE_BUSY_TIMEOUT_MS`| `busy_timeout_ms` |
//! | `DOCSTORE_ENCRYPTION_KEY` | `encryption_key`  |

use crate::crypto::{AesFieldCipher, CryptoError, FieldCipher};
use crate::db::{
    RecordStore, SqlStore, StoreError, SurrealStore, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE,
    DEFAULT_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Storage engine selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// libsql, one table per record type
    #[default]
    Sql,
    /// Embedded SurrealDB, one document per aggregate
    Surreal,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" | "sqlite" | "libsql" => Ok(Self::Sql),
            "surreal" | "surrealdb" => Ok(Self::Surreal),
            other => Err(ConfigError::InvalidValue {
                key: "backend".to_string(),
                message: format!("unknown backend '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub database_path: Option<PathBuf>,
    /// Document store only
    pub in_memory: bool,
    pub namespace: String,
    pub database: String,
    pub busy_timeout_ms: u64,
    /// Base64 master key for field encryption
    pub encryption_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sql,
            database_path: None,
            in_memory: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            encryption_key: None,
        }
    }
}

impl StoreConfig {
    /// Read and validate a JSON config file; missing keys take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `DOCSTORE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(backend) = lookup("DOCSTORE_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Some(path) = lookup("DOCSTORE_DB_PATH") {
            tracing::info!("Using database path from DOCSTORE_DB_PATH: {}", path);
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup("DOCSTORE_IN_MEMORY") {
            config.in_memory = parse_flag("DOCSTORE_IN_MEMORY", &flag)?;
        }
        if let Some(namespace) = lookup("DOCSTORE_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = lookup("DOCSTORE_DATABASE") {
            config.database = database;
        }
        if let Some(timeout) = lookup("DOCSTORE_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms =
                timeout
                    .trim()
                    .parse()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "DOCSTORE_BUSY_TIMEOUT_MS".to_string(),
                        message: format!("{}", e),
                    })?;
        }
        if let Some(key) = lookup("DOCSTORE_ENCRYPTION_KEY") {
            config.encryption_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.backend, self.in_memory, &self.database_path) {
            (Backend::Sql, true, _) => {
                return Err(ConfigError::Invalid(
                    "the sql backend has no in-memory mode".to_string(),
                ))
            }
            (_, false, None) => {
                return Err(ConfigError::Invalid(
                    "database_path is required unless in_memory is set".to_string(),
                ))
            }
            _ => {}
        }

        if self.backend == Backend::Surreal {
            if self.namespace.trim().is_empty() {
                return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
            }
            if self.database.trim().is_empty() {
                return Err(ConfigError::Invalid("database must not be empty".to_string()));
            }
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }

        // Surface bad key material at load time rather than on first write
        self.cipher()?;
        Ok(())
    }

    /// Field cipher for the configured key, if any
    pub fn cipher(&self) -> Result<Option<Arc<dyn FieldCipher>>, ConfigError> {
        match &self.encryption_key {
            Some(key) => {
                let cipher = AesFieldCipher::from_base64(key)?;
                Ok(Some(Arc::new(cipher)))
            }
            None => Ok(None),
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// Open the store engine `config` selects
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>, ConfigError> {
    config.validate()?;

    let store: Arc<dyn RecordStore> = match config.backend {
        Backend::Sql => {
            let path = config
                .database_path
                .clone()
                .ok_or_else(|| ConfigError::Invalid("database_path is required".to_string()))?;
            Arc::new(SqlStore::with_busy_timeout(path, config.busy_timeout_ms).await?)
        }
        Backend::Surreal if config.in_memory => {
            Arc::new(SurrealStore::open_in_memory(&config.namespace, &config.database).await?)
        }
        Backend::Surreal => {
            let path = config
                .database_path
                .clone()
                .ok_or_else(|| ConfigError::Invalid("database_path is required".to_string()))?;
            Arc::new(SurrealStore::open(path, &config.namespace, &config.database).await?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("DOCSTORE_BACKEND", "SurrealDB"),
            ("DOCSTORE_IN_MEMORY", "true"),
            ("DOCSTORE_NAMESPACE", "tenant_a"),
        ]))
        .unwrap();

        assert_eq!(config.backend, Backend::Surreal);
        assert!(config.in_memory);
        assert_eq!(config.namespace, "tenant_a");
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_env_values_are_reported_by_key() {
        let err = StoreConfig::from_lookup(lookup(&[
            ("DOCSTORE_DB_PATH", "/tmp/x.db"),
            ("DOCSTORE_BUSY_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DOCSTORE_BUSY_TIMEOUT_MS")
        );

        let err = StoreConfig::from_lookup(lookup(&[("DOCSTORE_BACKEND", "mongo")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_rejects_unusable_combinations() {
        let sql_in_memory = StoreConfig {
            in_memory: true,
            ..StoreConfig::default()
        };
        assert!(sql_in_memory.validate().is_err());

        let no_path = StoreConfig::default();
        assert!(no_path.validate().is_err());

        let bad_key = StoreConfig {
            database_path: Some(PathBuf::from("/tmp/x.db")),
            encryption_key: Some("not base64!".to_string()),
            ..StoreConfig::default()
        };
        assert!(matches!(bad_key.validate(), Err(ConfigError::Crypto(_))));
    }

    #[test]
    fn test_cipher_is_built_from_key() {
        let config = StoreConfig {
            database_path: Some(PathBuf::from("/tmp/x.db")),
            encryption_key: Some(AesFieldCipher::generate_key()),
            ..StoreConfig::default()
        };
        let cipher = config.cipher().unwrap().unwrap();
        let sealed = cipher.encrypt("hello").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hello");
        assert!(StoreConfig::default().cipher().unwrap().is_none());
    }

    #[test]
    fn test_load_reads_partial_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(
            &path,
            r#"{ "backend": "surreal", "database_path": "/data/records", "database": "main" }"#,
        )
        .unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.backend, Backend::Surreal);
        assert_eq!(config.database, "main");
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);

        let missing = StoreConfig::load(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn test_open_store_selects_backend() {
        let dir = TempDir::new().unwrap();
        let sql = open_store(&StoreConfig {
            database_path: Some(dir.path().join("records.db")),
            ..StoreConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(sql.kind(), crate::db::StoreKind::Relational);

        let surreal = open_store(&StoreConfig {
            backend: Backend::Surreal,
            in_memory: true,
            ..StoreConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(surreal.kind(), crate::db::StoreKind::Document);
    }
}
