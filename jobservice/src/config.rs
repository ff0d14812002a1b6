//! Job service configuration.
//!
//! ```toml
//! [core]
//! url = "http://core:8080"
//! secret = "..."            # or set JOBSERVICE_SECRET
//!
//! [replication]
//! chunk-size = 10485760
//! ```

use api_client::internal::InternalEndpointError;
use api_client::InternalEndpoint;
use camino::{Utf8Path, Utf8PathBuf};
use replication::transfer::DEFAULT_CHUNK_SIZE;
use secret::Secret;
use serde::Deserialize;

/// Environment variable consulted when no secret is configured.
pub const SECRET_ENV: &str = "JOBSERVICE_SECRET";

const DEFAULT_CORE_URL: &str = "http://core:8080";

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}")]
    Read {
        /// File that failed to read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("invalid configuration")]
    Parse(#[from] toml_edit::de::Error),

    /// The core URL is not a usable endpoint.
    #[error("core endpoint")]
    Endpoint(#[from] InternalEndpointError),

    /// Neither the file nor the environment provides a core secret.
    #[error("no core secret configured and {SECRET_ENV} is not set")]
    MissingSecret,
}

/// Top level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Core service connection.
    #[serde(default)]
    pub core: CoreConfig,
    /// Replication tuning.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Where the core service lives and how to authenticate to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CoreConfig {
    /// Base URL of the core service.
    #[serde(default = "default_core_url")]
    pub url: String,
    /// Shared secret. Falls back to the environment when absent.
    #[serde(default)]
    pub secret: Option<Secret>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            url: default_core_url(),
            secret: None,
        }
    }
}

fn default_core_url() -> String {
    DEFAULT_CORE_URL.to_owned()
}

/// Replication tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Blobs larger than this many bytes are copied in chunks.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

impl Config {
    /// Parse configuration from TOML source.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(source)?)
    }

    /// Read and parse the TOML file at `path`.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&source)
    }

    /// The core service secret, from the file or the environment.
    pub fn secret(&self) -> Result<Secret, ConfigError> {
        match &self.core.secret {
            Some(secret) => Ok(secret.clone()),
            None => Secret::from_env(SECRET_ENV).map_err(|_| ConfigError::MissingSecret),
        }
    }

    /// The internal endpoint adapters use to reach the core service.
    pub fn endpoint(&self) -> Result<InternalEndpoint, ConfigError> {
        let secret = self.secret()?;
        Ok(InternalEndpoint::new(self.core.url.as_str(), secret)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = Config::from_toml("[core]\nsecret = \"s3cret\"\n").unwrap();
        assert_eq!(config.core.url, DEFAULT_CORE_URL);
        assert_eq!(config.replication.chunk_size, DEFAULT_CHUNK_SIZE);

        let endpoint = config.endpoint().unwrap();
        assert_eq!(endpoint.url().host(), Some("core"));
        assert_eq!(endpoint.secret().revealed(), "s3cret");
    }

    #[test]
    fn keys_are_kebab_case() {
        let config = Config::from_toml("[replication]\nchunk-size = 1024\n").unwrap();
        assert_eq!(config.replication.chunk_size, 1024);
        assert!(Config::from_toml("[replication]\nchunk_size = 1024\n").is_err());
    }

    #[test]
    fn relative_core_url_is_rejected() {
        let config = Config::from_toml("[core]\nurl = \"core\"\nsecret = \"s\"\n").unwrap();
        assert!(matches!(config.endpoint(), Err(ConfigError::Endpoint(_))));
    }
}
