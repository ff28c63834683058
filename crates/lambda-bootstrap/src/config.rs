//! Runtime configuration

use std::env;
use thiserror::Error;
use url::Url;

/// Environment variable holding the control API `host:port`
pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";

/// Environment variable overriding the control API version path segment
pub const API_VERSION_VAR: &str = "LAMBDA_BOOTSTRAP_API_VERSION";

pub const DEFAULT_API_VERSION: &str = "2018-06-01";

/// Startup precondition failures. Any of these is fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("AWS_LAMBDA_RUNTIME_API is not set")]
    MissingApiAddress,

    #[error("Invalid control API address {address:?}: {reason}")]
    InvalidApiAddress { address: String, reason: String },

    #[error("Invalid control API version {0:?}")]
    InvalidApiVersion(String),
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Control API address as given, e.g. `127.0.0.1:9001`
    pub api_address: String,

    /// Protocol version path segment
    pub api_version: String,

    /// `http://{api_address}/{api_version}/`
    pub api_base: Url,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let address = lookup(RUNTIME_API_VAR)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingApiAddress)?;

        let version = lookup(API_VERSION_VAR)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Self::new(address, version)
    }

    pub fn new(api_address: impl Into<String>, api_version: impl Into<String>) -> Result<Self, ConfigError> {
        let api_address = api_address.into().trim().to_string();
        let api_version = api_version.into().trim().to_string();

        if api_version.is_empty() || api_version.contains('/') {
            return Err(ConfigError::InvalidApiVersion(api_version));
        }

        let invalid = |reason: &str| ConfigError::InvalidApiAddress {
            address: api_address.clone(),
            reason: reason.to_string(),
        };

        if api_address.contains("://") {
            return Err(invalid("expected host:port without a scheme"));
        }

        let mut api_base = Url::parse(&format!("http://{}/", api_address))
            .map_err(|e| invalid(&e.to_string()))?;

        if api_base.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        if api_base.path() != "/" || api_base.query().is_some() || api_base.fragment().is_some() {
            return Err(invalid("expected host:port only"));
        }

        api_base
            .path_segments_mut()
            .map_err(|_| invalid("not a base URL"))?
            .pop_if_empty()
            .push(&api_version)
            .push("");

        Ok(Self {
            api_address,
            api_version,
            api_base,
        })
    }
}
