//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::cleanup::CleanupPolicy;

/// Largest page size the Atlas list endpoints accept.
pub const MAX_ITEMS_PER_PAGE: u32 = 500;

/// Atlas connection settings derived from defaults, configuration files,
/// environment variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MONGODB_ATLAS",
    discovery(
        app_name = "driftless",
        env_var = "DRIFTLESS_CONFIG_PATH",
        config_file_name = "driftless.toml",
        dotfile_name = ".driftless.toml",
        project_file_name = "driftless.toml"
    )
)]
pub struct AtlasConfig {
    /// Base URL of the Atlas Administration API.
    #[ortho_config(default = "https://cloud.mongodb.com".to_owned())]
    pub base_url: String,
    /// Bearer token used for authentication. This value is required.
    pub access_token: String,
    /// Page size used by list-and-find reads.
    #[ortho_config(default = 100)]
    pub items_per_page: u32,
    /// Per-request HTTP timeout in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// Delete half-created entities when a create wait times out.
    #[ortho_config(default = true)]
    pub delete_on_create_timeout: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [atlas] in driftless.toml",
            self.env_var, self.toml_key
        )
    }
}

const ACCESS_TOKEN: FieldMetadata = FieldMetadata::new(
    "Atlas access token",
    "MONGODB_ATLAS_ACCESS_TOKEN",
    "access_token",
);
const BASE_URL: FieldMetadata =
    FieldMetadata::new("Atlas base URL", "MONGODB_ATLAS_BASE_URL", "base_url");
const ITEMS_PER_PAGE: FieldMetadata = FieldMetadata::new(
    "page size",
    "MONGODB_ATLAS_ITEMS_PER_PAGE",
    "items_per_page",
);
const REQUEST_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "request timeout",
    "MONGODB_ATLAS_REQUEST_TIMEOUT_SECS",
    "request_timeout_secs",
);

impl AtlasConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("driftless")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Cleanup policy applied to create waits.
    #[must_use]
    pub fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy::new(self.delete_on_create_timeout)
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty and
    /// [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(&self.access_token, &ACCESS_TOKEN)?;
        require_field(&self.base_url, &BASE_URL)?;

        let url = Url::parse(&self.base_url)
            .map_err(|err| invalid(&BASE_URL, &format!("'{}' ({err})", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(
                &BASE_URL,
                &format!("'{}' must use http or https", self.base_url),
            ));
        }
        if self.items_per_page == 0 || self.items_per_page > MAX_ITEMS_PER_PAGE {
            return Err(invalid(
                &ITEMS_PER_PAGE,
                &format!(
                    "{} is outside 1..={MAX_ITEMS_PER_PAGE}",
                    self.items_per_page
                ),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid(&REQUEST_TIMEOUT, "must be greater than zero"));
        }
        Ok(())
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: {}",
            metadata.description,
            metadata.hint()
        )));
    }
    Ok(())
}

fn invalid(metadata: &FieldMetadata, detail: &str) -> ConfigError {
    ConfigError::Invalid(format!(
        "invalid {} {detail}: {}",
        metadata.description,
        metadata.hint()
    ))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
