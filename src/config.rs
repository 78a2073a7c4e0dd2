//! Process-wide settings for the interceptor.
//!
//! Settings are read once from a YAML file (every section optional) and
//! validated before any request is intercepted. The hostname override table
//! itself lives in a separate flat file, see [`crate::overrides`].

use crate::error::{InterceptError, Result};
use crate::transport::{Credentials, TlsPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interception section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterceptionConfig {
    /// Apply hostname overrides to outgoing requests.
    pub enabled: bool,

    /// Path to the flat `host = destination[,hostHeader]` file.
    pub overrides_file: PathBuf,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overrides_file: PathBuf::from("dns.cfg"),
        }
    }
}

/// Per-request network behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Abort a request that hasn't finished after this many milliseconds.
    /// Zero disables the timeout.
    pub resource_timeout_ms: u64,

    /// Authentication challenges answered before giving up.
    pub max_auth_attempts: u32,

    /// Headers added to every request, overriding same-named ones.
    pub custom_headers: BTreeMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            resource_timeout_ms: 0,
            max_auth_attempts: 3,
            custom_headers: BTreeMap::new(),
        }
    }
}

impl NetworkConfig {
    /// The resource timeout, if one is configured.
    pub fn resource_timeout(&self) -> Option<Duration> {
        (self.resource_timeout_ms > 0).then(|| Duration::from_millis(self.resource_timeout_ms))
    }
}

/// HTTP authentication credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Allowed TLS protocol versions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "tlsv1")]
    Tlsv1,
    #[serde(rename = "tlsv1.2")]
    Tlsv1_2,
    #[serde(rename = "tlsv1.3")]
    Tlsv1_3,
}

/// SSL/TLS configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SslConfig {
    /// Accept invalid/self-signed certificates.
    pub ignore_errors: bool,

    /// Protocol version to negotiate.
    pub protocol: TlsVersion,

    /// PEM file or directory with additional CA certificates.
    pub certificates_path: Option<PathBuf>,
}

impl SslConfig {
    /// The policy attached to outgoing requests.
    pub fn policy(&self) -> TlsPolicy {
        TlsPolicy {
            verify_peer: !self.ignore_errors,
            protocol: self.protocol,
            ca_certificates: self.certificates_path.clone(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Output destination: stdout, stderr, or file path.
    pub output: String,

    /// Log format.
    pub format: LogFormat,

    /// Include target (module path) in logs.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stderr".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

/// Root settings structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub interception: InterceptionConfig,
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub ssl: SslConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(InterceptError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parses and validates settings from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(contents)
            .map_err(|e| InterceptError::config_parse(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<()> {
        if self.interception.enabled && self.interception.overrides_file.as_os_str().is_empty() {
            return Err(InterceptError::config_validation(
                "Overrides file cannot be empty when interception is enabled",
            ));
        }

        for name in self.network.custom_headers.keys() {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(InterceptError::config_validation(format!(
                    "Invalid custom header name: '{}'",
                    name
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(InterceptError::config_validation(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }
}
