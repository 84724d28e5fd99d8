//! TLS options for broker connections
//!
//! The options are carried on a [`ConnectionDescriptor`](crate::ConnectionDescriptor).
//! A non-empty set of options means the caller wants an encrypted transport,
//! which restricts backend selection to the TLS-capable AMQP backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// TLS options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Path to CA certificate file (PEM format)
    /// Used for verifying the broker certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Path to client certificate file (PEM format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// Path to private key file (PEM format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    /// Skip certificate verification (INSECURE - only for development)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_verify: bool,

    /// Server name for SNI (Server Name Indication)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Unrecognized options, passed through untouched
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TlsOptions {
    /// Create TLS options verifying the broker against a CA file
    pub fn with_ca(ca_cert: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert: Some(ca_cert.into()),
            ..Default::default()
        }
    }

    /// Create TLS options with a client certificate (mutual TLS)
    pub fn mtls(
        ca_cert: impl Into<PathBuf>,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca_cert: Some(ca_cert.into()),
            cert: Some(cert.into()),
            key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Set a pass-through option
    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// True when no option at all is set, i.e. the caller did not ask for TLS
    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_none()
            && self.cert.is_none()
            && self.key.is_none()
            && !self.skip_verify
            && self.server_name.is_none()
            && self.extra.is_empty()
    }

    /// Check if a client certificate is configured
    pub fn is_mtls(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), TlsConfigError> {
        if self.cert.is_some() != self.key.is_some() {
            return Err(TlsConfigError::MissingCertOrKey);
        }

        for path in [&self.ca_cert, &self.cert, &self.key].into_iter().flatten() {
            if !path.exists() {
                return Err(TlsConfigError::FileNotFound(path.clone()));
            }
        }

        Ok(())
    }

    /// Read the CA chain, if one is configured
    pub fn read_ca_chain(&self) -> Result<Option<String>, TlsConfigError> {
        match &self.ca_cert {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .map_err(|e| TlsConfigError::InvalidCertificate(format!("{}: {}", path.display(), e))),
            None => Ok(None),
        }
    }

    /// Convert an AMQP URL to its TLS form
    pub fn apply_to_url(&self, url: &str) -> String {
        match url.strip_prefix("amqp://") {
            Some(rest) => format!("amqps://{}", rest),
            None => url.to_string(),
        }
    }
}

/// TLS configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("TLS requires both cert and key, or neither")]
    MissingCertOrKey,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
}

impl From<TlsConfigError> for crate::Error {
    fn from(err: TlsConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}
