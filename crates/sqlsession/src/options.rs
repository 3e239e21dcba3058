//! Session factory configuration.
//!
//! A factory needs a provider and a connection string for the session name it
//! serves. [`SessionOptionsSource`] resolves those per name; a single
//! [`SessionOptions`] serves only the default name, [`NamedSessionOptions`]
//! serves any number of names. [`ConnectionSettings`] is the serde shape for
//! loading connection strings from a settings document.

use serde::{Deserialize, Serialize};
use sqlsession_core::error::ConfigError;
use sqlsession_core::{Error, ProviderFactory, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Provider and connection string for one session name.
pub struct SessionOptions<P: ProviderFactory> {
    provider: Arc<P>,
    connection_string: String,
}

impl<P: ProviderFactory> Clone for SessionOptions<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            connection_string: self.connection_string.clone(),
        }
    }
}

impl<P: ProviderFactory> std::fmt::Debug for SessionOptions<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("provider", &self.provider.name())
            .field("connection_string", &self.connection_string)
            .finish()
    }
}

impl<P: ProviderFactory> SessionOptions<P> {
    /// Fails with an invalid-argument error on an empty connection string.
    #[allow(clippy::result_large_err)]
    pub fn new(provider: Arc<P>, connection_string: impl Into<String>) -> Result<Self> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(Error::invalid_argument("connection_string"));
        }
        Ok(Self {
            provider,
            connection_string,
        })
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Resolves options for a session name (`None` is the default session).
pub trait SessionOptionsSource<P: ProviderFactory>: Send + Sync {
    fn resolve(&self, name: Option<&str>) -> Option<SessionOptions<P>>;
}

impl<P: ProviderFactory> SessionOptionsSource<P> for SessionOptions<P> {
    fn resolve(&self, name: Option<&str>) -> Option<SessionOptions<P>> {
        match name {
            None => Some(self.clone()),
            Some(_) => None,
        }
    }
}

/// Name to options registry.
pub struct NamedSessionOptions<P: ProviderFactory> {
    default: Option<SessionOptions<P>>,
    named: HashMap<String, SessionOptions<P>>,
}

impl<P: ProviderFactory> Default for NamedSessionOptions<P> {
    fn default() -> Self {
        Self {
            default: None,
            named: HashMap::new(),
        }
    }
}

impl<P: ProviderFactory> NamedSessionOptions<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the options for the default session.
    #[must_use]
    pub fn with_default(mut self, options: SessionOptions<P>) -> Self {
        self.default = Some(options);
        self
    }

    /// Set the options for a named session.
    #[must_use]
    pub fn with_named(mut self, name: impl Into<String>, options: SessionOptions<P>) -> Self {
        self.named.insert(name.into(), options);
        self
    }

    /// Build a registry where every entry of `settings` uses `provider`.
    #[allow(clippy::result_large_err)]
    pub fn from_settings(provider: Arc<P>, settings: &ConnectionSettings) -> Result<Self> {
        let mut options = Self::new();
        if let Some(default) = &settings.default {
            options = options.with_default(SessionOptions::new(Arc::clone(&provider), default)?);
        }
        for (name, connection_string) in &settings.named {
            options = options.with_named(
                name.clone(),
                SessionOptions::new(Arc::clone(&provider), connection_string)?,
            );
        }
        Ok(options)
    }

    /// Names configured besides the default.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<P: ProviderFactory> SessionOptionsSource<P> for NamedSessionOptions<P> {
    fn resolve(&self, name: Option<&str>) -> Option<SessionOptions<P>> {
        match name {
            None => self.default.clone(),
            Some(name) => self.named.get(name).cloned(),
        }
    }
}

/// Connection strings as found in a settings document.
///
/// ```json
/// { "default": "app.db", "named": { "reports": "path=reports.db;mode=ro" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub named: BTreeMap<String, String>,
}

impl ConnectionSettings {
    /// Parse a JSON settings document.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid connection settings: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Connection string for a session name.
    pub fn get(&self, name: Option<&str>) -> Option<&str> {
        match name {
            None => self.default.as_deref(),
            Some(name) => self.named.get(name).map(String::as_str),
        }
    }
}
