//! Credential material and where it comes from

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// An API key or token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a raw credential value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value, e.g. to build an authorization header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Where a slot's credential is read from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Endpoint needs no credential (local deployments, simulators)
    #[default]
    None,
    /// Read from the named environment variable at resolve time
    Env(String),
}

impl CredentialSource {
    /// Resolve the credential. `None` sources resolve to `Ok(None)`.
    pub fn resolve(&self) -> Result<Option<Secret>, RegistryError> {
        match self {
            CredentialSource::None => Ok(None),
            CredentialSource::Env(var) => std::env::var(var)
                .map(|value| Some(Secret::new(value)))
                .map_err(|_| RegistryError::MissingSecret(var.clone())),
        }
    }
}
