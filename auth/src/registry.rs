//! Provider and credential-slot lookup

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::secret::CredentialSource;

/// Identifier of a provider (an endpoint family such as one hosting API)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Create a provider id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a credential slot, unique within its provider
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub String);

impl SlotId {
    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlotId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One independently rate-limited channel into a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSlot {
    /// Slot identifier (e.g. "key-1", "eastus-deployment")
    pub id: SlotId,

    /// Base URL or deployment name this slot talks to
    pub endpoint: String,

    /// Where the slot's credential comes from
    #[serde(default)]
    pub credential: CredentialSource,

    /// Declared concurrency ceiling for this slot
    pub max_workers: usize,

    /// Declared requests-per-second ceiling for this slot
    pub max_qps: f64,
}

impl CredentialSlot {
    /// Create a slot without a credential
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: SlotId(id.into()),
            endpoint: endpoint.into(),
            credential: CredentialSource::None,
            max_workers: 4,
            max_qps: 2.0,
        }
    }

    /// Set the credential source
    pub fn with_credential(mut self, credential: CredentialSource) -> Self {
        self.credential = credential;
        self
    }

    /// Set the declared ceilings
    pub fn with_ceiling(mut self, max_workers: usize, max_qps: f64) -> Self {
        self.max_workers = max_workers;
        self.max_qps = max_qps;
        self
    }
}

/// Registry of providers and their credential slots
///
/// Built once, then only read. Slot order is preserved as registered and
/// defines the order in which the shard planner fills slots.
#[derive(Debug, Clone, Default)]
pub struct CredentialRegistry {
    providers: BTreeMap<ProviderId, Vec<CredentialSlot>>,
}

impl CredentialRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a provider -> slots map (the config file shape)
    pub fn from_map(map: BTreeMap<String, Vec<CredentialSlot>>) -> Result<Self, RegistryError> {
        map.into_iter()
            .try_fold(Self::new(), |registry, (provider, slots)| {
                registry.with_provider(provider, slots)
            })
    }

    /// Register a provider with its slots
    pub fn with_provider(
        mut self,
        provider: impl Into<ProviderId>,
        slots: Vec<CredentialSlot>,
    ) -> Result<Self, RegistryError> {
        let provider = provider.into();
        Self::validate_slots(&provider, &slots)?;
        tracing::debug!(provider = %provider, slots = slots.len(), "Registered provider");
        self.providers.insert(provider, slots);
        Ok(self)
    }

    fn validate_slots(provider: &ProviderId, slots: &[CredentialSlot]) -> Result<(), RegistryError> {
        if slots.is_empty() {
            return Err(RegistryError::EmptyProvider(provider.0.clone()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for slot in slots {
            if !seen.insert(&slot.id) {
                return Err(RegistryError::DuplicateSlot {
                    provider: provider.0.clone(),
                    slot: slot.id.0.clone(),
                });
            }
            if slot.max_workers == 0 {
                return Err(RegistryError::InvalidCeiling {
                    provider: provider.0.clone(),
                    slot: slot.id.0.clone(),
                    reason: "max_workers must be at least 1".into(),
                });
            }
            if !slot.max_qps.is_finite() || slot.max_qps <= 0.0 {
                return Err(RegistryError::InvalidCeiling {
                    provider: provider.0.clone(),
                    slot: slot.id.0.clone(),
                    reason: format!("max_qps must be positive, got {}", slot.max_qps),
                });
            }
        }
        Ok(())
    }

    /// Usable slots for a provider, in registration order
    pub fn slots(&self, provider: &ProviderId) -> Result<&[CredentialSlot], RegistryError> {
        self.providers
            .get(provider)
            .map(Vec::as_slice)
            .ok_or_else(|| RegistryError::UnknownProvider(provider.0.clone()))
    }

    /// Look up one slot of a provider
    pub fn slot(&self, provider: &ProviderId, slot: &SlotId) -> Result<&CredentialSlot, RegistryError> {
        self.slots(provider)?
            .iter()
            .find(|s| &s.id == slot)
            .ok_or_else(|| RegistryError::UnknownCredential {
                provider: provider.0.clone(),
                slot: slot.0.clone(),
            })
    }

    /// Check whether a provider is registered
    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.providers.contains_key(provider)
    }

    /// Iterate over registered providers
    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.providers.keys()
    }

    /// Discover a key pool from the environment
    ///
    /// Looks for `PREFIX`, then `PREFIX_2`, `PREFIX_3`, ... and stops at the
    /// first gap. Each variable found becomes its own slot with the given
    /// ceilings. Only the variable names are stored; values are read when the
    /// slot's credential is resolved.
    pub fn discover_key_pool(
        prefix: &str,
        endpoint: &str,
        max_workers: usize,
        max_qps: f64,
    ) -> Vec<CredentialSlot> {
        let mut slots = Vec::new();
        if std::env::var_os(prefix).is_none() {
            return slots;
        }
        slots.push(
            CredentialSlot::new("key-1", endpoint)
                .with_credential(CredentialSource::Env(prefix.to_string()))
                .with_ceiling(max_workers, max_qps),
        );

        let mut index = 2;
        loop {
            let var = format!("{}_{}", prefix, index);
            if std::env::var_os(&var).is_none() {
                break;
            }
            slots.push(
                CredentialSlot::new(format!("key-{}", index), endpoint)
                    .with_credential(CredentialSource::Env(var))
                    .with_ceiling(max_workers, max_qps),
            );
            index += 1;
        }
        slots
    }
}
