//! Registry error types

use thiserror::Error;

/// Errors raised while building or querying the credential registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No slots are registered for the provider
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// A task asked for a credential slot the provider does not have
    #[error("provider {provider} has no credential slot {slot}")]
    UnknownCredential {
        /// Provider that was queried
        provider: String,
        /// Requested slot identifier
        slot: String,
    },

    /// A provider was registered with zero slots
    #[error("provider {0} must declare at least one credential slot")]
    EmptyProvider(String),

    /// Two slots of one provider share an identifier
    #[error("provider {provider} declares slot {slot} more than once")]
    DuplicateSlot {
        /// Provider being registered
        provider: String,
        /// Duplicated slot identifier
        slot: String,
    },

    /// A declared concurrency or QPS ceiling is not positive
    #[error("slot {slot} of provider {provider} has an invalid ceiling: {reason}")]
    InvalidCeiling {
        /// Provider being registered
        provider: String,
        /// Offending slot
        slot: String,
        /// What is wrong with it
        reason: String,
    },

    /// The environment variable backing a credential is unset
    #[error("credential variable {0} is not set")]
    MissingSecret(String),
}
