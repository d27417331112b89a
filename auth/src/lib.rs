//! Endpoint and credential registry
//!
//! This crate models which provider a task must be routed to and which
//! independently rate-limited channels ("credential slots") exist for it:
//!
//! - A provider with a single API key or deployment exposes one slot
//! - A provider with a key pool exposes N slots, each with its own ceiling
//!
//! Lookups are pure; the registry is built once at startup and shared
//! read-only for the rest of the run.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod registry;
mod secret;

pub use error::RegistryError;
pub use registry::{CredentialRegistry, CredentialSlot, ProviderId, SlotId};
pub use secret::{CredentialSource, Secret};
