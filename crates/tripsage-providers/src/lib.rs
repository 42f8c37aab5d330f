//! Model provider resolution for TripSage
//!
//! BYOK credentials live in the vault; the platform gateway is the fallback.
//! All providers are reached through one OpenAI-compatible client, so the
//! rest of the system only ever sees [`tripsage_core::ModelHandle`].

pub mod gateway;
pub mod registry;
pub mod vault;

pub use gateway::{OpenAiCompatibleEmbeddings, OpenAiCompatibleModel, ProviderEndpoint};
pub use registry::{GatewayConfig, KeyValidation, ProviderRegistry, ServiceConfig};
pub use vault::{CredentialVault, InMemoryVault, PostgresVault, VaultHandle};
