//! Registry client and pull engine.
//!
//! Talks the OCI / Docker Distribution v2 protocol: bearer-token auth
//! challenges, manifest/index negotiation with platform selection, and
//! resumable, digest-verified blob downloads. The [`PullEngine`] drives one
//! full pull into a staging directory and packages the result into a zip
//! archive.

pub mod archive;
pub mod auth;
pub mod blob;
pub mod config;
pub mod error;
pub mod pull;
pub mod resolver;
pub mod transport;

pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use pull::{PullEngine, PullRequest, PullRunner};
pub use resolver::ResolvedManifest;
pub use transport::{HttpResponse, ReqwestTransport, RetryingTransport, Transport};
