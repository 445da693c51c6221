//! Symmetric encryption primitives used by the credential vault.

pub mod encryption;

pub use encryption::{EncryptedData, EncryptionService};
