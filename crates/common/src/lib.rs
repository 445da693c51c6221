//! Low-level utilities shared across CalSync crates.
//!
//! - `crypto`: AES-256-GCM symmetric encryption for credentials at rest
//! - `error`: the error type those utilities return

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod crypto;
pub mod error;

pub use crypto::{EncryptedData, EncryptionService};
pub use error::{CommonError, CommonResult};
