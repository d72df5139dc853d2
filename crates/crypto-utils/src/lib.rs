//! # crypto-utils
//!
//! Password-based sealing, key derivation, memory hygiene, and secure
//! random generation for the wallet vault.
//!
//! The vault stores secrets as a `(data, iv, salt)` triple: the salt feeds
//! Argon2id, the derived key and a fresh IV feed AES-256-GCM. [`sealed`]
//! implements that layout; [`encryption`] and [`kdf`] are the layers
//! underneath.

pub mod encryption;
pub mod error;
pub mod kdf;
pub mod random;
pub mod sealed;
pub mod zeroizing;

pub use error::CryptoError;
pub use sealed::{open, seal, Sealed};
