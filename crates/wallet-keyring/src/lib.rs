//! Live signing keyrings for the wallet daemon.
//!
//! A keyring is the unencrypted, in-memory signer for one wallet: either a
//! hierarchical-deterministic keyring built from a BIP-39 mnemonic, or a
//! simple keyring wrapping one imported private key. Keyrings exist only
//! while the vault is unlocked; their durable form is [`SerializedKeyring`],
//! which the vault encrypts at rest.

pub mod error;
pub mod hd;
pub mod keyring;
pub mod mnemonic;
pub mod simple;

pub use error::KeyringError;
pub use hd::HdKeyring;
pub use keyring::{Keyring, SerializedKeyring};
pub use simple::SimpleKeyring;
