//! Self-custody wallet background daemon.
//!
//! An isolated process mediating between untrusted page origins and the
//! user's private keys. Inbound RPC requests pass through the
//! authorization gateway's ordered gate pipeline before anything touches
//! the key-custody subsystem (keyring registry + encrypted vault).
//!
//! ## Modules
//!
//! - `gateway` / `provider` - the RPC pipeline and page-facing handlers
//! - `registry` - live signing keyrings, in lockstep with the vault
//! - `vault` / `backend` - encrypted secret blob + plaintext cache
//! - `approval` - the single-pending-approval broker and its surface
//! - `session` / `permission` - live connections and persisted consent
//! - `controller` - the extension-internal (popup) dispatch surface
//! - `balance` - background balance refresher

pub mod approval;
pub mod backend;
pub mod balance;
pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod permission;
pub mod provider;
pub mod registry;
pub mod rpc;
pub mod services;
pub mod session;
pub mod state;
pub mod vault;

pub use config::Config;
pub use error::WalletdError;
pub use services::Services;
