//! Bitcoin chain support for the wallet daemon.
//!
//! Provides address derivation for the four supported script types (P2PKH,
//! P2WPKH, P2SH-P2WPKH, P2TR), UTXO coin selection, payment transaction
//! building with both fee modes, PSBT input signing, and signed messages.

pub mod address;
pub mod error;
pub mod message;
pub mod network;
pub mod psbt;
pub mod transaction;
pub mod utxo;

pub use address::AddressType;
pub use error::BtcError;
pub use network::BtcNetwork;
