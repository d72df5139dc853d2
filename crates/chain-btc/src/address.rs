use bitcoin::address::Address;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{PublicKey, Secp256k1, Verification};
use bitcoin::CompressedPublicKey;
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::network::BtcNetwork;

/// The four script types a wallet account can use.
///
/// The variant determines the derivation purpose (BIP-44/49/84/86), the
/// address encoding, and the weight estimates used for fee calculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressType {
    P2pkh,
    #[default]
    P2wpkh,
    P2shP2wpkh,
    P2tr,
}

impl AddressType {
    /// BIP purpose level for this script type.
    pub fn purpose(self) -> u32 {
        match self {
            AddressType::P2pkh => 44,
            AddressType::P2shP2wpkh => 49,
            AddressType::P2wpkh => 84,
            AddressType::P2tr => 86,
        }
    }

    /// Estimated virtual size of one input spending this script type.
    pub fn input_vbytes(self) -> u64 {
        match self {
            AddressType::P2pkh => 148,
            AddressType::P2shP2wpkh => 91,
            AddressType::P2wpkh => 68,
            AddressType::P2tr => 58,
        }
    }

    /// Estimated virtual size of one output paying this script type.
    pub fn output_vbytes(self) -> u64 {
        match self {
            AddressType::P2pkh => 34,
            AddressType::P2shP2wpkh => 32,
            AddressType::P2wpkh => 31,
            AddressType::P2tr => 43,
        }
    }
}

impl std::fmt::Display for AddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressType::P2pkh => write!(f, "P2PKH"),
            AddressType::P2wpkh => write!(f, "P2WPKH"),
            AddressType::P2shP2wpkh => write!(f, "P2SH_P2WPKH"),
            AddressType::P2tr => write!(f, "P2TR"),
        }
    }
}

/// Derive the address string for `pubkey` under the given script type.
///
/// P2TR uses the key as the untweaked internal key with no script tree, so
/// the output key is the BIP-341 tweak of it.
pub fn derive_address<C: Verification>(
    secp: &Secp256k1<C>,
    pubkey: &PublicKey,
    address_type: AddressType,
    network: BtcNetwork,
) -> Result<String, BtcError> {
    let net = network.to_bitcoin_network();

    let address = match address_type {
        AddressType::P2pkh => Address::p2pkh(bitcoin::PublicKey::new(*pubkey), net),
        AddressType::P2wpkh => Address::p2wpkh(&CompressedPublicKey(*pubkey), net),
        AddressType::P2shP2wpkh => Address::p2shwpkh(&CompressedPublicKey(*pubkey), net),
        AddressType::P2tr => {
            let (xonly, _) = pubkey.x_only_public_key();
            Address::p2tr(secp, xonly, None, net)
        }
    };

    Ok(address.to_string())
}

/// The scriptPubKey that [`derive_address`] would lock to for `pubkey`.
///
/// Used both to build change outputs and to recognize which PSBT inputs a
/// key controls.
pub fn script_pubkey_for<C: Verification>(
    secp: &Secp256k1<C>,
    pubkey: &PublicKey,
    address_type: AddressType,
) -> ScriptBuf {
    let compressed = CompressedPublicKey(*pubkey);
    match address_type {
        AddressType::P2pkh => {
            ScriptBuf::new_p2pkh(&bitcoin::PublicKey::new(*pubkey).pubkey_hash())
        }
        AddressType::P2wpkh => ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash()),
        AddressType::P2shP2wpkh => {
            let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
            ScriptBuf::new_p2sh(&redeem.script_hash())
        }
        AddressType::P2tr => {
            let (xonly, _) = pubkey.x_only_public_key();
            ScriptBuf::new_p2tr(secp, xonly, None)
        }
    }
}

/// Validate an address string for the given network.
///
/// Returns `Ok(false)` for an address that parses but belongs to another
/// network, and `Err` for garbage input.
pub fn validate_address(address: &str, network: BtcNetwork) -> Result<bool, BtcError> {
    let parsed = address
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?;

    Ok(parsed.is_valid_for_network(network.to_bitcoin_network()))
}
