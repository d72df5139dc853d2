use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::KeyringError;

/// Generate a new 12-word BIP-39 mnemonic (128 bits of entropy).
pub fn generate_mnemonic() -> Result<String, KeyringError> {
    let mut entropy = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| KeyringError::InvalidMnemonic(e.to_string()))?;
    entropy.zeroize();
    Ok(mnemonic.to_string())
}

/// Parse and checksum-validate a mnemonic phrase.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, KeyringError> {
    Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| KeyringError::InvalidMnemonic(e.to_string()))
}

/// Whether `phrase` is a valid BIP-39 mnemonic.
pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}
