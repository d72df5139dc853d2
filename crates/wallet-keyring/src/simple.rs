use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};
use zeroize::Zeroize;

use chain_btc::address::{derive_address, AddressType};
use chain_btc::BtcNetwork;

use crate::error::KeyringError;

/// Keyring wrapping exactly one imported private key.
pub struct SimpleKeyring {
    secret: SecretKey,
    address_type: AddressType,
}

impl SimpleKeyring {
    /// Import from WIF or raw 32-byte hex.
    pub fn from_payload(payload: &str, address_type: AddressType) -> Result<Self, KeyringError> {
        let payload = payload.trim();

        if let Ok(wif) = bitcoin::PrivateKey::from_wif(payload) {
            return Ok(Self {
                secret: wif.inner,
                address_type,
            });
        }

        let mut bytes = hex::decode(payload)
            .map_err(|e| KeyringError::InvalidPrivateKey(format!("not WIF or hex: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| KeyringError::InvalidPrivateKey(e.to_string()));
        bytes.zeroize();

        Ok(Self {
            secret: secret?,
            address_type,
        })
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn set_address_type(&mut self, address_type: AddressType) {
        self.address_type = address_type;
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key<C: Signing>(&self, secp: &Secp256k1<C>) -> PublicKey {
        self.secret.public_key(secp)
    }

    pub fn address<C: Signing + Verification>(
        &self,
        secp: &Secp256k1<C>,
        network: BtcNetwork,
    ) -> Result<String, KeyringError> {
        let pubkey = self.public_key(secp);
        derive_address(secp, &pubkey, self.address_type, network).map_err(Into::into)
    }

    /// WIF export for the given network.
    pub fn export_wif(&self, network: BtcNetwork) -> String {
        bitcoin::PrivateKey::new(self.secret, network.to_bitcoin_network()).to_wif()
    }

    /// Hex form stored inside the encrypted vault blob.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn imports_from_hex() {
        let kr = SimpleKeyring::from_payload(KEY_HEX, AddressType::P2wpkh).unwrap();
        assert_eq!(kr.to_hex(), KEY_HEX);
    }

    #[test]
    fn imports_from_wif_roundtrip() {
        let kr = SimpleKeyring::from_payload(KEY_HEX, AddressType::P2pkh).unwrap();
        let wif = kr.export_wif(BtcNetwork::Mainnet);

        let back = SimpleKeyring::from_payload(&wif, AddressType::P2pkh).unwrap();
        assert_eq!(back.to_hex(), KEY_HEX);
    }

    #[test]
    fn rejects_garbage() {
        assert!(SimpleKeyring::from_payload("zzzz", AddressType::P2wpkh).is_err());
        assert!(SimpleKeyring::from_payload("", AddressType::P2wpkh).is_err());
        // Valid hex, invalid scalar.
        assert!(SimpleKeyring::from_payload(&"00".repeat(32), AddressType::P2wpkh).is_err());
    }

    #[test]
    fn address_follows_type() {
        let secp = Secp256k1::new();
        let mut kr = SimpleKeyring::from_payload(KEY_HEX, AddressType::P2wpkh).unwrap();
        assert!(kr
            .address(&secp, BtcNetwork::Mainnet)
            .unwrap()
            .starts_with("bc1q"));

        kr.set_address_type(AddressType::P2tr);
        assert!(kr
            .address(&secp, BtcNetwork::Mainnet)
            .unwrap()
            .starts_with("bc1p"));
    }

    #[test]
    fn whitespace_is_tolerated() {
        let kr = SimpleKeyring::from_payload(&format!("  {KEY_HEX}\n"), AddressType::P2wpkh);
        assert!(kr.is_ok());
    }
}
