use bip32::XPrv;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};
use zeroize::{Zeroize, Zeroizing};

use chain_btc::address::{derive_address, AddressType};
use chain_btc::BtcNetwork;

use crate::error::KeyringError;
use crate::mnemonic::parse_mnemonic;

/// Hierarchical-deterministic keyring backed by a BIP-39 mnemonic.
///
/// Account paths follow the BIP purpose matching the keyring's address type
/// (`m/{purpose}'/0'/0'/0/{index}`). The account-level node itself
/// (`m/{purpose}'/0'/0'`) is exposed as a root-level account with id 0
/// unless `hide_root` is set, in which case only indexed child accounts are
/// visible and ids map directly onto child indices.
pub struct HdKeyring {
    mnemonic: bip39::Mnemonic,
    passphrase: String,
    seed: Zeroizing<[u8; 64]>,
    address_type: AddressType,
    hide_root: bool,
    /// Number of derived child accounts (excludes the root-level account).
    account_count: u32,
}

impl HdKeyring {
    pub fn from_phrase(
        phrase: &str,
        passphrase: &str,
        address_type: AddressType,
        hide_root: bool,
        child_accounts: u32,
    ) -> Result<Self, KeyringError> {
        let mnemonic = parse_mnemonic(phrase)?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));

        // The visible sequence must never be empty.
        let account_count = if hide_root {
            child_accounts.max(1)
        } else {
            child_accounts
        };

        Ok(Self {
            mnemonic,
            passphrase: passphrase.to_owned(),
            seed,
            address_type,
            hide_root,
            account_count,
        })
    }

    pub fn phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Switch the derivation scheme in place. Every account key changes,
    /// since the purpose level changes.
    pub fn set_address_type(&mut self, address_type: AddressType) {
        self.address_type = address_type;
    }

    pub fn hide_root(&self) -> bool {
        self.hide_root
    }

    pub fn child_accounts(&self) -> u32 {
        self.account_count
    }

    /// Number of accounts in the visible derivation sequence.
    pub fn visible_accounts(&self) -> u32 {
        if self.hide_root {
            self.account_count
        } else {
            self.account_count + 1
        }
    }

    /// Whether `id` names the root-level (account node) key.
    pub fn is_root_account(&self, id: u32) -> bool {
        !self.hide_root && id == 0
    }

    /// Append one child account; returns the new account's visible id.
    pub fn add_account(&mut self) -> u32 {
        self.account_count += 1;
        self.visible_accounts() - 1
    }

    fn path_for(&self, id: u32) -> Result<String, KeyringError> {
        if id >= self.visible_accounts() {
            return Err(KeyringError::AccountOutOfRange(id));
        }
        let purpose = self.address_type.purpose();
        let child = if self.hide_root {
            id
        } else if id == 0 {
            return Ok(format!("m/{purpose}'/0'/0'"));
        } else {
            id - 1
        };
        Ok(format!("m/{purpose}'/0'/0'/0/{child}"))
    }

    /// Derive the private key for account `id`. Intermediate bytes are
    /// wiped before returning.
    pub fn secret_for(&self, id: u32) -> Result<SecretKey, KeyringError> {
        let path = self.path_for(id)?;
        let parsed = path
            .parse::<bip32::DerivationPath>()
            .map_err(|e| KeyringError::DerivationFailed(e.to_string()))?;

        let xprv = XPrv::derive_from_path(&*self.seed, &parsed)
            .map_err(|e| KeyringError::DerivationFailed(e.to_string()))?;

        let mut bytes: [u8; 32] = xprv.to_bytes().into();
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| KeyringError::DerivationFailed(e.to_string()));
        bytes.zeroize();
        secret
    }

    pub fn public_key<C: Signing + Verification>(
        &self,
        secp: &Secp256k1<C>,
        id: u32,
    ) -> Result<PublicKey, KeyringError> {
        Ok(self.secret_for(id)?.public_key(secp))
    }

    /// Address of every visible account, in sequence order.
    pub fn addresses<C: Signing + Verification>(
        &self,
        secp: &Secp256k1<C>,
        network: BtcNetwork,
    ) -> Result<Vec<String>, KeyringError> {
        (0..self.visible_accounts())
            .map(|id| {
                let pubkey = self.public_key(secp, id)?;
                derive_address(secp, &pubkey, self.address_type, network).map_err(Into::into)
            })
            .collect()
    }
}

impl Drop for HdKeyring {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}
