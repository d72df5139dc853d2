use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1};
use bitcoin::Psbt;
use serde::{Deserialize, Serialize};

use chain_btc::address::AddressType;
use chain_btc::transaction::{build_payment, sign_payment, Payment};
use chain_btc::utxo::Utxo;
use chain_btc::{message, BtcNetwork};

use crate::error::KeyringError;
use crate::hd::HdKeyring;
use crate::simple::SimpleKeyring;

/// The durable form of a keyring, stored (JSON-serialized) inside the
/// vault's encrypted blob. Never contains an address; those are re-derived
/// on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SerializedKeyring {
    #[serde(rename_all = "camelCase")]
    Root {
        mnemonic: String,
        passphrase: String,
        address_type: AddressType,
        hide_root: bool,
        account_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    Simple {
        private_key: String,
        address_type: AddressType,
    },
}

/// A live signer for one wallet.
pub enum Keyring {
    Hd(HdKeyring),
    Simple(SimpleKeyring),
}

impl Keyring {
    /// Rebuild a live keyring from its serialized form.
    pub fn restore(serialized: &SerializedKeyring) -> Result<Self, KeyringError> {
        match serialized {
            SerializedKeyring::Root {
                mnemonic,
                passphrase,
                address_type,
                hide_root,
                account_count,
            } => Ok(Keyring::Hd(HdKeyring::from_phrase(
                mnemonic,
                passphrase,
                *address_type,
                *hide_root,
                *account_count,
            )?)),
            SerializedKeyring::Simple {
                private_key,
                address_type,
            } => Ok(Keyring::Simple(SimpleKeyring::from_payload(
                private_key,
                *address_type,
            )?)),
        }
    }

    pub fn serialize(&self) -> SerializedKeyring {
        match self {
            Keyring::Hd(hd) => SerializedKeyring::Root {
                mnemonic: hd.phrase(),
                passphrase: hd.passphrase().to_owned(),
                address_type: hd.address_type(),
                hide_root: hd.hide_root(),
                account_count: hd.child_accounts(),
            },
            Keyring::Simple(simple) => SerializedKeyring::Simple {
                private_key: simple.to_hex(),
                address_type: simple.address_type(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Keyring::Hd(_) => "root",
            Keyring::Simple(_) => "simple",
        }
    }

    /// The seed phrase, for HD keyrings.
    pub fn phrase(&self) -> Option<String> {
        match self {
            Keyring::Hd(hd) => Some(hd.phrase()),
            Keyring::Simple(_) => None,
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            Keyring::Hd(hd) => hd.address_type(),
            Keyring::Simple(simple) => simple.address_type(),
        }
    }

    pub fn set_address_type(&mut self, address_type: AddressType) {
        match self {
            Keyring::Hd(hd) => hd.set_address_type(address_type),
            Keyring::Simple(simple) => simple.set_address_type(address_type),
        }
    }

    pub fn account_count(&self) -> u32 {
        match self {
            Keyring::Hd(hd) => hd.visible_accounts(),
            Keyring::Simple(_) => 1,
        }
    }

    /// Append a derivable account. Simple keyrings hold exactly one key.
    pub fn add_account(&mut self) -> Result<u32, KeyringError> {
        match self {
            Keyring::Hd(hd) => Ok(hd.add_account()),
            Keyring::Simple(_) => Err(KeyringError::DerivationFailed(
                "simple keyring holds a single account".into(),
            )),
        }
    }

    fn secret_for(&self, account: u32) -> Result<bitcoin::secp256k1::SecretKey, KeyringError> {
        match self {
            Keyring::Hd(hd) => hd.secret_for(account),
            Keyring::Simple(simple) => {
                if account != 0 {
                    return Err(KeyringError::AccountOutOfRange(account));
                }
                Ok(*simple.secret())
            }
        }
    }

    pub fn public_key(
        &self,
        secp: &Secp256k1<All>,
        account: u32,
    ) -> Result<PublicKey, KeyringError> {
        Ok(self.secret_for(account)?.public_key(secp))
    }

    /// Address of every account, in sequence order.
    pub fn addresses(
        &self,
        secp: &Secp256k1<All>,
        network: BtcNetwork,
    ) -> Result<Vec<String>, KeyringError> {
        match self {
            Keyring::Hd(hd) => hd.addresses(secp, network),
            Keyring::Simple(simple) => Ok(vec![simple.address(secp, network)?]),
        }
    }

    /// Sign every compatible PSBT input controlled by `account`'s key.
    /// Returns the number of inputs signed.
    pub fn sign_psbt(
        &self,
        secp: &Secp256k1<All>,
        account: u32,
        psbt: &mut Psbt,
    ) -> Result<usize, KeyringError> {
        let secret = self.secret_for(account)?;
        chain_btc::psbt::sign_inputs(psbt, &secret, secp).map_err(Into::into)
    }

    /// Sign a message under the standard signed-message envelope.
    pub fn sign_message(&self, account: u32, text: &str) -> Result<String, KeyringError> {
        let secret = self.secret_for(account)?;
        message::sign_message(text.as_bytes(), &secret).map_err(Into::into)
    }

    /// Sign the bare double-SHA256 of arbitrary bytes, without the message
    /// envelope. Only derived (HD) keys may do this; an imported key could
    /// be coaxed into signing attacker-chosen digests it uses elsewhere.
    pub fn sign_personal_message(&self, account: u32, data: &[u8]) -> Result<String, KeyringError> {
        match self {
            Keyring::Hd(_) => {
                let secret = self.secret_for(account)?;
                let digest = sha256d::Hash::hash(data).to_byte_array();
                message::sign_digest(digest, &secret).map_err(Into::into)
            }
            Keyring::Simple(_) => Err(KeyringError::UnsupportedSignPersonalMessage),
        }
    }

    /// Export the private key controlling `address` as WIF.
    ///
    /// The root-level account of an HD keyring is an extended key; a bare
    /// WIF cannot reproduce it, so export is refused for it.
    pub fn export_account(
        &self,
        secp: &Secp256k1<All>,
        address: &str,
        network: BtcNetwork,
    ) -> Result<String, KeyringError> {
        let addresses = self.addresses(secp, network)?;
        let account = addresses
            .iter()
            .position(|a| a == address)
            .ok_or_else(|| KeyringError::AccountNotFound(address.to_owned()))?
            as u32;

        match self {
            Keyring::Hd(hd) => {
                if hd.is_root_account(account) {
                    return Err(KeyringError::UnsupportedExportAccount);
                }
                let secret = hd.secret_for(account)?;
                Ok(bitcoin::PrivateKey::new(secret, network.to_bitcoin_network()).to_wif())
            }
            Keyring::Simple(simple) => Ok(simple.export_wif(network)),
        }
    }

    /// Build and fully sign a payment from `account`, returning the raw
    /// consensus-serialized transaction.
    pub fn send_payment(
        &self,
        account: u32,
        utxos: &[Utxo],
        payment: &Payment,
        network: BtcNetwork,
    ) -> Result<Vec<u8>, KeyringError> {
        let secret = self.secret_for(account)?;
        let unsigned = build_payment(utxos, payment, self.address_type(), network)?;
        sign_payment(unsigned, &secret).map_err(Into::into)
    }
}
