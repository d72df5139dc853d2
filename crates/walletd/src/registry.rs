use std::sync::Arc;

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Psbt;
use tokio::sync::RwLock;
use tracing::info;

use chain_btc::transaction::Payment;
use chain_btc::utxo::Utxo;
use chain_btc::AddressType;
use wallet_keyring::{HdKeyring, Keyring, SimpleKeyring};

use crate::error::WalletdError;
use crate::state::{Account, Wallet, WalletKind, WalletStatePatch};
use crate::vault::{NameKind, SaveWallets, SecretEntry, Vault};

/// Parameters for building a fresh keyring.
pub struct NewKeyring {
    pub kind: WalletKind,
    /// A mnemonic phrase (`root`) or a WIF/hex private key (`simple`).
    pub payload: String,
    pub address_type: AddressType,
    pub hide_root: bool,
}

/// Parameters for an outgoing payment assembled from supplied UTXOs.
pub struct SendTx {
    pub to: String,
    pub amount_sat: u64,
    pub utxos: Vec<Utxo>,
    pub fee_rate_sat_vbyte: u64,
    pub receiver_to_pay_fee: bool,
}

/// The in-memory array of live signing keyrings, one per wallet, kept in
/// lockstep with the vault's wallet array by every mutating operation.
pub struct KeyringRegistry {
    vault: Arc<Vault>,
    keyrings: RwLock<Vec<Keyring>>,
    secp: Secp256k1<All>,
}

impl KeyringRegistry {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self {
            vault,
            keyrings: RwLock::new(Vec::new()),
            secp: Secp256k1::new(),
        }
    }

    /// Decrypt the vault and reconstruct one live keyring per stored
    /// wallet, returning the wallets with addresses rehydrated (and no
    /// secret payload).
    pub async fn init(&self, password: &str) -> Result<Vec<Wallet>, WalletdError> {
        let entries = self.vault.decrypt_secrets(password)?;

        let mut keyrings = Vec::with_capacity(entries.len());
        for entry in &entries {
            keyrings.push(Keyring::restore(&entry.data)?);
        }

        let state = self.vault.wallet_state().await;
        let mut wallets = state.wallets;
        for (index, keyring) in keyrings.iter().enumerate() {
            let addresses = keyring.addresses(&self.secp, state.network)?;
            if let Some(wallet) = wallets.get_mut(index) {
                rehydrate_accounts(wallet, &addresses);
            }
        }

        *self.keyrings.write().await = keyrings;
        info!(wallets = wallets.len(), "keyrings reconstructed");

        self.vault
            .update_wallet_state(WalletStatePatch {
                wallets: Some(wallets.clone()),
                ..Default::default()
            })
            .await?;
        Ok(wallets)
    }

    /// Build a keyring from a mnemonic (`root`) or a private key
    /// (`simple`), append it to the registry together with its wallet
    /// metadata, and return the first account's address.
    pub async fn new_keyring(&self, params: NewKeyring) -> Result<String, WalletdError> {
        let state = self.vault.wallet_state().await;

        let keyring = match params.kind {
            WalletKind::Root => Keyring::Hd(HdKeyring::from_phrase(
                &params.payload,
                "",
                params.address_type,
                params.hide_root,
                0,
            )?),
            WalletKind::Simple => Keyring::Simple(SimpleKeyring::from_payload(
                &params.payload,
                params.address_type,
            )?),
        };

        let addresses = keyring.addresses(&self.secp, state.network)?;
        let first = addresses
            .first()
            .cloned()
            .ok_or_else(|| WalletdError::Internal("keyring produced no accounts".into()))?;

        let name = self.vault.get_unique_name(NameKind::Wallet).await;
        let accounts = addresses
            .iter()
            .enumerate()
            .map(|(index, address)| Account {
                id: index as u32,
                name: format!("Account {}", index + 1),
                address: Some(address.clone()),
            })
            .collect();

        let id = {
            let mut keyrings = self.keyrings.write().await;
            let id = keyrings.len();
            keyrings.push(keyring);
            id
        };

        let mut wallets = state.wallets;
        wallets.push(Wallet {
            id,
            name,
            address_type: params.address_type,
            kind: params.kind,
            accounts,
            hide_root: params.hide_root,
        });

        self.vault
            .update_wallet_state(WalletStatePatch {
                wallets: Some(wallets),
                selected_wallet: Some(Some(id)),
                selected_account: Some(Some(0)),
                ..Default::default()
            })
            .await?;

        Ok(first)
    }

    async fn selected(&self) -> Result<(usize, u32), WalletdError> {
        let state = self.vault.wallet_state().await;
        let wallet = state
            .selected_wallet
            .ok_or(WalletdError::InvalidKeyringIndex)?;
        Ok((wallet, state.selected_account.unwrap_or(0)))
    }

    /// Sign every compatible input of a hex-encoded PSBT with the selected
    /// wallet's current account key. Private key bytes never leave the
    /// keyring crate.
    pub async fn sign_psbt(&self, psbt_hex: &str) -> Result<String, WalletdError> {
        let (index, account) = self.selected().await?;
        let keyrings = self.keyrings.read().await;
        let keyring = keyrings
            .get(index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;

        let bytes = hex::decode(psbt_hex)
            .map_err(|e| WalletdError::InvalidParams(format!("psbt hex: {e}")))?;
        let mut psbt = Psbt::deserialize(&bytes)
            .map_err(|e| WalletdError::InvalidParams(format!("psbt: {e}")))?;

        keyring.sign_psbt(&self.secp, account, &mut psbt)?;
        Ok(hex::encode(psbt.serialize()))
    }

    pub async fn multi_sign_psbt(&self, psbt_hexs: &[String]) -> Result<Vec<String>, WalletdError> {
        let mut signed = Vec::with_capacity(psbt_hexs.len());
        for psbt_hex in psbt_hexs {
            signed.push(self.sign_psbt(psbt_hex).await?);
        }
        Ok(signed)
    }

    pub async fn sign_message(&self, text: &str) -> Result<String, WalletdError> {
        let (index, account) = self.selected().await?;
        let keyrings = self.keyrings.read().await;
        let keyring = keyrings
            .get(index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;
        Ok(keyring.sign_message(account, text)?)
    }

    pub async fn sign_personal_message(&self, data: &[u8]) -> Result<String, WalletdError> {
        let (index, account) = self.selected().await?;
        let keyrings = self.keyrings.read().await;
        let keyring = keyrings
            .get(index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;
        Ok(keyring.sign_personal_message(account, data)?)
    }

    /// Export the key controlling `address` (searched across all wallets).
    pub async fn export_account(&self, address: &str) -> Result<String, WalletdError> {
        let network = self.vault.wallet_state().await.network;
        let keyrings = self.keyrings.read().await;

        for keyring in keyrings.iter() {
            match keyring.export_account(&self.secp, address, network) {
                Ok(secret) => return Ok(secret),
                Err(wallet_keyring::KeyringError::AccountNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(WalletdError::WalletNotFound)
    }

    /// The selected account's compressed public key, hex-encoded.
    pub async fn public_key(&self) -> Result<String, WalletdError> {
        let (index, account) = self.selected().await?;
        let keyrings = self.keyrings.read().await;
        let keyring = keyrings
            .get(index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;
        let pubkey = keyring.public_key(&self.secp, account)?;
        Ok(hex::encode(pubkey.serialize()))
    }

    /// Switch a keyring's derivation scheme in place and return the
    /// re-derived address list. The caller persists the new addresses into
    /// the wallet's accounts.
    pub async fn change_address_type(
        &self,
        wallet_index: usize,
        address_type: AddressType,
    ) -> Result<Vec<String>, WalletdError> {
        let network = self.vault.wallet_state().await.network;
        let mut keyrings = self.keyrings.write().await;
        let keyring = keyrings
            .get_mut(wallet_index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;

        keyring.set_address_type(address_type);
        Ok(keyring.addresses(&self.secp, network)?)
    }

    /// Append one account to the selected wallet, persist, and select it.
    pub async fn add_account(&self) -> Result<Account, WalletdError> {
        let (index, _) = self.selected().await?;
        let state = self.vault.wallet_state().await;
        let name = self.vault.get_unique_name(NameKind::Account).await;

        let (new_id, address, entry) = {
            let mut keyrings = self.keyrings.write().await;
            let keyring = keyrings
                .get_mut(index)
                .ok_or(WalletdError::InvalidKeyringIndex)?;
            let new_id = keyring.add_account()?;
            let addresses = keyring.addresses(&self.secp, state.network)?;
            let address = addresses
                .get(new_id as usize)
                .cloned()
                .ok_or(WalletdError::InvalidKeyringIndex)?;
            let entry = SecretEntry {
                id: index,
                data: keyring.serialize(),
                phrase: keyring.phrase(),
            };
            (new_id, address, entry)
        };

        let account = Account {
            id: new_id,
            name,
            address: Some(address),
        };

        let mut wallets = state.wallets;
        let wallet = wallets
            .get_mut(index)
            .ok_or(WalletdError::WalletNotFound)?;
        wallet.accounts.push(account.clone());

        self.vault
            .update_wallet_state(WalletStatePatch {
                selected_account: Some(Some(new_id)),
                ..Default::default()
            })
            .await?;

        let password = self
            .vault
            .password()
            .await
            .ok_or(WalletdError::PasswordRequired)?;
        self.vault
            .save_wallets(SaveWallets {
                password: Some(password),
                wallets,
                payload: Some(vec![entry]),
                ..Default::default()
            })
            .await?;

        Ok(account)
    }

    /// Re-derive every wallet's account addresses from its live keyring
    /// (after a network switch) and persist the refreshed metadata.
    pub async fn rehydrate(&self) -> Result<Vec<Wallet>, WalletdError> {
        let state = self.vault.wallet_state().await;
        let mut wallets = state.wallets;
        {
            let keyrings = self.keyrings.read().await;
            for (index, keyring) in keyrings.iter().enumerate() {
                let addresses = keyring.addresses(&self.secp, state.network)?;
                if let Some(wallet) = wallets.get_mut(index) {
                    rehydrate_accounts(wallet, &addresses);
                }
            }
        }
        self.vault
            .update_wallet_state(WalletStatePatch {
                wallets: Some(wallets.clone()),
                ..Default::default()
            })
            .await?;
        Ok(wallets)
    }

    /// The selected wallet's serialized secret entry (for re-persisting
    /// after mutations like an address-type change).
    pub async fn serialized_entry(&self, index: usize) -> Result<SecretEntry, WalletdError> {
        let keyrings = self.keyrings.read().await;
        let keyring = keyrings
            .get(index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;
        Ok(SecretEntry {
            id: index,
            data: keyring.serialize(),
            phrase: keyring.phrase(),
        })
    }

    /// Remove wallet and keyring `id`, renumber both arrays contiguously,
    /// and persist.
    pub async fn delete_wallet(&self, id: usize) -> Result<Vec<Wallet>, WalletdError> {
        let password = self
            .vault
            .password()
            .await
            .ok_or(WalletdError::PasswordRequired)?;

        {
            let mut keyrings = self.keyrings.write().await;
            if id >= keyrings.len() {
                return Err(WalletdError::WalletNotFound);
            }
            keyrings.remove(id);
        }

        let state = self.vault.wallet_state().await;
        let mut wallets = state.wallets;
        if id < wallets.len() {
            wallets.remove(id);
        }
        for (index, wallet) in wallets.iter_mut().enumerate() {
            wallet.id = index;
        }

        let selected_wallet = if wallets.is_empty() {
            None
        } else {
            let previous = state.selected_wallet.unwrap_or(0);
            Some(if previous > id { previous - 1 } else { previous }.min(wallets.len() - 1))
        };

        self.vault
            .update_wallet_state(WalletStatePatch {
                selected_wallet: Some(selected_wallet),
                selected_account: Some(selected_wallet.map(|_| 0)),
                ..Default::default()
            })
            .await?;

        self.vault
            .save_wallets(SaveWallets {
                password: Some(password),
                wallets: wallets.clone(),
                seed_to_delete: Some(id),
                ..Default::default()
            })
            .await?;

        info!(deleted = id, remaining = wallets.len(), "wallet deleted");
        Ok(wallets)
    }

    /// Build and sign a payment from the selected account, paying `to`
    /// with or without the fee deducted from the amount.
    pub async fn send_transaction(&self, tx: SendTx) -> Result<String, WalletdError> {
        let (index, account) = self.selected().await?;
        let state = self.vault.wallet_state().await;
        let change_address = state
            .current_address()
            .ok_or(WalletdError::ChainDisconnected)?;

        let keyrings = self.keyrings.read().await;
        let keyring = keyrings
            .get(index)
            .ok_or(WalletdError::InvalidKeyringIndex)?;

        let payment = Payment {
            to: tx.to,
            amount_sat: tx.amount_sat,
            change_address,
            fee_rate_sat_vbyte: tx.fee_rate_sat_vbyte,
            receiver_to_pay_fee: tx.receiver_to_pay_fee,
        };
        let raw = keyring.send_payment(account, &tx.utxos, &payment, state.network)?;
        Ok(hex::encode(raw))
    }

    pub async fn keyring_count(&self) -> usize {
        self.keyrings.read().await.len()
    }

    /// Drop every live keyring and the vault's transient unlock state.
    pub async fn lock(&self) {
        self.keyrings.write().await.clear();
        self.vault.lock().await;
    }
}

fn rehydrate_accounts(wallet: &mut Wallet, addresses: &[String]) {
    for (index, address) in addresses.iter().enumerate() {
        match wallet.accounts.get_mut(index) {
            Some(account) => account.address = Some(address.clone()),
            None => wallet.accounts.push(Account {
                id: index as u32,
                name: format!("Account {}", index + 1),
                address: Some(address.clone()),
            }),
        }
    }
    wallet.accounts.truncate(addresses.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::events::NullSink;
    use chain_btc::BtcNetwork;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const KEY_HEX: &str = "3333333333333333333333333333333333333333333333333333333333333333";

    fn services() -> (Arc<Vault>, KeyringRegistry) {
        let vault = Arc::new(Vault::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(NullSink),
            BtcNetwork::Testnet,
        ));
        let registry = KeyringRegistry::new(vault.clone());
        (vault, registry)
    }

    fn root_params() -> NewKeyring {
        NewKeyring {
            kind: WalletKind::Root,
            payload: PHRASE.into(),
            address_type: AddressType::P2wpkh,
            hide_root: true,
        }
    }

    async fn save_current(vault: &Vault, registry: &KeyringRegistry) {
        let wallets = vault.wallet_state().await.wallets;
        let mut payload = Vec::new();
        for index in 0..wallets.len() {
            payload.push(registry.serialized_entry(index).await.unwrap());
        }
        vault
            .save_wallets(SaveWallets {
                password: Some("pw1".into()),
                wallets,
                payload: Some(payload),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn init_on_empty_vault_returns_no_wallets() {
        let (vault, registry) = services();
        let wallets = registry.init("pw1").await.unwrap();
        assert!(wallets.is_empty());
        assert!(vault.is_vault_empty().unwrap());
        assert_eq!(registry.keyring_count().await, 0);
    }

    #[tokio::test]
    async fn new_root_keyring_returns_first_address() {
        let (_vault, registry) = services();
        let first = registry.new_keyring(root_params()).await.unwrap();
        // BIP-84 child 0 for the test phrase, testnet encoding.
        assert!(first.starts_with("tb1q"));
        assert_eq!(registry.keyring_count().await, 1);
    }

    #[tokio::test]
    async fn save_and_init_roundtrip() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        save_current(&vault, &registry).await;

        assert!(vault.get_local_values().unwrap().enc.is_some());

        // A fresh registry, as after a restart.
        let registry2 = KeyringRegistry::new(vault.clone());
        let wallets = registry2.init("pw1").await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].id, 0);
        assert!(wallets[0].accounts[0].address.as_deref().unwrap().starts_with("tb1q"));
        assert_eq!(registry2.keyring_count().await, 1);
        assert_eq!(vault.get_wallet_phrase(0, "pw1").unwrap(), PHRASE);
    }

    #[tokio::test]
    async fn keyrings_and_wallets_stay_in_lockstep() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        registry
            .new_keyring(NewKeyring {
                kind: WalletKind::Simple,
                payload: KEY_HEX.into(),
                address_type: AddressType::P2tr,
                hide_root: false,
            })
            .await
            .unwrap();
        registry.new_keyring(root_params()).await.unwrap();
        save_current(&vault, &registry).await;

        assert_eq!(registry.keyring_count().await, 3);
        assert_eq!(vault.wallet_state().await.wallets.len(), 3);

        let wallets = registry.delete_wallet(1).await.unwrap();
        assert_eq!(registry.keyring_count().await, 2);
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].id, 0);
        assert_eq!(wallets[1].id, 1);
        // Survivor at position 1 is the former wallet 2 (a root wallet).
        assert_eq!(wallets[1].kind, WalletKind::Root);
        assert_eq!(vault.decrypt_secrets("pw1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn signing_with_out_of_range_selection_fails_cleanly() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        registry.new_keyring(root_params()).await.unwrap();
        save_current(&vault, &registry).await;

        vault
            .update_wallet_state(WalletStatePatch {
                selected_wallet: Some(Some(3)),
                ..Default::default()
            })
            .await
            .unwrap();

        let before = vault.wallet_state().await.wallets;
        let err = registry.sign_psbt("deadbeef").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid keyring index");
        assert_eq!(vault.wallet_state().await.wallets, before);
    }

    #[tokio::test]
    async fn signing_with_no_selection_fails_cleanly() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        vault
            .update_wallet_state(WalletStatePatch {
                selected_wallet: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = registry.sign_message("hello").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid keyring index");
    }

    #[tokio::test]
    async fn change_address_type_rederives_addresses() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        let before = vault.wallet_state().await.wallets[0].accounts[0]
            .address
            .clone()
            .unwrap();

        let addresses = registry
            .change_address_type(0, AddressType::P2tr)
            .await
            .unwrap();
        assert_eq!(addresses.len(), 1);
        assert!(addresses[0].starts_with("tb1p"));
        assert_ne!(addresses[0], before);

        assert!(matches!(
            registry.change_address_type(9, AddressType::P2tr).await,
            Err(WalletdError::InvalidKeyringIndex)
        ));
    }

    #[tokio::test]
    async fn add_account_extends_wallet_and_keyring() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        save_current(&vault, &registry).await;

        let account = registry.add_account().await.unwrap();
        assert_eq!(account.id, 1);
        assert_eq!(account.name, "Account 2");

        let state = vault.wallet_state().await;
        assert_eq!(state.wallets[0].accounts.len(), 2);
        assert_eq!(state.selected_account, Some(1));

        // The extended account survives a restart.
        let registry2 = KeyringRegistry::new(vault.clone());
        let wallets = registry2.init("pw1").await.unwrap();
        assert_eq!(wallets[0].accounts.len(), 2);
    }

    #[tokio::test]
    async fn export_account_finds_the_owning_wallet() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        registry
            .new_keyring(NewKeyring {
                kind: WalletKind::Simple,
                payload: KEY_HEX.into(),
                address_type: AddressType::P2wpkh,
                hide_root: false,
            })
            .await
            .unwrap();

        let state = vault.wallet_state().await;
        let simple_address = state.wallets[1].accounts[0].address.clone().unwrap();

        let wif = registry.export_account(&simple_address).await.unwrap();
        assert!(bitcoin::PrivateKey::from_wif(&wif).is_ok());

        assert!(matches!(
            registry.export_account("tb1qunknownaddress").await,
            Err(WalletdError::WalletNotFound)
        ));
    }

    #[tokio::test]
    async fn lock_clears_keyrings() {
        let (vault, registry) = services();
        registry.new_keyring(root_params()).await.unwrap();
        save_current(&vault, &registry).await;

        registry.lock().await;
        assert_eq!(registry.keyring_count().await, 0);
        assert!(!vault.is_unlocked().await);
    }
}
