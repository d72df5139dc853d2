use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use chain_btc::BtcNetwork;
use crypto_utils::sealed::{self, Sealed};
use crypto_utils::zeroizing::ZeroizingString;
use wallet_keyring::SerializedKeyring;

use crate::backend::VaultBackend;
use crate::error::WalletdError;
use crate::events::{UiEvent, UiSink};
use crate::state::{
    AppState, AppStatePatch, ConnectedSite, Wallet, WalletState, WalletStatePatch,
};

/// The password-encrypted secret set, as persisted: hex-encoded ciphertext,
/// GCM IV, and Argon2id salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub data: String,
    pub iv: String,
    pub salt: String,
}

impl EncryptedBlob {
    fn from_sealed(sealed: &Sealed) -> Self {
        Self {
            data: hex::encode(&sealed.data),
            iv: hex::encode(sealed.iv),
            salt: hex::encode(sealed.salt),
        }
    }

    fn to_sealed(&self) -> Result<Sealed, WalletdError> {
        let corrupt = |what: &str| WalletdError::Internal(format!("corrupt vault blob: {what}"));

        let data = hex::decode(&self.data).map_err(|_| corrupt("data"))?;
        let iv: [u8; 12] = hex::decode(&self.iv)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| corrupt("iv"))?;
        let salt: [u8; 16] = hex::decode(&self.salt)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| corrupt("salt"))?;

        Ok(Sealed { data, iv, salt })
    }
}

/// The non-secret durable cache. `WalletMeta` entries here never contain
/// key material; secrets live only inside [`EncryptedBlob`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultCache {
    #[serde(default)]
    pub wallets: Vec<Wallet>,
    #[serde(default)]
    pub address_book: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_wallet: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_account: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_wallet: Option<Wallet>,
    #[serde(default)]
    pub connected_sites: Vec<ConnectedSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub network: BtcNetwork,
}

/// The single durable record: optional encrypted blob plus plaintext cache.
/// `enc` is absent exactly while no wallet has ever been saved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VaultRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<EncryptedBlob>,
    #[serde(default)]
    pub cache: VaultCache,
}

/// One wallet's secret material inside the decrypted blob, id-aligned with
/// `cache.wallets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretEntry {
    pub id: usize,
    pub data: SerializedKeyring,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase: Option<String>,
}

/// Arguments to [`Vault::save_wallets`].
#[derive(Default)]
pub struct SaveWallets {
    pub password: Option<String>,
    pub wallets: Vec<Wallet>,
    /// New or updated secret entries, merged over the stored set by id.
    pub payload: Option<Vec<SecretEntry>>,
    /// Re-encrypt under this password instead of `password`.
    pub new_password: Option<String>,
    /// Remove this entry (by id) before re-encrypting; survivors renumber.
    pub seed_to_delete: Option<usize>,
}

/// Which name sequence [`Vault::get_unique_name`] scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Wallet,
    Account,
}

struct Projection {
    app: AppState,
    wallet: WalletState,
}

/// Owner of all durable state: the encrypted secret blob, the plaintext
/// cache, and their in-memory projections. The blob and the cache are only
/// ever rewritten together.
pub struct Vault {
    backend: Arc<dyn VaultBackend>,
    projection: RwLock<Projection>,
    ui: Arc<dyn UiSink>,
    default_network: BtcNetwork,
}

impl Vault {
    pub fn new(
        backend: Arc<dyn VaultBackend>,
        ui: Arc<dyn UiSink>,
        default_network: BtcNetwork,
    ) -> Self {
        Self {
            backend,
            projection: RwLock::new(Projection {
                app: AppState::default(),
                wallet: WalletState {
                    network: default_network,
                    ..Default::default()
                },
            }),
            ui,
            default_network,
        }
    }

    /// Read-through to durable storage, synthesizing an empty default
    /// record if nothing has ever been written.
    pub fn get_local_values(&self) -> Result<VaultRecord, WalletdError> {
        Ok(self.backend.load()?.unwrap_or_else(|| VaultRecord {
            enc: None,
            cache: VaultCache {
                network: self.default_network,
                ..Default::default()
            },
        }))
    }

    pub fn is_vault_empty(&self) -> Result<bool, WalletdError> {
        Ok(self.get_local_values()?.enc.is_none())
    }

    /// Decrypt the stored secret set. An absent blob yields an empty set;
    /// a wrong password fails with `DecryptionFailed`.
    pub fn decrypt_secrets(&self, password: &str) -> Result<Vec<SecretEntry>, WalletdError> {
        let record = self.get_local_values()?;
        let Some(enc) = record.enc else {
            return Ok(Vec::new());
        };

        let plaintext = sealed::open(&enc.to_sealed()?, password.as_bytes())?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| WalletdError::Internal(format!("corrupt secret set: {e}")))
    }

    /// Merge new secret payloads with the stored ones, optionally drop one
    /// entry, re-encrypt everything under `new_password ?? password`, and
    /// atomically rewrite blob and cache together.
    pub async fn save_wallets(&self, args: SaveWallets) -> Result<(), WalletdError> {
        let password = args
            .password
            .filter(|p| !p.is_empty())
            .ok_or(WalletdError::PasswordRequired)?;

        {
            let proj = self.projection.read().await;
            if !args.wallets.is_empty() && proj.wallet.selected_wallet.is_none() {
                return Err(WalletdError::Internal("no wallet selected".into()));
            }
        }

        let mut entries = self.decrypt_secrets(&password)?;
        if let Some(payload) = args.payload {
            for entry in payload {
                match entries.iter_mut().find(|e| e.id == entry.id) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
        }
        if let Some(id) = args.seed_to_delete {
            entries.retain(|e| e.id != id);
        }
        entries.sort_by_key(|e| e.id);
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.id = index;
        }

        let effective_password = args
            .new_password
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| password.clone());

        let enc = if entries.is_empty() {
            None
        } else {
            let plaintext = serde_json::to_vec(&entries)
                .map_err(|e| WalletdError::Internal(format!("serialize secret set: {e}")))?;
            let sealed = sealed::seal(&plaintext, effective_password.as_bytes())
                .map_err(|e| WalletdError::Internal(e.to_string()))?;
            Some(EncryptedBlob::from_sealed(&sealed))
        };

        let cache = {
            let proj = self.projection.read().await;
            VaultCache {
                wallets: args.wallets.clone(),
                address_book: proj.app.address_book.clone(),
                selected_wallet: proj.wallet.selected_wallet,
                selected_account: proj.wallet.selected_account,
                pending_wallet: proj.wallet.pending_wallet.clone(),
                connected_sites: proj.wallet.connected_sites.clone(),
                language: proj.app.language.clone(),
                network: proj.wallet.network,
            }
        };

        self.backend.store(&VaultRecord { enc, cache })?;
        info!(wallets = args.wallets.len(), "vault saved");

        let patch = WalletStatePatch {
            wallets: Some(args.wallets),
            ..Default::default()
        };
        {
            let mut proj = self.projection.write().await;
            patch.apply(&mut proj.wallet);
            proj.app.password = Some(ZeroizingString::from(effective_password));
            proj.app.is_unlocked = true;
        }
        self.ui.send(UiEvent::WalletStateUpdated(patch.delta()));
        Ok(())
    }

    /// Decrypt-check the vault and hydrate the in-memory projections from
    /// durable storage. Keyrings are NOT reconstructed here; the keyring
    /// registry does that with the same password.
    pub async fn import_wallets(
        &self,
        password: &str,
    ) -> Result<(Vec<Wallet>, BtcNetwork), WalletdError> {
        let record = self.get_local_values()?;
        if record.enc.is_some() {
            let _ = self.decrypt_secrets(password)?;
        }

        let cache = record.cache;
        {
            let mut proj = self.projection.write().await;
            proj.app.is_unlocked = true;
            proj.app.password = Some(ZeroizingString::from(password));
            proj.app.language = cache.language.clone();
            proj.app.address_book = cache.address_book.clone();

            proj.wallet.wallets = cache.wallets.clone();
            proj.wallet.selected_wallet = cache.selected_wallet;
            proj.wallet.selected_account = cache.selected_account;
            proj.wallet.pending_wallet = cache.pending_wallet.clone();
            proj.wallet.connected_sites = cache.connected_sites.clone();
            proj.wallet.network = cache.network;
        }

        self.ui.send(UiEvent::AppStateUpdated(
            serde_json::json!({ "isUnlocked": true }),
        ));
        Ok((cache.wallets, cache.network))
    }

    /// Shallow-merge into the app projection; persist only the durable
    /// fields (language, address book) and broadcast the delta.
    pub async fn update_app_state(&self, patch: AppStatePatch) -> Result<(), WalletdError> {
        {
            let mut proj = self.projection.write().await;
            patch.apply(&mut proj.app);
        }

        if patch.language.is_some() || patch.address_book.is_some() {
            let mut record = self.get_local_values()?;
            if let Some(v) = &patch.language {
                record.cache.language = Some(v.clone());
            }
            if let Some(v) = &patch.address_book {
                record.cache.address_book = v.clone();
            }
            self.backend.store(&record)?;
        }

        let delta = patch.delta();
        if delta.as_object().is_some_and(|m| !m.is_empty()) {
            self.ui.send(UiEvent::AppStateUpdated(delta));
        }
        Ok(())
    }

    /// Shallow-merge into the wallet projection; persist the durable subset
    /// (everything except the balance) and broadcast the delta.
    pub async fn update_wallet_state(&self, patch: WalletStatePatch) -> Result<(), WalletdError> {
        {
            let mut proj = self.projection.write().await;
            patch.apply(&mut proj.wallet);
        }

        if patch.touches_durable_fields() {
            let mut record = self.get_local_values()?;
            if let Some(v) = &patch.wallets {
                record.cache.wallets = v.clone();
            }
            if let Some(v) = patch.selected_wallet {
                record.cache.selected_wallet = v;
            }
            if let Some(v) = patch.selected_account {
                record.cache.selected_account = v;
            }
            if let Some(v) = &patch.pending_wallet {
                record.cache.pending_wallet = v.clone();
            }
            if let Some(v) = &patch.connected_sites {
                record.cache.connected_sites = v.clone();
            }
            if let Some(v) = patch.network {
                record.cache.network = v;
            }
            self.backend.store(&record)?;
        }

        let delta = patch.delta();
        if delta.as_object().is_some_and(|m| !m.is_empty()) {
            self.ui.send(UiEvent::WalletStateUpdated(delta));
        }
        Ok(())
    }

    /// Decrypt and return one wallet's seed phrase.
    pub fn get_wallet_phrase(&self, index: usize, password: &str) -> Result<String, WalletdError> {
        let entries = self.decrypt_secrets(password)?;
        let entry = entries.get(index).ok_or(WalletdError::WalletNotFound)?;
        entry
            .phrase
            .clone()
            .ok_or_else(|| WalletdError::Internal("wallet has no seed phrase".into()))
    }

    /// Next unused "Wallet N" / "Account N" ordinal.
    pub async fn get_unique_name(&self, kind: NameKind) -> String {
        let proj = self.projection.read().await;
        let prefix = match kind {
            NameKind::Wallet => "Wallet",
            NameKind::Account => "Account",
        };

        let taken: Vec<&str> = match kind {
            NameKind::Wallet => proj.wallet.wallets.iter().map(|w| w.name.as_str()).collect(),
            NameKind::Account => proj
                .wallet
                .wallets
                .iter()
                .flat_map(|w| w.accounts.iter().map(|a| a.name.as_str()))
                .collect(),
        };

        let mut ordinal = 1usize;
        loop {
            let candidate = format!("{prefix} {ordinal}");
            if !taken.contains(&candidate.as_str()) {
                return candidate;
            }
            ordinal += 1;
        }
    }

    /// Drop the transient unlock state. Secrets on disk are untouched.
    pub async fn lock(&self) {
        {
            let mut proj = self.projection.write().await;
            proj.app.is_unlocked = false;
            proj.app.password = None;
        }
        self.ui.send(UiEvent::AppStateUpdated(
            serde_json::json!({ "isUnlocked": false }),
        ));
    }

    pub async fn is_unlocked(&self) -> bool {
        self.projection.read().await.app.is_unlocked
    }

    /// The transient session password, if unlocked.
    pub async fn password(&self) -> Option<String> {
        self.projection
            .read()
            .await
            .app
            .password
            .as_ref()
            .map(|p| p.as_str().to_owned())
    }

    pub async fn app_state(&self) -> AppState {
        self.projection.read().await.app.clone()
    }

    pub async fn wallet_state(&self) -> WalletState {
        self.projection.read().await.wallet.clone()
    }
}
