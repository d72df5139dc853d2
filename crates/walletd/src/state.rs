use crypto_utils::zeroizing::ZeroizingString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chain_btc::{AddressType, BtcNetwork};

/// One account within a wallet. `id` is the account's index in the wallet's
/// derivation sequence; `address` is derived lazily and may be absent in the
/// persisted form until the keyring is reconstructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    Simple,
    Root,
}

/// Public wallet metadata. Never contains secret material; the signing side
/// lives in the keyring registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: usize,
    pub name: String,
    pub address_type: AddressType,
    pub kind: WalletKind,
    pub accounts: Vec<Account>,
    pub hide_root: bool,
}

/// An origin that has completed the one-time consent gate. Survives
/// restarts, independently of live sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedSite {
    pub origin: String,
    pub name: String,
    pub icon: String,
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub address: String,
    pub amount_sat: u64,
}

/// In-memory projection of app-level state. The password is memory-only;
/// everything else mirrors the durable cache.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub is_unlocked: bool,
    pub password: Option<ZeroizingString>,
    pub language: Option<String>,
    pub address_book: Vec<String>,
}

/// In-memory projection of wallet-level state. `balance` is memory-only.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub wallets: Vec<Wallet>,
    pub selected_wallet: Option<usize>,
    pub selected_account: Option<u32>,
    pub pending_wallet: Option<Wallet>,
    pub connected_sites: Vec<ConnectedSite>,
    pub network: BtcNetwork,
    pub balance: Option<AccountBalance>,
}

impl WalletState {
    /// The selected wallet's currently selected account address, if any.
    pub fn current_address(&self) -> Option<String> {
        let wallet = self.wallets.get(self.selected_wallet?)?;
        let account = self.selected_account.unwrap_or(0);
        wallet
            .accounts
            .iter()
            .find(|a| a.id == account)
            .and_then(|a| a.address.clone())
    }

    /// The selected wallet's currently selected account name, if any.
    pub fn current_account_name(&self) -> Option<String> {
        let wallet = self.wallets.get(self.selected_wallet?)?;
        let account = self.selected_account.unwrap_or(0);
        wallet
            .accounts
            .iter()
            .find(|a| a.id == account)
            .map(|a| a.name.clone())
    }
}

/// Shallow-merge patch for [`AppState`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct AppStatePatch {
    pub is_unlocked: Option<bool>,
    pub password: Option<Option<ZeroizingString>>,
    pub language: Option<String>,
    pub address_book: Option<Vec<String>>,
}

impl AppStatePatch {
    pub fn apply(&self, state: &mut AppState) {
        if let Some(v) = self.is_unlocked {
            state.is_unlocked = v;
        }
        if let Some(v) = &self.password {
            state.password = v.clone();
        }
        if let Some(v) = &self.language {
            state.language = Some(v.clone());
        }
        if let Some(v) = &self.address_book {
            state.address_book = v.clone();
        }
    }

    /// The delta broadcast to the UI. Transient fields (the password) never
    /// appear here.
    pub fn delta(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(v) = self.is_unlocked {
            map.insert("isUnlocked".into(), json!(v));
        }
        if let Some(v) = &self.language {
            map.insert("language".into(), json!(v));
        }
        if let Some(v) = &self.address_book {
            map.insert("addressBook".into(), json!(v));
        }
        Value::Object(map)
    }
}

/// Shallow-merge patch for [`WalletState`].
#[derive(Debug, Clone, Default)]
pub struct WalletStatePatch {
    pub wallets: Option<Vec<Wallet>>,
    pub selected_wallet: Option<Option<usize>>,
    pub selected_account: Option<Option<u32>>,
    pub pending_wallet: Option<Option<Wallet>>,
    pub connected_sites: Option<Vec<ConnectedSite>>,
    pub network: Option<BtcNetwork>,
    pub balance: Option<Option<AccountBalance>>,
}

impl WalletStatePatch {
    pub fn apply(&self, state: &mut WalletState) {
        if let Some(v) = &self.wallets {
            state.wallets = v.clone();
        }
        if let Some(v) = self.selected_wallet {
            state.selected_wallet = v;
        }
        if let Some(v) = self.selected_account {
            state.selected_account = v;
        }
        if let Some(v) = &self.pending_wallet {
            state.pending_wallet = v.clone();
        }
        if let Some(v) = &self.connected_sites {
            state.connected_sites = v.clone();
        }
        if let Some(v) = self.network {
            state.network = v;
        }
        if let Some(v) = &self.balance {
            state.balance = v.clone();
        }
    }

    pub fn delta(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(v) = &self.wallets {
            map.insert("wallets".into(), json!(v));
        }
        if let Some(v) = self.selected_wallet {
            map.insert("selectedWallet".into(), json!(v));
        }
        if let Some(v) = self.selected_account {
            map.insert("selectedAccount".into(), json!(v));
        }
        if let Some(v) = &self.pending_wallet {
            map.insert("pendingWallet".into(), json!(v));
        }
        if let Some(v) = &self.connected_sites {
            map.insert("connectedSites".into(), json!(v));
        }
        if let Some(v) = self.network {
            map.insert("network".into(), json!(v));
        }
        if let Some(v) = &self.balance {
            map.insert("balance".into(), json!(v));
        }
        Value::Object(map)
    }

    /// Whether any of the patched fields belong to the durable cache schema.
    pub fn touches_durable_fields(&self) -> bool {
        self.wallets.is_some()
            || self.selected_wallet.is_some()
            || self.selected_account.is_some()
            || self.pending_wallet.is_some()
            || self.connected_sites.is_some()
            || self.network.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_with_account(address: Option<&str>) -> Wallet {
        Wallet {
            id: 0,
            name: "Wallet 1".into(),
            address_type: AddressType::P2wpkh,
            kind: WalletKind::Root,
            accounts: vec![Account {
                id: 0,
                name: "Account 1".into(),
                address: address.map(Into::into),
            }],
            hide_root: false,
        }
    }

    #[test]
    fn current_address_requires_selection() {
        let mut state = WalletState {
            wallets: vec![wallet_with_account(Some("tb1qexample"))],
            ..Default::default()
        };
        assert_eq!(state.current_address(), None);

        state.selected_wallet = Some(0);
        assert_eq!(state.current_address().as_deref(), Some("tb1qexample"));
    }

    #[test]
    fn current_address_is_none_before_hydration() {
        let state = WalletState {
            wallets: vec![wallet_with_account(None)],
            selected_wallet: Some(0),
            ..Default::default()
        };
        assert_eq!(state.current_address(), None);
    }

    #[test]
    fn app_patch_merges_shallowly() {
        let mut state = AppState {
            language: Some("en".into()),
            ..Default::default()
        };
        AppStatePatch {
            is_unlocked: Some(true),
            ..Default::default()
        }
        .apply(&mut state);

        assert!(state.is_unlocked);
        assert_eq!(state.language.as_deref(), Some("en"));
    }

    #[test]
    fn password_never_appears_in_delta() {
        let patch = AppStatePatch {
            is_unlocked: Some(true),
            password: Some(Some("hunter2".into())),
            ..Default::default()
        };
        let delta = patch.delta();
        assert_eq!(delta, json!({"isUnlocked": true}));
    }

    #[test]
    fn wallet_patch_can_clear_selection() {
        let mut state = WalletState {
            selected_wallet: Some(2),
            ..Default::default()
        };
        WalletStatePatch {
            selected_wallet: Some(None),
            ..Default::default()
        }
        .apply(&mut state);
        assert_eq!(state.selected_wallet, None);
    }

    #[test]
    fn balance_is_not_a_durable_field() {
        let patch = WalletStatePatch {
            balance: Some(Some(AccountBalance {
                address: "tb1q".into(),
                amount_sat: 1,
            })),
            ..Default::default()
        };
        assert!(!patch.touches_durable_fields());

        let patch = WalletStatePatch {
            network: Some(BtcNetwork::Testnet),
            ..Default::default()
        };
        assert!(patch.touches_durable_fields());
    }

    #[test]
    fn wallet_serializes_camel_case_without_secret_fields() {
        let json = serde_json::to_string(&wallet_with_account(None)).unwrap();
        assert!(json.contains("\"addressType\""));
        assert!(json.contains("\"hideRoot\""));
        assert!(!json.contains("address\":null"));
    }
}
