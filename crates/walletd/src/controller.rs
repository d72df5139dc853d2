use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use chain_btc::AddressType;
use wallet_keyring::mnemonic;

use crate::error::WalletdError;
use crate::registry::{NewKeyring, SendTx};
use crate::rpc::{canonical, ControllerKind, Envelope};
use crate::services::Services;
use crate::state::{AppStatePatch, WalletKind, WalletStatePatch};
use crate::vault::SaveWallets;

#[derive(Deserialize)]
struct PasswordParams {
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletParams {
    kind: WalletKind,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    address_type: Option<AddressType>,
    #[serde(default)]
    hide_root: bool,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Deserialize)]
struct IdParams {
    id: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeAddressTypeParams {
    #[serde(default)]
    wallet_index: Option<usize>,
    address_type: AddressType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameParams {
    id: usize,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhraseParams {
    index: usize,
    password: String,
}

#[derive(Deserialize)]
struct AddressParams {
    address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordParams {
    password: String,
    new_password: String,
}

#[derive(Deserialize)]
struct PhraseCheckParams {
    phrase: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    to: String,
    amount: u64,
    #[serde(default)]
    fee_rate: Option<u64>,
    #[serde(default)]
    receiver_to_pay_fee: bool,
}

#[derive(Deserialize)]
struct LanguageParams {
    language: String,
}

#[derive(Deserialize)]
struct OriginParams {
    origin: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveParams {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    force_reject: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectParams {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stay: bool,
    #[serde(default)]
    is_internal: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SurfaceClosedParams {
    window_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastParams {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    origin: Option<String>,
}

/// Dispatcher for extension-internal (popup/UI) connections: messages are
/// routed by envelope `type` to a controller and by `method` to one of its
/// member functions.
pub struct InternalController {
    services: Arc<Services>,
}

impl InternalController {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn handle(&self, envelope: Envelope) -> Result<Value, WalletdError> {
        match envelope.controller.ok_or(WalletdError::MethodNotFound)? {
            ControllerKind::Keyring => self.handle_keyring(envelope).await,
            ControllerKind::State => self.handle_state(envelope).await,
            ControllerKind::Notification => self.handle_notification(envelope).await,
            ControllerKind::Broadcast => self.handle_broadcast(envelope),
            ControllerKind::Openapi => self.handle_openapi(envelope).await,
        }
    }

    async fn handle_keyring(&self, envelope: Envelope) -> Result<Value, WalletdError> {
        let services = &self.services;
        match canonical(&envelope.method).as_str() {
            "isvaultempty" => Ok(json!(services.vault.is_vault_empty()?)),
            "generatemnemonic" => Ok(json!(mnemonic::generate_mnemonic()?)),
            "validatemnemonic" => {
                let params: PhraseCheckParams = serde_json::from_value(envelope.params)?;
                Ok(json!(mnemonic::validate_mnemonic(&params.phrase)))
            }
            "unlock" | "boot" => {
                let params: PasswordParams = serde_json::from_value(envelope.params)?;
                let (_, network) = services.vault.import_wallets(&params.password).await?;
                let wallets = services.keyrings.init(&params.password).await?;
                Ok(json!({ "wallets": wallets, "network": network.to_string() }))
            }
            "lock" => {
                services.keyrings.lock().await;
                Ok(Value::Null)
            }
            "createwallet" => {
                let params: CreateWalletParams = serde_json::from_value(envelope.params)?;
                let payload = match (params.kind, params.payload) {
                    (_, Some(payload)) => payload,
                    (WalletKind::Root, None) => mnemonic::generate_mnemonic()?,
                    (WalletKind::Simple, None) => {
                        return Err(WalletdError::InvalidParams(
                            "simple wallet requires a private key payload".into(),
                        ))
                    }
                };

                let first_address = services
                    .keyrings
                    .new_keyring(NewKeyring {
                        kind: params.kind,
                        payload,
                        address_type: params.address_type.unwrap_or_default(),
                        hide_root: params.hide_root,
                    })
                    .await?;

                let wallets = services.vault.wallet_state().await.wallets;
                let index = wallets.len().saturating_sub(1);
                let entry = services.keyrings.serialized_entry(index).await?;
                let password = match params.password {
                    Some(password) => password,
                    None => services
                        .vault
                        .password()
                        .await
                        .ok_or(WalletdError::PasswordRequired)?,
                };
                services
                    .vault
                    .save_wallets(SaveWallets {
                        password: Some(password),
                        wallets,
                        payload: Some(vec![entry]),
                        ..Default::default()
                    })
                    .await?;

                Ok(json!({ "address": first_address, "id": index }))
            }
            "deletewallet" => {
                let params: IdParams = serde_json::from_value(envelope.params)?;
                let wallets = services.keyrings.delete_wallet(params.id).await?;
                Ok(json!(wallets))
            }
            "changeaddresstype" => {
                let params: ChangeAddressTypeParams = serde_json::from_value(envelope.params)?;
                let state = services.vault.wallet_state().await;
                let index = params
                    .wallet_index
                    .or(state.selected_wallet)
                    .ok_or(WalletdError::InvalidKeyringIndex)?;

                let addresses = services
                    .keyrings
                    .change_address_type(index, params.address_type)
                    .await?;

                // The registry mutates the keyring; persisting the new
                // addresses into the wallet metadata is on us.
                let mut wallets = state.wallets;
                let wallet = wallets.get_mut(index).ok_or(WalletdError::WalletNotFound)?;
                wallet.address_type = params.address_type;
                for (position, address) in addresses.iter().enumerate() {
                    if let Some(account) = wallet.accounts.get_mut(position) {
                        account.address = Some(address.clone());
                    }
                }

                let entry = services.keyrings.serialized_entry(index).await?;
                let password = services
                    .vault
                    .password()
                    .await
                    .ok_or(WalletdError::PasswordRequired)?;
                services
                    .vault
                    .save_wallets(SaveWallets {
                        password: Some(password),
                        wallets,
                        payload: Some(vec![entry]),
                        ..Default::default()
                    })
                    .await?;

                Ok(json!(addresses))
            }
            "addaccount" => {
                let account = services.keyrings.add_account().await?;
                Ok(json!(account))
            }
            "renamewallet" => {
                let params: RenameParams = serde_json::from_value(envelope.params)?;
                let mut wallets = services.vault.wallet_state().await.wallets;
                let wallet = wallets
                    .get_mut(params.id)
                    .ok_or(WalletdError::WalletNotFound)?;
                wallet.name = params.name;
                services
                    .vault
                    .update_wallet_state(WalletStatePatch {
                        wallets: Some(wallets),
                        ..Default::default()
                    })
                    .await?;
                Ok(Value::Null)
            }
            "renameaccount" => {
                let params: RenameParams = serde_json::from_value(envelope.params)?;
                let state = services.vault.wallet_state().await;
                let selected = state
                    .selected_wallet
                    .ok_or(WalletdError::InvalidKeyringIndex)?;

                let mut wallets = state.wallets;
                let wallet = wallets
                    .get_mut(selected)
                    .ok_or(WalletdError::WalletNotFound)?;
                let account = wallet
                    .accounts
                    .iter_mut()
                    .find(|a| a.id == params.id as u32)
                    .ok_or(WalletdError::WalletNotFound)?;
                account.name = params.name;

                services
                    .vault
                    .update_wallet_state(WalletStatePatch {
                        wallets: Some(wallets),
                        ..Default::default()
                    })
                    .await?;
                Ok(Value::Null)
            }
            "getwalletphrase" => {
                let params: PhraseParams = serde_json::from_value(envelope.params)?;
                Ok(json!(services
                    .vault
                    .get_wallet_phrase(params.index, &params.password)?))
            }
            "exportaccount" => {
                let params: AddressParams = serde_json::from_value(envelope.params)?;
                Ok(json!(services.keyrings.export_account(&params.address).await?))
            }
            "changepassword" => {
                let params: ChangePasswordParams = serde_json::from_value(envelope.params)?;
                let wallets = services.vault.wallet_state().await.wallets;
                services
                    .vault
                    .save_wallets(SaveWallets {
                        password: Some(params.password),
                        wallets,
                        new_password: Some(params.new_password),
                        ..Default::default()
                    })
                    .await?;
                Ok(Value::Null)
            }
            "sendtransaction" => {
                let params: SendParams = serde_json::from_value(envelope.params)?;
                let address = services
                    .vault
                    .wallet_state()
                    .await
                    .current_address()
                    .ok_or(WalletdError::ChainDisconnected)?;
                let utxos = services
                    .chain
                    .utxos(&address)
                    .await
                    .map_err(|_| WalletdError::ChainDisconnected)?;
                let raw = services
                    .keyrings
                    .send_transaction(SendTx {
                        to: params.to,
                        amount_sat: params.amount,
                        utxos,
                        fee_rate_sat_vbyte: params.fee_rate.unwrap_or(1),
                        receiver_to_pay_fee: params.receiver_to_pay_fee,
                    })
                    .await?;
                Ok(json!(raw))
            }
            _ => Err(WalletdError::MethodNotFound),
        }
    }

    async fn handle_state(&self, envelope: Envelope) -> Result<Value, WalletdError> {
        let services = &self.services;
        match canonical(&envelope.method).as_str() {
            "getappstate" => {
                let app = services.vault.app_state().await;
                Ok(json!({
                    "isUnlocked": app.is_unlocked,
                    "language": app.language,
                    "addressBook": app.address_book,
                }))
            }
            "getwalletstate" => Ok(json!(services.vault.wallet_state().await)),
            "switchwallet" => {
                let params: IdParams = serde_json::from_value(envelope.params)?;
                let state = services.vault.wallet_state().await;
                if params.id >= state.wallets.len() {
                    return Err(WalletdError::WalletNotFound);
                }
                services
                    .vault
                    .update_wallet_state(WalletStatePatch {
                        selected_wallet: Some(Some(params.id)),
                        selected_account: Some(Some(0)),
                        ..Default::default()
                    })
                    .await?;
                self.after_account_switch().await?;
                Ok(Value::Null)
            }
            "switchaccount" => {
                let params: IdParams = serde_json::from_value(envelope.params)?;
                let state = services.vault.wallet_state().await;
                let wallet = state
                    .selected_wallet
                    .and_then(|index| state.wallets.get(index))
                    .ok_or(WalletdError::WalletNotFound)?;
                if !wallet.accounts.iter().any(|a| a.id == params.id as u32) {
                    return Err(WalletdError::WalletNotFound);
                }
                services
                    .vault
                    .update_wallet_state(WalletStatePatch {
                        selected_account: Some(Some(params.id as u32)),
                        ..Default::default()
                    })
                    .await?;
                self.after_account_switch().await?;
                Ok(Value::Null)
            }
            "setlanguage" => {
                let params: LanguageParams = serde_json::from_value(envelope.params)?;
                services
                    .vault
                    .update_app_state(AppStatePatch {
                        language: Some(params.language),
                        ..Default::default()
                    })
                    .await?;
                Ok(Value::Null)
            }
            "addaddressbook" => {
                let params: AddressParams = serde_json::from_value(envelope.params)?;
                let mut book = services.vault.app_state().await.address_book;
                if !book.contains(&params.address) {
                    book.push(params.address);
                }
                services
                    .vault
                    .update_app_state(AppStatePatch {
                        address_book: Some(book),
                        ..Default::default()
                    })
                    .await?;
                Ok(Value::Null)
            }
            "removeaddressbook" => {
                let params: AddressParams = serde_json::from_value(envelope.params)?;
                let mut book = services.vault.app_state().await.address_book;
                book.retain(|entry| entry != &params.address);
                services
                    .vault
                    .update_app_state(AppStatePatch {
                        address_book: Some(book),
                        ..Default::default()
                    })
                    .await?;
                Ok(Value::Null)
            }
            "getconnectedsites" => Ok(json!(services.permissions.connected_sites().await)),
            "removeconnectedsite" => {
                let params: OriginParams = serde_json::from_value(envelope.params)?;
                services.permissions.remove_site(&params.origin).await?;
                Ok(Value::Null)
            }
            _ => Err(WalletdError::MethodNotFound),
        }
    }

    /// Account switches revoke every site's connection and notify pages.
    async fn after_account_switch(&self) -> Result<(), WalletdError> {
        let services = &self.services;
        services.permissions.disconnect_sites().await?;
        let accounts: Vec<String> = services
            .vault
            .wallet_state()
            .await
            .current_address()
            .into_iter()
            .collect();
        services
            .sessions
            .broadcast("accountsChanged", &json!(accounts), None);
        Ok(())
    }

    async fn handle_notification(&self, envelope: Envelope) -> Result<Value, WalletdError> {
        let services = &self.services;
        match canonical(&envelope.method).as_str() {
            "getapproval" => match services.approvals.pending_approval() {
                Some(approval) => Ok(json!({
                    "kind": approval.kind,
                    "origin": approval.origin,
                    "params": approval.params,
                })),
                None => Ok(Value::Null),
            },
            "resolveapproval" => {
                let params: ResolveParams = serde_json::from_value(envelope.params)?;
                services
                    .approvals
                    .resolve_approval(params.data, params.force_reject)
                    .await;
                Ok(Value::Null)
            }
            "rejectapproval" => {
                let params: RejectParams = serde_json::from_value(envelope.params)?;
                services
                    .approvals
                    .reject_approval(params.error, params.stay, params.is_internal)
                    .await;
                Ok(Value::Null)
            }
            "surfaceclosed" => {
                let params: SurfaceClosedParams = serde_json::from_value(envelope.params)?;
                services.approvals.on_surface_closed(params.window_id).await;
                Ok(Value::Null)
            }
            _ => Err(WalletdError::MethodNotFound),
        }
    }

    fn handle_broadcast(&self, envelope: Envelope) -> Result<Value, WalletdError> {
        match canonical(&envelope.method).as_str() {
            "send" => {
                let params: BroadcastParams = serde_json::from_value(envelope.params)?;
                self.services
                    .sessions
                    .broadcast(&params.event, &params.data, params.origin.as_deref());
                Ok(Value::Null)
            }
            _ => Err(WalletdError::MethodNotFound),
        }
    }

    async fn handle_openapi(&self, envelope: Envelope) -> Result<Value, WalletdError> {
        let services = &self.services;
        match canonical(&envelope.method).as_str() {
            "getbalance" => {
                let params: AddressParams = serde_json::from_value(envelope.params)?;
                let satoshis = services
                    .chain
                    .balance(&params.address)
                    .await
                    .map_err(|_| WalletdError::ChainDisconnected)?;
                Ok(json!(satoshis))
            }
            "getutxos" => {
                let params: AddressParams = serde_json::from_value(envelope.params)?;
                let utxos = services
                    .chain
                    .utxos(&params.address)
                    .await
                    .map_err(|_| WalletdError::ChainDisconnected)?;
                Ok(json!(utxos))
            }
            _ => Err(WalletdError::MethodNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::approval::{ApprovalData, ApprovalSurface};
    use crate::backend::MemoryBackend;
    use crate::chain::ChainClient;
    use crate::config::Config;
    use crate::events::NullSink;
    use crate::rpc::ControllerKind;
    use chain_btc::utxo::Utxo;
    use chain_btc::BtcNetwork;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    struct NoSurface;

    #[async_trait]
    impl ApprovalSurface for NoSurface {
        async fn open(&self, _data: &ApprovalData) -> Result<u64, WalletdError> {
            Ok(0)
        }
        async fn close(&self, _window_id: u64) {}
    }

    struct EmptyChain;

    #[async_trait]
    impl ChainClient for EmptyChain {
        async fn balance(&self, _address: &str) -> Result<u64, WalletdError> {
            Ok(0)
        }
        async fn utxos(&self, _address: &str) -> Result<Vec<Utxo>, WalletdError> {
            Ok(Vec::new())
        }
    }

    fn controller() -> InternalController {
        let services = Services::new(
            Config {
                network: BtcNetwork::Testnet,
                ..Default::default()
            },
            Arc::new(MemoryBackend::new()),
            Arc::new(NoSurface),
            Arc::new(EmptyChain),
            Arc::new(NullSink),
        );
        InternalController::new(services)
    }

    fn envelope(kind: ControllerKind, method: &str, params: Value) -> Envelope {
        Envelope {
            method: method.into(),
            params,
            controller: Some(kind),
        }
    }

    async fn create_test_wallet(controller: &InternalController) -> Value {
        controller
            .handle(envelope(
                ControllerKind::Keyring,
                "createWallet",
                json!({
                    "kind": "root",
                    "payload": PHRASE,
                    "addressType": "P2WPKH",
                    "hideRoot": true,
                    "password": "pw1",
                }),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_type_or_method_is_method_not_found() {
        let controller = controller();

        let err = controller
            .handle(Envelope {
                method: "anything".into(),
                params: Value::Null,
                controller: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WalletdError::MethodNotFound));

        let err = controller
            .handle(envelope(ControllerKind::Keyring, "noSuchMethod", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletdError::MethodNotFound));
    }

    #[tokio::test]
    async fn create_wallet_then_lock_unlock_cycle() {
        let controller = controller();

        let empty = controller
            .handle(envelope(ControllerKind::Keyring, "isVaultEmpty", Value::Null))
            .await
            .unwrap();
        assert_eq!(empty, json!(true));

        let created = create_test_wallet(&controller).await;
        assert!(created["address"].as_str().unwrap().starts_with("tb1q"));
        assert_eq!(created["id"], json!(0));

        controller
            .handle(envelope(ControllerKind::Keyring, "lock", Value::Null))
            .await
            .unwrap();
        assert_eq!(controller.services.keyrings.keyring_count().await, 0);

        let unlocked = controller
            .handle(envelope(
                ControllerKind::Keyring,
                "unlock",
                json!({"password": "pw1"}),
            ))
            .await
            .unwrap();
        assert_eq!(unlocked["wallets"].as_array().unwrap().len(), 1);
        assert_eq!(unlocked["network"], json!("testnet"));
        assert_eq!(controller.services.keyrings.keyring_count().await, 1);
    }

    #[tokio::test]
    async fn wrong_unlock_password_is_rejected() {
        let controller = controller();
        create_test_wallet(&controller).await;

        let err = controller
            .handle(envelope(
                ControllerKind::Keyring,
                "unlock",
                json!({"password": "nope"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletdError::DecryptionFailed));
    }

    #[tokio::test]
    async fn app_state_snapshot_never_contains_the_password() {
        let controller = controller();
        create_test_wallet(&controller).await;

        let app = controller
            .handle(envelope(ControllerKind::State, "getAppState", Value::Null))
            .await
            .unwrap();
        assert_eq!(app["isUnlocked"], json!(true));
        assert!(!app.to_string().contains("pw1"));
    }

    #[tokio::test]
    async fn account_switch_disconnects_sites() {
        let controller = controller();
        create_test_wallet(&controller).await;
        controller
            .services
            .permissions
            .add_connected_site("https://a.example", "A", "a.png")
            .await
            .unwrap();

        controller
            .handle(envelope(
                ControllerKind::Keyring,
                "addAccount",
                Value::Null,
            ))
            .await
            .unwrap();
        controller
            .handle(envelope(ControllerKind::State, "switchAccount", json!({"id": 0})))
            .await
            .unwrap();

        assert!(
            !controller
                .services
                .permissions
                .site_is_connected("https://a.example")
                .await
        );
        // The identity is kept for a later reconnect.
        assert_eq!(controller.services.permissions.connected_sites().await.len(), 1);
    }

    #[tokio::test]
    async fn phrase_roundtrip_through_the_controller() {
        let controller = controller();
        create_test_wallet(&controller).await;

        let phrase = controller
            .handle(envelope(
                ControllerKind::Keyring,
                "getWalletPhrase",
                json!({"index": 0, "password": "pw1"}),
            ))
            .await
            .unwrap();
        assert_eq!(phrase, json!(PHRASE));
    }

    #[tokio::test]
    async fn change_address_type_persists_new_addresses() {
        let controller = controller();
        create_test_wallet(&controller).await;

        let addresses = controller
            .handle(envelope(
                ControllerKind::Keyring,
                "changeAddressType",
                json!({"addressType": "P2TR"}),
            ))
            .await
            .unwrap();
        assert!(addresses[0].as_str().unwrap().starts_with("tb1p"));

        let state = controller.services.vault.wallet_state().await;
        assert_eq!(state.wallets[0].address_type, chain_btc::AddressType::P2tr);
        assert_eq!(
            state.wallets[0].accounts[0].address.as_deref(),
            addresses[0].as_str()
        );

        // The new scheme survives a restart.
        controller
            .handle(envelope(ControllerKind::Keyring, "lock", Value::Null))
            .await
            .unwrap();
        let unlocked = controller
            .handle(envelope(
                ControllerKind::Keyring,
                "unlock",
                json!({"password": "pw1"}),
            ))
            .await
            .unwrap();
        assert!(unlocked["wallets"][0]["accounts"][0]["address"]
            .as_str()
            .unwrap()
            .starts_with("tb1p"));
    }

    #[tokio::test]
    async fn address_book_add_remove() {
        let controller = controller();

        controller
            .handle(envelope(
                ControllerKind::State,
                "addAddressBook",
                json!({"address": "tb1qsomewhere"}),
            ))
            .await
            .unwrap();
        controller
            .handle(envelope(
                ControllerKind::State,
                "addAddressBook",
                json!({"address": "tb1qsomewhere"}),
            ))
            .await
            .unwrap();

        let app = controller
            .handle(envelope(ControllerKind::State, "getAppState", Value::Null))
            .await
            .unwrap();
        assert_eq!(app["addressBook"], json!(["tb1qsomewhere"]));

        controller
            .handle(envelope(
                ControllerKind::State,
                "removeAddressBook",
                json!({"address": "tb1qsomewhere"}),
            ))
            .await
            .unwrap();
        let app = controller
            .handle(envelope(ControllerKind::State, "getAppState", Value::Null))
            .await
            .unwrap();
        assert_eq!(app["addressBook"], json!([]));
    }
}

