use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use chain_btc::utxo::estimate_fee;
use chain_btc::BtcNetwork;

use crate::error::WalletdError;
use crate::gateway::{Gateway, PageRequest};
use crate::registry::SendTx;
use crate::rpc::{canonical, PageMessage, RpcMethod};
use crate::services::Services;
use crate::session::{ConnId, SessionMeta, SessionPush};
use crate::state::WalletStatePatch;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Deserialize)]
struct SignMessageParams {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignPsbtParams {
    psbt_hex: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiPsbtParams {
    psbt_hexs: Vec<String>,
}

#[derive(Deserialize)]
struct SwitchNetworkParams {
    network: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalculateFeeParams {
    psbt_hex: String,
    fee_rate: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTxParams {
    to: String,
    amount: u64,
    #[serde(default)]
    fee_rate: Option<u64>,
    #[serde(default)]
    receiver_to_pay_fee: bool,
}

/// Execute the handler for a request that has passed every gate.
/// `approval_res` carries the approval round's resolution, when one ran.
pub(crate) async fn dispatch(
    services: &Services,
    request: &PageRequest,
    approval_res: Option<Value>,
) -> Result<Value, WalletdError> {
    match request.method {
        RpcMethod::Connect => {
            let state = services.vault.wallet_state().await;
            let accounts: Vec<String> = state.current_address().into_iter().collect();
            Ok(json!(accounts))
        }
        RpcMethod::GetVersion => Ok(json!(VERSION)),
        RpcMethod::GetNetwork => {
            Ok(json!(services.vault.wallet_state().await.network.to_string()))
        }
        RpcMethod::IsConnected => Ok(json!(
            services
                .permissions
                .site_is_connected(&request.session.origin)
                .await
        )),
        RpcMethod::GetBalance => {
            let state = services.vault.wallet_state().await;
            let address = state
                .current_address()
                .ok_or(WalletdError::ChainDisconnected)?;
            let satoshis = services
                .chain
                .balance(&address)
                .await
                .map_err(|_| WalletdError::ChainDisconnected)?;
            Ok(json!({ "address": address, "satoshis": satoshis }))
        }
        RpcMethod::GetAccountName => services
            .vault
            .wallet_state()
            .await
            .current_account_name()
            .map(|name| json!(name))
            .ok_or(WalletdError::ChainDisconnected),
        RpcMethod::GetAccount => services
            .vault
            .wallet_state()
            .await
            .current_address()
            .map(|address| json!(address))
            .ok_or(WalletdError::ChainDisconnected),
        RpcMethod::GetPublicKey => Ok(json!(services.keyrings.public_key().await?)),
        RpcMethod::CalculateFee => {
            let params: CalculateFeeParams = serde_json::from_value(request.params.clone())?;
            let bytes = hex::decode(&params.psbt_hex)
                .map_err(|e| WalletdError::InvalidParams(format!("psbt hex: {e}")))?;
            let psbt = bitcoin::Psbt::deserialize(&bytes)
                .map_err(|e| WalletdError::InvalidParams(format!("psbt: {e}")))?;

            let state = services.vault.wallet_state().await;
            let address_type = state
                .selected_wallet
                .and_then(|index| state.wallets.get(index))
                .map(|wallet| wallet.address_type)
                .unwrap_or_default();

            Ok(json!(estimate_fee(
                psbt.inputs.len(),
                psbt.unsigned_tx.output.len(),
                params.fee_rate,
                address_type,
            )))
        }
        RpcMethod::SignMessage => {
            let params: SignMessageParams = serde_json::from_value(request.params.clone())?;
            Ok(json!(services.keyrings.sign_message(&params.text).await?))
        }
        RpcMethod::CreateTx => {
            let params: CreateTxParams = serde_json::from_value(request.params.clone())?;
            let state = services.vault.wallet_state().await;
            let address = state
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
        RpcMethod::SignPsbt => {
            let params: SignPsbtParams = serde_json::from_value(request.params.clone())?;
            Ok(json!(services.keyrings.sign_psbt(&params.psbt_hex).await?))
        }
        RpcMethod::MultiPsbtSign => {
            let params: MultiPsbtParams = serde_json::from_value(request.params.clone())?;
            Ok(json!(
                services.keyrings.multi_sign_psbt(&params.psbt_hexs).await?
            ))
        }
        RpcMethod::SwitchNetwork => {
            let params: SwitchNetworkParams = serde_json::from_value(request.params.clone())?;
            let network: BtcNetwork = params
                .network
                .parse()
                .map_err(|_| WalletdError::InvalidParams(format!("network: {}", params.network)))?;

            if services.vault.wallet_state().await.network != network {
                services
                    .vault
                    .update_wallet_state(WalletStatePatch {
                        network: Some(network),
                        ..Default::default()
                    })
                    .await?;
                services.keyrings.rehydrate().await?;
                services
                    .sessions
                    .broadcast("networkChanged", &json!(network.to_string()), None);
            }
            Ok(json!(network.to_string()))
        }
        RpcMethod::InscribeTransfer => Ok(approval_res.unwrap_or(Value::Null)),
    }
}

/// Entry point for page-origin connections: handles the two reserved
/// methods, resolves sessions, and routes everything else through the
/// authorization gateway.
pub struct PageController {
    services: Arc<Services>,
    gateway: Gateway,
}

impl PageController {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            gateway: Gateway::new(services.clone()),
            services,
        }
    }

    /// Handle one raw message from connection `conn`. `push` is the
    /// transport's callback for unsolicited events, captured on checkin.
    pub async fn handle_message(
        &self,
        conn: ConnId,
        message: PageMessage,
        push: Arc<dyn SessionPush>,
    ) -> Result<Value, WalletdError> {
        match canonical(&message.method).as_str() {
            // Session bootstrap, handled before vault presence is checked.
            "tabcheckin" => {
                let meta = message
                    .session
                    .or_else(|| serde_json::from_value::<SessionMeta>(message.params).ok())
                    .unwrap_or_default();
                self.services.sessions.create_session(conn, meta, push);
                Ok(Value::Null)
            }
            // Provider bootstrap state, no connection required.
            "getproviderstate" => {
                let state = self.services.vault.wallet_state().await;
                let accounts: Vec<String> = state.current_address().into_iter().collect();
                Ok(json!({
                    "network": state.network.to_string(),
                    "isUnlocked": self.services.vault.is_unlocked().await,
                    "accounts": accounts,
                }))
            }
            _ => {
                let session = self
                    .services
                    .sessions
                    .get_session(conn)
                    .ok_or(WalletdError::NoSession)?;
                let method =
                    RpcMethod::from_wire(&message.method).ok_or(WalletdError::MethodNotFound)?;
                self.gateway
                    .handle(PageRequest {
                        method,
                        params: message.params,
                        session,
                    })
                    .await
            }
        }
    }

    /// The transport reports a closed connection. In-flight operations
    /// already past the gateway run to completion; only future requests
    /// from this connection are rejected.
    pub fn on_disconnect(&self, conn: ConnId) {
        self.services.sessions.delete_session(conn);
    }
}
