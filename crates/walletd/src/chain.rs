use async_trait::async_trait;
use chain_btc::utxo::Utxo;

use crate::error::WalletdError;

/// Blockchain data client, provided by the host (external collaborator).
///
/// The daemon never fetches chain data itself; balances and UTXO sets come
/// through this trait and failures surface as [`WalletdError::ChainDisconnected`]
/// at the RPC layer.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn balance(&self, address: &str) -> Result<u64, WalletdError>;
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, WalletdError>;
}
