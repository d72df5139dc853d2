use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::services::Services;
use crate::state::{AccountBalance, WalletStatePatch};

/// Background task that periodically refreshes the selected account's
/// balance through the chain client.
///
/// Fetch failures are swallowed and retried on the next tick. A result for
/// an account that is no longer selected by the time the fetch completes
/// is discarded rather than written.
pub struct BalancePoller {
    services: Arc<Services>,
    poll_interval: Duration,
}

impl BalancePoller {
    pub fn new(services: Arc<Services>) -> Self {
        let poll_interval = services.config.balance_poll_interval;
        Self {
            services,
            poll_interval,
        }
    }

    /// Run the poller loop until the cancellation token is triggered.
    ///
    /// Spawn as a background task:
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "balance poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("balance poller shutting down");
                return;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("balance poller shutting down");
                    return;
                }
            }
        }
    }

    /// One refresh sweep: snapshot the selection, fetch, and write back
    /// only if the selection is unchanged.
    pub(crate) async fn poll_step(&self) {
        let services = &self.services;

        let snapshot = services.vault.wallet_state().await;
        let Some(address) = snapshot.current_address() else {
            return;
        };

        let amount_sat = match services.chain.balance(&address).await {
            Ok(amount) => amount,
            Err(e) => {
                warn!(%address, error = %e, "balance fetch failed; will retry");
                return;
            }
        };

        // The selection may have moved while the fetch was in flight.
        let current = services.vault.wallet_state().await;
        if current.current_address().as_deref() != Some(address.as_str()) {
            return;
        }

        let result = services
            .vault
            .update_wallet_state(WalletStatePatch {
                balance: Some(Some(AccountBalance {
                    address,
                    amount_sat,
                })),
                ..Default::default()
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "balance write failed; will retry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::approval::{ApprovalBroker, ApprovalData, ApprovalSurface};
    use crate::backend::MemoryBackend;
    use crate::chain::ChainClient;
    use crate::config::Config;
    use crate::error::WalletdError;
    use crate::events::NullSink;
    use crate::state::{Account, Wallet, WalletKind};
    use chain_btc::utxo::Utxo;
    use chain_btc::AddressType;

    struct NoSurface;

    #[async_trait]
    impl ApprovalSurface for NoSurface {
        async fn open(&self, _data: &ApprovalData) -> Result<u64, WalletdError> {
            Ok(0)
        }
        async fn close(&self, _window_id: u64) {}
    }

    struct ScriptedChain {
        balance: Mutex<Result<u64, ()>>,
        /// Selection change injected between fetch and write-back.
        switch_on_fetch: AtomicBool,
        services: Mutex<Option<Arc<Services>>>,
    }

    impl ScriptedChain {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                balance: Mutex::new(Ok(0)),
                switch_on_fetch: AtomicBool::new(false),
                services: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChain {
        async fn balance(&self, _address: &str) -> Result<u64, WalletdError> {
            if self.switch_on_fetch.swap(false, Ordering::SeqCst) {
                let services = self.services.lock().unwrap().clone().unwrap();
                services
                    .vault
                    .update_wallet_state(WalletStatePatch {
                        selected_account: Some(Some(1)),
                        ..Default::default()
                    })
                    .await
                    .unwrap();
            }
            self.balance
                .lock()
                .unwrap()
                .clone()
                .map_err(|_| WalletdError::ChainDisconnected)
        }

        async fn utxos(&self, _address: &str) -> Result<Vec<Utxo>, WalletdError> {
            Ok(Vec::new())
        }
    }

    fn two_account_wallet() -> Wallet {
        Wallet {
            id: 0,
            name: "Wallet 1".into(),
            address_type: AddressType::P2wpkh,
            kind: WalletKind::Root,
            accounts: vec![
                Account {
                    id: 0,
                    name: "Account 1".into(),
                    address: Some("tb1qfirst".into()),
                },
                Account {
                    id: 1,
                    name: "Account 2".into(),
                    address: Some("tb1qsecond".into()),
                },
            ],
            hide_root: false,
        }
    }

    async fn setup(chain: Arc<ScriptedChain>) -> Arc<Services> {
        let services = Services::new(
            Config::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(NoSurface),
            chain.clone(),
            Arc::new(NullSink),
        );
        *chain.services.lock().unwrap() = Some(services.clone());

        services
            .vault
            .update_wallet_state(WalletStatePatch {
                wallets: Some(vec![two_account_wallet()]),
                selected_wallet: Some(Some(0)),
                selected_account: Some(Some(0)),
                ..Default::default()
            })
            .await
            .unwrap();
        services
    }

    #[tokio::test]
    async fn writes_the_fetched_balance() {
        let chain = ScriptedChain::new();
        *chain.balance.lock().unwrap() = Ok(123_456);
        let services = setup(chain).await;

        BalancePoller::new(services.clone()).poll_step().await;

        let balance = services.vault.wallet_state().await.balance.unwrap();
        assert_eq!(balance.address, "tb1qfirst");
        assert_eq!(balance.amount_sat, 123_456);
    }

    #[tokio::test]
    async fn fetch_failure_is_swallowed() {
        let chain = ScriptedChain::new();
        *chain.balance.lock().unwrap() = Err(());
        let services = setup(chain.clone()).await;

        BalancePoller::new(services.clone()).poll_step().await;
        assert!(services.vault.wallet_state().await.balance.is_none());

        // Next tick succeeds.
        *chain.balance.lock().unwrap() = Ok(42);
        BalancePoller::new(services.clone()).poll_step().await;
        assert_eq!(
            services.vault.wallet_state().await.balance.unwrap().amount_sat,
            42
        );
    }

    #[tokio::test]
    async fn stale_result_is_discarded_after_account_switch() {
        let chain = ScriptedChain::new();
        *chain.balance.lock().unwrap() = Ok(999);
        chain.switch_on_fetch.store(true, Ordering::SeqCst);
        let services = setup(chain).await;

        BalancePoller::new(services.clone()).poll_step().await;

        // The fetch was for the old account; nothing may be written.
        assert!(services.vault.wallet_state().await.balance.is_none());
    }

    #[tokio::test]
    async fn no_selection_means_no_fetch() {
        let chain = ScriptedChain::new();
        let services = setup(chain).await;
        services
            .vault
            .update_wallet_state(WalletStatePatch {
                selected_wallet: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();

        BalancePoller::new(services.clone()).poll_step().await;
        assert!(services.vault.wallet_state().await.balance.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let chain = ScriptedChain::new();
        let services = setup(chain).await;
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(BalancePoller::new(services).run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
