use std::sync::Arc;

use crate::error::WalletdError;
use crate::state::{ConnectedSite, WalletStatePatch};
use crate::vault::Vault;

/// Origin → connection state, persisted inside the vault cache so consent
/// survives restarts. Independent of live sessions.
pub struct PermissionStore {
    vault: Arc<Vault>,
}

impl PermissionStore {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    pub async fn connected_sites(&self) -> Vec<ConnectedSite> {
        self.vault.wallet_state().await.connected_sites
    }

    pub async fn site_is_connected(&self, origin: &str) -> bool {
        self.connected_sites()
            .await
            .iter()
            .any(|site| site.origin == origin && site.is_connected)
    }

    /// Mark `origin` connected. Idempotent: an existing entry is re-marked
    /// connected (and its identity refreshed) rather than duplicated.
    pub async fn add_connected_site(
        &self,
        origin: &str,
        name: &str,
        icon: &str,
    ) -> Result<(), WalletdError> {
        let mut sites = self.connected_sites().await;
        match sites.iter_mut().find(|site| site.origin == origin) {
            Some(site) => {
                site.name = name.to_owned();
                site.icon = icon.to_owned();
                site.is_connected = true;
            }
            None => sites.push(ConnectedSite {
                origin: origin.to_owned(),
                name: name.to_owned(),
                icon: icon.to_owned(),
                is_connected: true,
            }),
        }
        self.persist(sites).await
    }

    /// Flip every site to disconnected without forgetting its identity.
    /// Used on account switch.
    pub async fn disconnect_sites(&self) -> Result<(), WalletdError> {
        let mut sites = self.connected_sites().await;
        for site in &mut sites {
            site.is_connected = false;
        }
        self.persist(sites).await
    }

    pub async fn remove_site(&self, origin: &str) -> Result<(), WalletdError> {
        let mut sites = self.connected_sites().await;
        sites.retain(|site| site.origin != origin);
        self.persist(sites).await
    }

    async fn persist(&self, sites: Vec<ConnectedSite>) -> Result<(), WalletdError> {
        self.vault
            .update_wallet_state(WalletStatePatch {
                connected_sites: Some(sites),
                ..Default::default()
            })
            .await
    }
}
