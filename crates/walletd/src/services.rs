use std::sync::Arc;

use crate::approval::{ApprovalBroker, ApprovalSurface};
use crate::backend::VaultBackend;
use crate::chain::ChainClient;
use crate::config::Config;
use crate::events::UiSink;
use crate::permission::PermissionStore;
use crate::registry::KeyringRegistry;
use crate::session::SessionRegistry;
use crate::vault::Vault;

/// The process root: every singleton service, explicitly constructed and
/// passed around by handle so tests can build isolated instances per case.
pub struct Services {
    pub config: Config,
    pub vault: Arc<Vault>,
    pub keyrings: Arc<KeyringRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub permissions: Arc<PermissionStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub chain: Arc<dyn ChainClient>,
    pub ui: Arc<dyn UiSink>,
}

impl Services {
    pub fn new(
        config: Config,
        backend: Arc<dyn VaultBackend>,
        surface: Arc<dyn ApprovalSurface>,
        chain: Arc<dyn ChainClient>,
        ui: Arc<dyn UiSink>,
    ) -> Arc<Self> {
        let vault = Arc::new(Vault::new(backend, ui.clone(), config.network));
        let keyrings = Arc::new(KeyringRegistry::new(vault.clone()));
        let permissions = Arc::new(PermissionStore::new(vault.clone()));
        let approvals = Arc::new(ApprovalBroker::new(surface));
        let sessions = Arc::new(SessionRegistry::new());

        Arc::new(Self {
            config,
            vault,
            keyrings,
            sessions,
            permissions,
            approvals,
            chain,
            ui,
        })
    }
}
