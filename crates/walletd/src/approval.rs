use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::WalletdError;
use crate::rpc::ApprovalKind;

/// What the approval surface renders for one pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalData {
    pub kind: ApprovalKind,
    pub origin: Option<String>,
    pub params: Value,
}

impl ApprovalData {
    pub fn new(kind: ApprovalKind, origin: Option<String>, params: Value) -> Self {
        Self {
            kind,
            origin,
            params,
        }
    }
}

/// The approval window/popup lifecycle (external collaborator).
#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    /// Open the surface for `data`; returns an identifier for the opened
    /// window.
    async fn open(&self, data: &ApprovalData) -> Result<u64, WalletdError>;
    async fn close(&self, window_id: u64);
}

struct Pending {
    token: u64,
    data: ApprovalData,
    window_id: Option<u64>,
    tx: oneshot::Sender<Result<Value, WalletdError>>,
}

/// Holds at most one outstanding approval request process-wide and owns the
/// approval surface lifecycle.
///
/// A second `request_approval` while one is pending replaces it ("last
/// write wins", kept for compatibility with the historical behavior); the
/// superseded waiter is rejected with a user-cancellation error, never
/// fulfilled by the replacement's resolution.
pub struct ApprovalBroker {
    surface: Arc<dyn ApprovalSurface>,
    pending: Mutex<Option<Pending>>,
    locked: AtomicBool,
    token_counter: AtomicU64,
}

impl ApprovalBroker {
    pub fn new(surface: Arc<dyn ApprovalSurface>) -> Self {
        Self {
            surface,
            pending: Mutex::new(None),
            locked: AtomicBool::new(false),
            token_counter: AtomicU64::new(0),
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the singleton pending approval, open exactly one approval
    /// surface (tearing down any previous one), and wait for resolution.
    pub async fn request_approval(&self, data: ApprovalData) -> Result<Value, WalletdError> {
        self.locked.store(true, Ordering::SeqCst);

        // Replace any pending approval before opening the new surface.
        let superseded = self.lock_pending().take();
        if let Some(previous) = superseded {
            warn!(kind = ?previous.data.kind, "pending approval superseded");
            let _ = previous.tx.send(Err(WalletdError::UserRejectedRequest));
            if let Some(window_id) = previous.window_id {
                self.surface.close(window_id).await;
            }
        }

        let token = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        *self.lock_pending() = Some(Pending {
            token,
            data: data.clone(),
            window_id: None,
            tx,
        });

        let window_id = self.surface.open(&data).await?;
        let superseded_window = {
            let mut pending = self.lock_pending();
            match pending.as_mut() {
                // Still ours: remember which window belongs to it.
                Some(p) if p.token == token => {
                    p.window_id = Some(window_id);
                    None
                }
                // Superseded while the window was opening.
                _ => Some(window_id),
            }
        };
        if let Some(window_id) = superseded_window {
            self.surface.close(window_id).await;
        }

        debug!(kind = ?data.kind, "approval pending");
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(WalletdError::UserRejectedRequest),
        }
    }

    /// Resolve the pending approval (or reject it when `force_reject`).
    pub async fn resolve_approval(&self, data: Option<Value>, force_reject: bool) {
        let Some(pending) = self.lock_pending().take() else {
            return;
        };
        let result = if force_reject {
            Err(WalletdError::UserRejectedRequest)
        } else {
            Ok(data.unwrap_or(Value::Null))
        };
        let _ = pending.tx.send(result);
        if let Some(window_id) = pending.window_id {
            self.surface.close(window_id).await;
        }
    }

    /// Reject the pending approval. `stay` suppresses closing the surface
    /// (the caller will immediately open another approval in it);
    /// `is_internal` marks a programmatic abort rather than a user action.
    pub async fn reject_approval(
        &self,
        error: Option<String>,
        stay: bool,
        is_internal: bool,
    ) {
        let Some(pending) = self.lock_pending().take() else {
            return;
        };
        let result = if is_internal {
            Err(WalletdError::Internal(
                error.unwrap_or_else(|| "approval aborted".into()),
            ))
        } else {
            Err(WalletdError::UserRejectedRequest)
        };
        let _ = pending.tx.send(result);
        if !stay {
            if let Some(window_id) = pending.window_id {
                self.surface.close(window_id).await;
            }
        }
    }

    /// The surface was closed without an explicit resolve/reject (e.g. the
    /// user closed the window): reject the pending approval.
    pub async fn on_surface_closed(&self, window_id: u64) {
        let pending = {
            let mut guard = self.lock_pending();
            match guard.as_ref() {
                Some(p) if p.window_id == Some(window_id) => guard.take(),
                _ => None,
            }
        };
        if let Some(pending) = pending {
            debug!(window_id, "approval surface closed by user");
            let _ = pending.tx.send(Err(WalletdError::UserRejectedRequest));
        }
    }

    /// The pending approval's display data, for the UI.
    pub fn pending_approval(&self) -> Option<ApprovalData> {
        self.lock_pending().as_ref().map(|p| p.data.clone())
    }

    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Whether some pipeline currently owns an approval round.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Release the approval lock. Called by the gateway once the pipeline
    /// that triggered an approval settles.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}
