use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::approval::ApprovalData;
use crate::error::WalletdError;
use crate::events::UiEvent;
use crate::rpc::{method_spec, ApprovalKind, Capability, MethodSpec, PredicateCtx, RpcMethod};
use crate::services::Services;
use crate::session::SessionMeta;

/// One inbound page request, already resolved to a closed method.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub method: RpcMethod,
    pub params: Value,
    pub session: SessionMeta,
}

/// The ordered decision pipeline between untrusted pages and the
/// key-custody subsystem: lock gate, connection gate, consent gate,
/// approval gate, execution, and the multi-round follow-up loop.
pub struct Gateway {
    services: Arc<Services>,
}

impl Gateway {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Run the full pipeline for one request. Whatever happens inside,
    /// the approval broker's lock is released when the pipeline settles
    /// iff this request triggered an approval, and signing-kind methods
    /// emit a completion event to the UI.
    pub async fn handle(&self, request: PageRequest) -> Result<Value, WalletdError> {
        let spec = method_spec(request.method);
        debug!(method = request.method.wire_name(), origin = %request.session.origin, "rpc request");

        let mut caused_approval = false;
        let result = self.run_pipeline(&request, spec, &mut caused_approval).await;

        if caused_approval {
            self.services.approvals.unlock();
        }

        if spec.approval.as_ref().is_some_and(|a| a.kind.is_signing()) {
            self.services.ui.send(UiEvent::SignFinished {
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });
        }

        result
    }

    async fn run_pipeline(
        &self,
        request: &PageRequest,
        spec: &'static MethodSpec,
        caused_approval: &mut bool,
    ) -> Result<Value, WalletdError> {
        let services = &self.services;
        let origin = &request.session.origin;

        // Lock gate: untagged methods force an unlock round while the
        // vault is locked.
        if spec.capability == Capability::Default && !services.vault.is_unlocked().await {
            *caused_approval = true;
            services
                .approvals
                .request_approval(ApprovalData::new(
                    ApprovalKind::Unlock,
                    Some(origin.clone()),
                    Value::Null,
                ))
                .await?;
        }

        // Connection gate: Connected-tagged methods require prior consent.
        if spec.capability == Capability::Connected
            && !services.permissions.site_is_connected(origin).await
        {
            return Err(WalletdError::Disconnected);
        }

        // Consent gate: one-time connect approval for untagged methods.
        if spec.capability == Capability::Default
            && !services.permissions.site_is_connected(origin).await
        {
            *caused_approval = true;
            services
                .approvals
                .request_approval(ApprovalData::new(
                    ApprovalKind::Connect,
                    Some(origin.clone()),
                    json!({
                        "origin": request.session.origin,
                        "name": request.session.name,
                        "icon": request.session.icon,
                    }),
                ))
                .await?;
            services
                .permissions
                .add_connected_site(origin, &request.session.name, &request.session.icon)
                .await?;
        }

        // Approval gate: skipped when the method's predicate already holds.
        let mut approval_res = None;
        if let Some(approval) = &spec.approval {
            let ctx = PredicateCtx {
                network: services.vault.wallet_state().await.network,
            };
            let holds = approval.predicate.is_some_and(|p| p(&request.params, &ctx));
            if !holds {
                *caused_approval = true;
                approval_res = Some(
                    services
                        .approvals
                        .request_approval(ApprovalData::new(
                            approval.kind,
                            Some(origin.clone()),
                            request.params.clone(),
                        ))
                        .await?,
                );
            }
        }

        // Execute.
        let mut result = crate::provider::dispatch(services, request, approval_res).await?;

        // Multi-round approval loop: a result carrying a nested UI request
        // is replaced by that round's resolution, until none remains.
        while let Some(next) = take_followup(&mut result) {
            *caused_approval = true;
            result = services
                .approvals
                .request_approval(ApprovalData::new(
                    ApprovalKind::Component,
                    Some(origin.clone()),
                    next,
                ))
                .await?;
        }

        Ok(result)
    }
}

fn take_followup(result: &mut Value) -> Option<Value> {
    result.as_object_mut()?.remove("uiRequestComponent")
}
