use serde::{Deserialize, Serialize};
use serde_json::Value;

use chain_btc::BtcNetwork;

use crate::session::SessionMeta;

/// Extension-internal (popup/UI) message envelope, dispatched by `type` to
/// the matching controller and by `method` to its member function.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "type")]
    pub controller: Option<ControllerKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Broadcast,
    Openapi,
    Keyring,
    State,
    Notification,
}

/// Page-origin message envelope; always routes through the gateway except
/// for the reserved `tabCheckin` / `getProviderState` methods.
#[derive(Debug, Clone, Deserialize)]
pub struct PageMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub session: Option<SessionMeta>,
}

/// Strip word separators and case so `sign_psbt`, `signPsbt`, and
/// `SIGN-PSBT` all resolve to the same handler name.
pub fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// The closed set of page-facing RPC methods. Wire names stay stringly
/// only at the serialization edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum RpcMethod {
    Connect = 0,
    GetVersion,
    GetNetwork,
    IsConnected,
    GetBalance,
    GetAccountName,
    GetAccount,
    GetPublicKey,
    CalculateFee,
    SignMessage,
    CreateTx,
    SignPsbt,
    MultiPsbtSign,
    SwitchNetwork,
    InscribeTransfer,
}

impl RpcMethod {
    pub fn from_wire(name: &str) -> Option<Self> {
        match canonical(name).as_str() {
            "connect" => Some(RpcMethod::Connect),
            "getversion" => Some(RpcMethod::GetVersion),
            "getnetwork" => Some(RpcMethod::GetNetwork),
            "isconnected" => Some(RpcMethod::IsConnected),
            "getbalance" => Some(RpcMethod::GetBalance),
            "getaccountname" => Some(RpcMethod::GetAccountName),
            "getaccount" => Some(RpcMethod::GetAccount),
            "getpublickey" => Some(RpcMethod::GetPublicKey),
            "calculatefee" => Some(RpcMethod::CalculateFee),
            "signmessage" => Some(RpcMethod::SignMessage),
            "createtx" => Some(RpcMethod::CreateTx),
            "signpsbt" => Some(RpcMethod::SignPsbt),
            "multipsbtsign" => Some(RpcMethod::MultiPsbtSign),
            "switchnetwork" => Some(RpcMethod::SwitchNetwork),
            "inscribetransfer" => Some(RpcMethod::InscribeTransfer),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            RpcMethod::Connect => "connect",
            RpcMethod::GetVersion => "getVersion",
            RpcMethod::GetNetwork => "getNetwork",
            RpcMethod::IsConnected => "isConnected",
            RpcMethod::GetBalance => "getBalance",
            RpcMethod::GetAccountName => "getAccountName",
            RpcMethod::GetAccount => "getAccount",
            RpcMethod::GetPublicKey => "getPublicKey",
            RpcMethod::CalculateFee => "calculateFee",
            RpcMethod::SignMessage => "signMessage",
            RpcMethod::CreateTx => "createTx",
            RpcMethod::SignPsbt => "signPsbt",
            RpcMethod::MultiPsbtSign => "multiPsbtSign",
            RpcMethod::SwitchNetwork => "switchNetwork",
            RpcMethod::InscribeTransfer => "inscribeTransfer",
        }
    }
}

/// Gate requirements a handler declares. `Default` (neither tag) means the
/// full lock + consent pipeline applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Callable with no unlock and no connection.
    Safe,
    /// Requires the origin to already be a connected site.
    Connected,
    /// Requires unlock and one-time connection consent.
    Default,
}

/// UI approval component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalKind {
    Unlock,
    Connect,
    SignText,
    CreateTx,
    SignPsbt,
    MultiPsbtSign,
    SwitchNetwork,
    InscribeTransfer,
    /// A follow-up round requested by a handler's result.
    Component,
}

impl ApprovalKind {
    /// Signing kinds emit a completion event to the UI when the handler
    /// settles.
    pub fn is_signing(self) -> bool {
        matches!(
            self,
            ApprovalKind::SignText
                | ApprovalKind::CreateTx
                | ApprovalKind::SignPsbt
                | ApprovalKind::MultiPsbtSign
        )
    }
}

/// Snapshot the gateway hands to approval predicates.
pub struct PredicateCtx {
    pub network: BtcNetwork,
}

/// A per-method approval requirement: the UI component to show, and an
/// optional predicate that skips the round when it already holds.
pub struct ApprovalSpec {
    pub kind: ApprovalKind,
    pub predicate: Option<fn(&Value, &PredicateCtx) -> bool>,
}

/// One row of the security policy.
pub struct MethodSpec {
    pub method: RpcMethod,
    pub capability: Capability,
    pub approval: Option<ApprovalSpec>,
}

fn already_on_network(params: &Value, ctx: &PredicateCtx) -> bool {
    params
        .get("network")
        .and_then(Value::as_str)
        .and_then(|name| name.parse::<BtcNetwork>().ok())
        .is_some_and(|network| network == ctx.network)
}

/// The security policy: every page-facing method with its capability tag
/// and approval requirement, reviewable as data. Rows are ordered by
/// [`RpcMethod`] discriminant.
pub static METHOD_TABLE: &[MethodSpec] = &[
    MethodSpec {
        method: RpcMethod::Connect,
        capability: Capability::Default,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::GetVersion,
        capability: Capability::Safe,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::GetNetwork,
        capability: Capability::Safe,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::IsConnected,
        capability: Capability::Safe,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::GetBalance,
        capability: Capability::Connected,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::GetAccountName,
        capability: Capability::Connected,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::GetAccount,
        capability: Capability::Connected,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::GetPublicKey,
        capability: Capability::Connected,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::CalculateFee,
        capability: Capability::Connected,
        approval: None,
    },
    MethodSpec {
        method: RpcMethod::SignMessage,
        capability: Capability::Default,
        approval: Some(ApprovalSpec {
            kind: ApprovalKind::SignText,
            predicate: None,
        }),
    },
    MethodSpec {
        method: RpcMethod::CreateTx,
        capability: Capability::Default,
        approval: Some(ApprovalSpec {
            kind: ApprovalKind::CreateTx,
            predicate: None,
        }),
    },
    MethodSpec {
        method: RpcMethod::SignPsbt,
        capability: Capability::Default,
        approval: Some(ApprovalSpec {
            kind: ApprovalKind::SignPsbt,
            predicate: None,
        }),
    },
    MethodSpec {
        method: RpcMethod::MultiPsbtSign,
        capability: Capability::Default,
        approval: Some(ApprovalSpec {
            kind: ApprovalKind::MultiPsbtSign,
            predicate: None,
        }),
    },
    MethodSpec {
        method: RpcMethod::SwitchNetwork,
        capability: Capability::Default,
        approval: Some(ApprovalSpec {
            kind: ApprovalKind::SwitchNetwork,
            predicate: Some(already_on_network),
        }),
    },
    MethodSpec {
        method: RpcMethod::InscribeTransfer,
        capability: Capability::Default,
        approval: Some(ApprovalSpec {
            kind: ApprovalKind::InscribeTransfer,
            predicate: None,
        }),
    },
];

/// Look up the policy row for a method.
pub fn method_spec(method: RpcMethod) -> &'static MethodSpec {
    &METHOD_TABLE[method as usize]
}
