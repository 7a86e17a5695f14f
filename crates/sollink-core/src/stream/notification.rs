//! Subscription kinds, their request parameters and their notification
//! payloads.
//!
//! Each kind maps to a `<kind>Subscribe` / `<kind>Unsubscribe` /
//! `<kind>Notification` method triple and to exactly one [`Notification`]
//! variant, so decoding is an exhaustive match on the kind.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{SubscriptionError, TransactionError};
use crate::rpc::protocol::{decode_logs, decode_transaction_error};
use crate::rpc::{AccountInfo, ProgramAccountsFilter, RpcResponse};
use crate::types::{Commitment, PublicKey, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Account,
    Program,
    Signature,
    Slot,
    Logs,
}

impl SubscriptionKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Program => "program",
            Self::Signature => "signature",
            Self::Slot => "slot",
            Self::Logs => "logs",
        }
    }

    pub fn subscribe_method(self) -> String {
        format!("{}Subscribe", self.prefix())
    }

    pub fn unsubscribe_method(self) -> String {
        format!("{}Unsubscribe", self.prefix())
    }

    pub fn notification_method(self) -> String {
        format!("{}Notification", self.prefix())
    }

    /// Kind whose notification method is `method`, if any.
    pub fn from_notification_method(method: &str) -> Option<Self> {
        let prefix = method.strip_suffix("Notification")?;
        [
            Self::Account,
            Self::Program,
            Self::Signature,
            Self::Slot,
            Self::Logs,
        ]
        .into_iter()
        .find(|kind| kind.prefix() == prefix)
    }

    /// Signature subscriptions end server-side after their first notification.
    pub fn is_one_shot(self) -> bool {
        matches!(self, Self::Signature)
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Which transactions a logs subscription reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogsFilter {
    /// Every transaction except simple votes.
    All,
    AllWithVotes,
    /// Transactions that mention the given account.
    Mentions(PublicKey),
}

impl LogsFilter {
    fn to_param(&self) -> Value {
        match self {
            Self::All => json!("all"),
            Self::AllWithVotes => json!("allWithVotes"),
            Self::Mentions(pubkey) => json!({"mentions": [pubkey]}),
        }
    }
}

/// A subscription to open, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeRequest {
    Account {
        pubkey: PublicKey,
        commitment: Option<Commitment>,
    },
    Program {
        program_id: PublicKey,
        commitment: Option<Commitment>,
        filters: Vec<ProgramAccountsFilter>,
    },
    Signature {
        signature: Signature,
        commitment: Option<Commitment>,
    },
    Slot,
    Logs {
        filter: LogsFilter,
        commitment: Option<Commitment>,
    },
}

impl SubscribeRequest {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Account { .. } => SubscriptionKind::Account,
            Self::Program { .. } => SubscriptionKind::Program,
            Self::Signature { .. } => SubscriptionKind::Signature,
            Self::Slot => SubscriptionKind::Slot,
            Self::Logs { .. } => SubscriptionKind::Logs,
        }
    }

    pub(crate) fn params(&self) -> Vec<Value> {
        match self {
            Self::Account { pubkey, commitment } => vec![
                json!(pubkey),
                options(*commitment, [("encoding", json!("base64"))]),
            ],
            Self::Program {
                program_id,
                commitment,
                filters,
            } => {
                let mut config = options(*commitment, [("encoding", json!("base64"))]);
                if !filters.is_empty() {
                    config["filters"] = json!(filters);
                }
                vec![json!(program_id), config]
            }
            Self::Signature {
                signature,
                commitment,
            } => vec![json!(signature), options(*commitment, [])],
            Self::Slot => Vec::new(),
            Self::Logs { filter, commitment } => vec![filter.to_param(), options(*commitment, [])],
        }
    }
}

fn options<const N: usize>(commitment: Option<Commitment>, extra: [(&str, Value); N]) -> Value {
    let mut map = Map::new();
    for (key, value) in extra {
        map.insert(key.to_owned(), value);
    }
    if let Some(commitment) = commitment {
        map.insert("commitment".to_owned(), json!(commitment));
    }
    Value::Object(map)
}

// ==============================================================================
// Notifications
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Account(AccountNotification),
    Program(ProgramNotification),
    Signature(SignatureNotification),
    Slot(SlotNotification),
    Logs(LogsNotification),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNotification {
    pub slot: u64,
    pub account: AccountInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramNotification {
    pub slot: u64,
    pub pubkey: PublicKey,
    pub account: AccountInfo,
}

/// Final processing result of a watched transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureNotification {
    pub slot: u64,
    pub err: Option<TransactionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SlotNotification {
    pub slot: u64,
    pub parent: u64,
    pub root: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogsNotification {
    pub slot: u64,
    pub signature: Signature,
    pub err: Option<TransactionError>,
    pub logs: Vec<String>,
}

impl Notification {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Account(_) => SubscriptionKind::Account,
            Self::Program(_) => SubscriptionKind::Program,
            Self::Signature(_) => SubscriptionKind::Signature,
            Self::Slot(_) => SubscriptionKind::Slot,
            Self::Logs(_) => SubscriptionKind::Logs,
        }
    }

    /// Decode the `params.result` member of a notification for `kind`.
    pub fn decode(kind: SubscriptionKind, result: Value) -> Result<Self, SubscriptionError> {
        let decode_err =
            |e: serde_json::Error| SubscriptionError::Decode(format!("{kind} notification: {e}"));

        match kind {
            SubscriptionKind::Account => {
                let response: RpcResponse<AccountInfo> =
                    serde_json::from_value(result).map_err(decode_err)?;
                Ok(Self::Account(AccountNotification {
                    slot: response.context.slot,
                    account: response.value,
                }))
            }
            SubscriptionKind::Program => {
                #[derive(Deserialize)]
                struct Keyed {
                    pubkey: PublicKey,
                    account: AccountInfo,
                }
                let response: RpcResponse<Keyed> =
                    serde_json::from_value(result).map_err(decode_err)?;
                Ok(Self::Program(ProgramNotification {
                    slot: response.context.slot,
                    pubkey: response.value.pubkey,
                    account: response.value.account,
                }))
            }
            SubscriptionKind::Signature => {
                #[derive(Deserialize)]
                struct Status {
                    err: Option<Value>,
                }
                let response: RpcResponse<Status> =
                    serde_json::from_value(result).map_err(decode_err)?;
                Ok(Self::Signature(SignatureNotification {
                    slot: response.context.slot,
                    err: transaction_error(response.value.err),
                }))
            }
            SubscriptionKind::Slot => {
                Ok(Self::Slot(serde_json::from_value(result).map_err(decode_err)?))
            }
            SubscriptionKind::Logs => {
                #[derive(Deserialize)]
                struct Logs {
                    signature: Signature,
                    err: Option<Value>,
                    logs: Option<Value>,
                }
                let response: RpcResponse<Logs> =
                    serde_json::from_value(result).map_err(decode_err)?;
                let value = response.value;
                Ok(Self::Logs(LogsNotification {
                    slot: response.context.slot,
                    signature: value.signature,
                    err: transaction_error(value.err),
                    logs: decode_logs(value.logs.as_ref()),
                }))
            }
        }
    }
}

fn transaction_error(err: Option<Value>) -> Option<TransactionError> {
    err.filter(|e| !e.is_null())
        .map(|e| decode_transaction_error(&e))
}
