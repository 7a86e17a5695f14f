use std::fmt;
use std::time::Duration;

// ==============================================================================
// Core Error
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed RPC envelope: {0}")]
    Protocol(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("stream client is closed")]
    Closed,

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("transaction build error: {0}")]
    Transaction(String),
}

impl CoreError {
    /// Whether retrying the same operation may succeed. Only transport-level
    /// failures qualify; server verdicts and absent data never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// The decoded instruction failure, when this error carries one.
    pub fn instruction_error(&self) -> Option<&InstructionError> {
        match self {
            Self::Rpc(err) => err.instruction_error(),
            _ => None,
        }
    }
}

// ==============================================================================
// Transport Error
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("not connected")]
    NotConnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

// ==============================================================================
// RPC Error
// ==============================================================================

/// A failure reported by the server, or a transaction failure reported through
/// a signature notification (in which case `code` is `None`).
///
/// The `data` member of a JSON-RPC error is dynamically typed and, for failed
/// preflight checks, nests the transaction error several levels deep. It is
/// decoded once, here, into `transaction_error` and `logs`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub transaction_error: Option<TransactionError>,
    pub logs: Vec<String>,
}

impl RpcError {
    pub fn instruction_error(&self) -> Option<&InstructionError> {
        self.transaction_error
            .as_ref()
            .and_then(|err| err.instruction_error.as_ref())
    }

    pub fn instruction_index(&self) -> Option<u64> {
        self.instruction_error().map(|err| err.index)
    }

    pub fn instruction_error_type(&self) -> Option<&str> {
        self.instruction_error().map(|err| err.error_type.as_str())
    }

    pub fn instruction_error_code(&self) -> Option<&str> {
        self.instruction_error().map(|err| err.error_code.as_str())
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "RPC error {code}: {}", self.message)?,
            None => write!(f, "transaction failed: {}", self.message)?,
        }
        if let Some(ix) = self.instruction_error() {
            write!(f, " ({ix})")?;
        }
        if !self.logs.is_empty() {
            write!(f, " [{} log lines]", self.logs.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// A transaction-level error as returned in `meta.err`, simulation results,
/// preflight failures and signature notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionError {
    pub raw: serde_json::Value,
    pub instruction_error: Option<InstructionError>,
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instruction_error {
            Some(ix) => write!(f, "{ix}"),
            None => write!(f, "{}", self.raw),
        }
    }
}

/// The failing instruction extracted from `{"InstructionError": [index, detail]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionError {
    pub index: u64,
    pub error_type: String,
    pub error_code: String,
}

impl fmt::Display for InstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_code.is_empty() {
            write!(f, "instruction {} failed: {}", self.index, self.error_type)
        } else {
            write!(
                f,
                "instruction {} failed: {}({})",
                self.index, self.error_type, self.error_code
            )
        }
    }
}

// ==============================================================================
// Subscription Error
// ==============================================================================

/// Terminal failure of a single subscription, delivered through its error slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("connection generation {generation} was lost; re-subscribe to continue")]
    ConnectionLost { generation: u64 },

    #[error("result queue full ({capacity} notifications); consumer is not draining")]
    Overflow { capacity: usize },

    #[error("undecodable notification: {0}")]
    Decode(String),

    #[error("stream client closed")]
    Closed,
}

// ==============================================================================
// Derivation Error
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerivationError {
    #[error("seed {index} is {len} bytes; the maximum is {max}")]
    SeedTooLong { index: usize, len: usize, max: usize },

    #[error("{count} seeds given; the maximum is {max}")]
    MaxSeedsExceeded { count: usize, max: usize },

    #[error("derived address lies on the ed25519 curve")]
    OnCurve,

    #[error("no bump seed yields an off-curve address")]
    NoViableAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_failure() -> RpcError {
        RpcError {
            code: Some(-32002),
            message: "Transaction simulation failed".into(),
            data: None,
            transaction_error: Some(TransactionError {
                raw: serde_json::json!({"InstructionError": [2, {"Custom": 41}]}),
                instruction_error: Some(InstructionError {
                    index: 2,
                    error_type: "Custom".into(),
                    error_code: "41".into(),
                }),
            }),
            logs: vec!["Program log: boom".into()],
        }
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(CoreError::Transport(TransportError::NotConnected).is_retryable());
        assert!(!CoreError::NotFound("account".into()).is_retryable());
        assert!(!CoreError::Rpc(custom_failure()).is_retryable());
        assert!(!CoreError::Derivation(DerivationError::NoViableAddress).is_retryable());
    }

    #[test]
    fn rpc_error_display_includes_instruction_failure() {
        let rendered = custom_failure().to_string();
        assert_eq!(
            rendered,
            "RPC error -32002: Transaction simulation failed \
             (instruction 2 failed: Custom(41)) [1 log lines]"
        );
    }

    #[test]
    fn notification_failure_has_no_code() {
        let mut err = custom_failure();
        err.code = None;
        err.logs.clear();
        assert!(err.to_string().starts_with("transaction failed:"));
    }

    #[test]
    fn instruction_accessors_read_through() {
        let err = CoreError::Rpc(custom_failure());
        let ix = err.instruction_error().expect("instruction error present");
        assert_eq!(ix.index, 2);
        assert_eq!(ix.error_type, "Custom");
        assert_eq!(ix.error_code, "41");
    }

    #[test]
    fn unit_instruction_error_renders_without_code() {
        let ix = InstructionError {
            index: 0,
            error_type: "InvalidAccountData".into(),
            error_code: String::new(),
        };
        assert_eq!(ix.to_string(), "instruction 0 failed: InvalidAccountData");
    }
}
