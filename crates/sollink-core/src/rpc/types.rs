//! Typed views of RPC results and request options.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, TransactionError};
use crate::types::{Commitment, Hash, PublicKey, Signature};

use super::protocol::decode_transaction_error;

/// Slot at which a `{context, value}` result was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcResponse<T> {
    pub context: RpcContext,
    pub value: T,
}

// ==============================================================================
// Accounts
// ==============================================================================

/// Account state with its data decoded to raw bytes. Interpreting the bytes is
/// left to program-specific codecs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawAccount")]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: PublicKey,
    pub data: Vec<u8>,
    pub executable: bool,
    pub rent_epoch: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    lamports: u64,
    owner: PublicKey,
    data: (String, String),
    executable: bool,
    #[serde(default)]
    rent_epoch: u64,
}

impl TryFrom<RawAccount> for AccountInfo {
    type Error = CoreError;

    fn try_from(raw: RawAccount) -> Result<Self, Self::Error> {
        let (payload, encoding) = raw.data;
        let data = match encoding.as_str() {
            "base64" => base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map_err(|e| CoreError::InvalidEncoding(format!("account data: {e}")))?,
            "base58" => bs58::decode(payload)
                .into_vec()
                .map_err(|e| CoreError::InvalidEncoding(format!("account data: {e}")))?,
            other => {
                return Err(CoreError::InvalidEncoding(format!(
                    "unsupported account data encoding `{other}`"
                )))
            }
        };
        Ok(Self {
            lamports: raw.lamports,
            owner: raw.owner,
            data,
            executable: raw.executable,
            rent_epoch: raw.rent_epoch,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyedAccount {
    pub pubkey: PublicKey,
    pub account: AccountInfo,
}

/// Server-side filter for `getProgramAccounts`. All filters must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgramAccountsFilter {
    /// Compare `bytes` (sent base58 encoded) at `offset` into account data.
    Memcmp { offset: usize, bytes: String },
    /// Exact account data length.
    DataSize(u64),
}

impl ProgramAccountsFilter {
    pub fn memcmp(offset: usize, bytes: &[u8]) -> Self {
        Self::Memcmp {
            offset,
            bytes: bs58::encode(bytes).into_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgramAccountsOptions {
    pub commitment: Option<Commitment>,
    pub filters: Vec<ProgramAccountsFilter>,
}

// ==============================================================================
// Blocks & Transactions
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Block summary requested with signature-level detail.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub blockhash: Hash,
    pub previous_blockhash: Hash,
    pub parent_slot: u64,
    pub block_time: Option<i64>,
    pub block_height: Option<u64>,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    pub err: Option<Value>,
    pub fee: u64,
    #[serde(default)]
    pub pre_balances: Vec<u64>,
    #[serde(default)]
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
    #[serde(default)]
    pub compute_units_consumed: Option<u64>,
}

impl TransactionMeta {
    pub fn transaction_error(&self) -> Option<TransactionError> {
        self.err
            .as_ref()
            .filter(|e| !e.is_null())
            .map(decode_transaction_error)
    }
}

/// A confirmed transaction. The transaction body is left as JSON because its
/// instructions can only be interpreted by program-specific decoders.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionWithMeta {
    pub slot: u64,
    pub block_time: Option<i64>,
    pub transaction: Value,
    pub meta: Option<TransactionMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct SignaturesForAddressOptions {
    pub limit: Option<usize>,
    pub before: Option<Signature>,
    pub until: Option<Signature>,
    pub commitment: Option<Commitment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: Signature,
    pub slot: u64,
    pub err: Option<Value>,
    pub memo: Option<String>,
    pub block_time: Option<i64>,
    pub confirmation_status: Option<Commitment>,
}

impl SignatureInfo {
    pub fn transaction_error(&self) -> Option<TransactionError> {
        self.err
            .as_ref()
            .filter(|e| !e.is_null())
            .map(decode_transaction_error)
    }
}

// ==============================================================================
// Submission
// ==============================================================================

/// Options for `sendTransaction`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: Option<Commitment>,
    pub max_retries: Option<usize>,
}

/// Outcome of `simulateTransaction`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub err: Option<TransactionError>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}
