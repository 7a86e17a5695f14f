//! Request/response RPC layer.
//!
//! Defines the [`LedgerRpc`] trait, whose typed wrappers are all expressed in
//! terms of the single [`LedgerRpc::call`] primitive, and the [`RpcClient`]
//! implementation over a pluggable [`RpcTransport`].

mod client;
pub(crate) mod connection;
#[cfg(test)]
pub mod mock;
pub(crate) mod protocol;
pub mod transport;
pub mod types;

pub use client::RpcClient;
pub use protocol::decode_transaction_error;
pub use transport::{HttpOptions, HttpTransport, RpcTransport};
pub use types::{
    AccountInfo, BlockInfo, KeyedAccount, LatestBlockhash, ProgramAccountsFilter,
    ProgramAccountsOptions, RpcContext, RpcResponse, SendOptions, SignatureInfo,
    SignaturesForAddressOptions, SimulationResult, TransactionMeta, TransactionWithMeta,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::CoreError;
use crate::transaction::Transaction;
use crate::types::{Commitment, PublicKey, Signature};

/// Ledger-node RPC surface.
///
/// Implementations provide [`call`](Self::call); every typed wrapper is a
/// default method on top of it, so a mock only needs to answer raw methods.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Issue one JSON-RPC call and return its `result` member.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError>;

    async fn get_balance(
        &self,
        pubkey: &PublicKey,
        commitment: Option<Commitment>,
    ) -> Result<u64, CoreError> {
        let params = vec![json!(pubkey), config(commitment, vec![])];
        let response: RpcResponse<u64> =
            decode("getBalance", self.call("getBalance", params).await?)?;
        Ok(response.value)
    }

    /// Fetch an account. A null value is `NotFound`, never an empty account.
    async fn get_account_info(
        &self,
        pubkey: &PublicKey,
        commitment: Option<Commitment>,
    ) -> Result<AccountInfo, CoreError> {
        let params = vec![json!(pubkey), config(commitment, vec![("encoding", json!("base64"))])];
        let response: RpcResponse<Option<AccountInfo>> =
            decode("getAccountInfo", self.call("getAccountInfo", params).await?)?;
        response
            .value
            .ok_or_else(|| CoreError::NotFound(format!("account {pubkey}")))
    }

    /// Raw account bytes, for program-specific decoders.
    async fn get_account_data(
        &self,
        pubkey: &PublicKey,
        commitment: Option<Commitment>,
    ) -> Result<Vec<u8>, CoreError> {
        Ok(self.get_account_info(pubkey, commitment).await?.data)
    }

    async fn get_program_accounts(
        &self,
        program_id: &PublicKey,
        options: ProgramAccountsOptions,
    ) -> Result<Vec<KeyedAccount>, CoreError> {
        let mut extra = vec![("encoding", json!("base64"))];
        if !options.filters.is_empty() {
            extra.push(("filters", json!(options.filters)));
        }
        let params = vec![json!(program_id), config(options.commitment, extra)];
        decode(
            "getProgramAccounts",
            self.call("getProgramAccounts", params).await?,
        )
    }

    async fn get_latest_blockhash(
        &self,
        commitment: Option<Commitment>,
    ) -> Result<LatestBlockhash, CoreError> {
        let params = vec![config(commitment, vec![])];
        let response: RpcResponse<LatestBlockhash> = decode(
            "getLatestBlockhash",
            self.call("getLatestBlockhash", params).await?,
        )?;
        Ok(response.value)
    }

    async fn get_slot(&self, commitment: Option<Commitment>) -> Result<u64, CoreError> {
        let params = vec![config(commitment, vec![])];
        decode("getSlot", self.call("getSlot", params).await?)
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<Commitment>,
    ) -> Result<TransactionWithMeta, CoreError> {
        let params = vec![
            json!(signature),
            config(
                commitment,
                vec![
                    ("encoding", json!("json")),
                    ("maxSupportedTransactionVersion", json!(0)),
                ],
            ),
        ];
        let tx: Option<TransactionWithMeta> =
            decode("getTransaction", self.call("getTransaction", params).await?)?;
        tx.ok_or_else(|| CoreError::NotFound(format!("transaction {signature}")))
    }

    async fn get_block(&self, slot: u64) -> Result<BlockInfo, CoreError> {
        let params = vec![
            json!(slot),
            config(
                None,
                vec![
                    ("encoding", json!("json")),
                    ("transactionDetails", json!("signatures")),
                    ("rewards", json!(false)),
                    ("maxSupportedTransactionVersion", json!(0)),
                ],
            ),
        ];
        let block: Option<BlockInfo> = decode("getBlock", self.call("getBlock", params).await?)?;
        block.ok_or_else(|| CoreError::NotFound(format!("block at slot {slot}")))
    }

    async fn get_signatures_for_address(
        &self,
        address: &PublicKey,
        options: SignaturesForAddressOptions,
    ) -> Result<Vec<SignatureInfo>, CoreError> {
        let mut extra = Vec::new();
        if let Some(limit) = options.limit {
            extra.push(("limit", json!(limit)));
        }
        if let Some(before) = options.before {
            extra.push(("before", json!(before)));
        }
        if let Some(until) = options.until {
            extra.push(("until", json!(until)));
        }
        let params = vec![json!(address), config(options.commitment, extra)];
        decode(
            "getSignaturesForAddress",
            self.call("getSignaturesForAddress", params).await?,
        )
    }

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
        commitment: Option<Commitment>,
    ) -> Result<u64, CoreError> {
        let params = vec![json!(data_len), config(commitment, vec![])];
        decode(
            "getMinimumBalanceForRentExemption",
            self.call("getMinimumBalanceForRentExemption", params).await?,
        )
    }

    async fn request_airdrop(
        &self,
        pubkey: &PublicKey,
        lamports: u64,
        commitment: Option<Commitment>,
    ) -> Result<Signature, CoreError> {
        let params = vec![json!(pubkey), json!(lamports), config(commitment, vec![])];
        decode("requestAirdrop", self.call("requestAirdrop", params).await?)
    }

    /// Submit a fully signed transaction; returns the signature the server
    /// assigned, which is the transaction id.
    async fn send_transaction(
        &self,
        tx: &Transaction,
        options: SendOptions,
    ) -> Result<Signature, CoreError> {
        let wire = tx.to_base64()?;
        let mut extra = vec![
            ("encoding", json!("base64")),
            ("skipPreflight", json!(options.skip_preflight)),
        ];
        if let Some(commitment) = options.preflight_commitment {
            extra.push(("preflightCommitment", json!(commitment)));
        }
        if let Some(max_retries) = options.max_retries {
            extra.push(("maxRetries", json!(max_retries)));
        }
        let params = vec![json!(wire), config(None, extra)];
        decode("sendTransaction", self.call("sendTransaction", params).await?)
    }

    /// Dry-run a transaction. Unsigned transactions are simulated with
    /// signature verification disabled.
    async fn simulate_transaction(
        &self,
        tx: &Transaction,
        commitment: Option<Commitment>,
    ) -> Result<SimulationResult, CoreError> {
        use base64::Engine as _;

        let wire = base64::engine::general_purpose::STANDARD.encode(tx.serialize_unchecked());
        let params = vec![
            json!(wire),
            config(
                commitment,
                vec![
                    ("encoding", json!("base64")),
                    ("sigVerify", json!(tx.is_signed())),
                ],
            ),
        ];

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawSimulation {
            err: Option<Value>,
            #[serde(default)]
            logs: Option<Vec<String>>,
            #[serde(default)]
            units_consumed: Option<u64>,
        }

        let response: RpcResponse<RawSimulation> = decode(
            "simulateTransaction",
            self.call("simulateTransaction", params).await?,
        )?;
        let raw = response.value;
        Ok(SimulationResult {
            err: raw
                .err
                .as_ref()
                .filter(|e| !e.is_null())
                .map(decode_transaction_error),
            logs: raw.logs.unwrap_or_default(),
            units_consumed: raw.units_consumed,
        })
    }
}

/// Build the trailing configuration object shared by most methods.
fn config(commitment: Option<Commitment>, extra: Vec<(&'static str, Value)>) -> Value {
    let mut map = Map::new();
    if let Some(commitment) = commitment {
        map.insert("commitment".into(), json!(commitment));
    }
    for (key, value) in extra {
        map.insert(key.into(), value);
    }
    Value::Object(map)
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, CoreError> {
    serde_json::from_value(value)
        .map_err(|e| CoreError::Protocol(format!("decode {method} result: {e}")))
}
