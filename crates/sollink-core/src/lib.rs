pub mod confirm;
pub mod derive;
pub mod error;
pub mod keys;
pub mod rpc;
pub mod stream;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod test_util;

pub use confirm::{ConfirmConfig, Confirmation, Confirmer, StreamFallback};
pub use error::{CoreError, RpcError, SubscriptionError, TransportError};
pub use keys::Keypair;
pub use rpc::{LedgerRpc, RpcClient};
pub use stream::{StreamClient, StreamConfig, Subscription};
pub use transaction::{AccountMeta, Instruction, Message, Transaction, TransactionBuilder};
pub use types::{Commitment, Hash, PublicKey, Signature};
