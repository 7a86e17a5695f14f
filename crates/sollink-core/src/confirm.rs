//! Submit a transaction, then wait for the cluster to report its outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn, Instrument, Span};

use crate::error::CoreError;
use crate::rpc::protocol::transaction_failure;
use crate::rpc::{LedgerRpc, SendOptions};
use crate::stream::{Notification, StreamClient};
use crate::transaction::Transaction;
use crate::types::{Commitment, Signature};

/// What to do when the signature subscription cannot be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFallback {
    /// Surface the subscribe error.
    #[default]
    Fail,
    /// Return [`Confirmation::Unconfirmed`]; the transaction was submitted but
    /// its outcome is unknown.
    ReturnUnconfirmed,
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmConfig {
    pub skip_preflight: bool,
    /// Give up waiting after this long (`Cancelled`). `None` waits until the
    /// notification or a stream failure.
    pub timeout: Option<Duration>,
    pub on_stream_unavailable: StreamFallback,
}

/// Outcome of a submit-and-confirm that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Confirmation {
    Confirmed(Signature),
    /// Submitted, but the stream was unavailable so the outcome was not
    /// observed. Only produced with [`StreamFallback::ReturnUnconfirmed`].
    Unconfirmed { signature: Signature, reason: String },
}

impl Confirmation {
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Confirmed(signature) | Self::Unconfirmed { signature, .. } => signature,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Composes the RPC client and the stream client into "submit, then wait for
/// inclusion".
pub struct Confirmer {
    rpc: Arc<dyn LedgerRpc>,
    stream: Arc<StreamClient>,
    config: ConfirmConfig,
    span: Span,
}

impl Confirmer {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        stream: Arc<StreamClient>,
        config: ConfirmConfig,
        span: Span,
    ) -> Self {
        Self {
            rpc,
            stream,
            config,
            span,
        }
    }

    /// Send `tx` with `preflight` commitment, then wait for its signature
    /// notification at `confirm` commitment.
    ///
    /// A notification without error yields [`Confirmation::Confirmed`]; one
    /// carrying a transaction error yields `CoreError::Rpc` with the decoded
    /// instruction failure.
    pub async fn submit_and_confirm(
        &self,
        tx: &Transaction,
        preflight: Commitment,
        confirm: Commitment,
    ) -> Result<Confirmation, CoreError> {
        self.run(tx, preflight, confirm)
            .instrument(self.span.clone())
            .await
    }

    async fn run(
        &self,
        tx: &Transaction,
        preflight: Commitment,
        confirm: Commitment,
    ) -> Result<Confirmation, CoreError> {
        let options = SendOptions {
            skip_preflight: self.config.skip_preflight,
            preflight_commitment: Some(preflight),
            max_retries: None,
        };
        let signature = self.rpc.send_transaction(tx, options).await?;
        debug!(%signature, %preflight, "transaction submitted");

        let subscribed = self
            .stream
            .signature_subscribe(signature, Some(confirm))
            .await;
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(err) => match self.config.on_stream_unavailable {
                StreamFallback::Fail => return Err(err),
                StreamFallback::ReturnUnconfirmed => {
                    warn!(
                        %signature,
                        error = %err,
                        "signature subscription unavailable; returning unconfirmed"
                    );
                    return Ok(Confirmation::Unconfirmed {
                        signature,
                        reason: err.to_string(),
                    });
                }
            },
        };

        let timeout = self.config.timeout;
        let cancel = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let outcome = subscription.recv(cancel).await;
        subscription.unsubscribe().await;

        match outcome? {
            Notification::Signature(status) => match status.err {
                None => {
                    info!(%signature, %confirm, slot = status.slot, "transaction confirmed");
                    Ok(Confirmation::Confirmed(signature))
                }
                Some(err) => {
                    warn!(%signature, slot = status.slot, error = %err, "transaction failed");
                    Err(CoreError::Rpc(transaction_failure(err, Vec::new())))
                }
            },
            other => Err(CoreError::Protocol(format!(
                "unexpected {} notification on a signature subscription",
                other.kind()
            ))),
        }
    }
}
