//! In-memory stream connector for tests.
//!
//! Every successful [`MockConnector::connect`] hands the server side of a
//! fresh channel pair to the test through [`MockConnector::next_server`].

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;

use super::connector::{FrameSink, FrameStream, StreamConnector};

pub struct MockConnector {
    servers_tx: mpsc::UnboundedSender<MockServer>,
    servers_rx: Mutex<mpsc::UnboundedReceiver<MockServer>>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            servers_tx,
            servers_rx: Mutex::new(servers_rx),
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Server side of the next accepted connection.
    pub async fn next_server(&self) -> MockServer {
        self.servers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector outlives its servers")
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionLost("connection refused".into()));
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, TransportError>>();
        let _ = self.servers_tx.send(MockServer {
            incoming: server_rx,
            outgoing: server_tx,
        });

        let sink = client_tx.sink_map_err(|e| TransportError::ConnectionLost(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

/// Scripted server end of one mock connection. Dropping it closes the
/// connection.
pub struct MockServer {
    incoming: fmpsc::UnboundedReceiver<String>,
    outgoing: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MockServer {
    /// Next frame written by the client, parsed.
    pub async fn next_request(&mut self) -> Value {
        let frame = self.incoming.next().await.expect("client connection open");
        serde_json::from_str(&frame).expect("client writes JSON")
    }

    /// A frame the client already wrote, without waiting.
    pub fn try_request(&mut self) -> Option<Value> {
        let frame = self.incoming.try_recv().ok()?;
        Some(serde_json::from_str(&frame).expect("client writes JSON"))
    }

    pub fn send(&self, frame: Value) {
        let _ = self.outgoing.unbounded_send(Ok(frame.to_string()));
    }

    pub fn send_raw(&self, frame: &str) {
        let _ = self.outgoing.unbounded_send(Ok(frame.to_owned()));
    }

    /// Read a subscribe request and accept it with `remote_id`. Returns the
    /// request.
    pub async fn accept_subscription(&mut self, remote_id: u64) -> Value {
        let request = self.next_request().await;
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": remote_id}));
        request
    }

    pub fn notify(&self, method: &str, remote_id: u64, result: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {"result": result, "subscription": remote_id}
        }));
    }

    /// Break the connection with a read error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .outgoing
            .unbounded_send(Err(TransportError::ConnectionLost(reason.to_owned())));
    }
}
