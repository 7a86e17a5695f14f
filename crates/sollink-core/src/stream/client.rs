use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument, Span};

use crate::error::{CoreError, SubscriptionError, TransportError};
use crate::rpc::protocol::{parse_jsonrpc_error, parse_response_id, JsonRpcRequest};
use crate::rpc::ProgramAccountsFilter;
use crate::types::{Commitment, PublicKey, Signature};

use super::backoff::{Backoff, BackoffConfig};
use super::connector::{FrameSink, FrameStream, StreamConnector, WsConnector};
use super::correlator::Correlator;
use super::notification::{LogsFilter, Notification, SubscribeRequest, SubscriptionKind};
use super::registry::{Delivery, Entry, Registry};
use super::subscription::Subscription;

// ==============================================================================
// Configuration & Lifecycle Types
// ==============================================================================

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub backoff: BackoffConfig,
    /// Bound on a single connect attempt, handshake included.
    pub handshake_timeout: Duration,
    /// How long a subscribe waits for the connection and for its reply.
    pub request_timeout: Duration,
    /// Result queue capacity of each subscription.
    pub queue_capacity: usize,
    /// Buffer of the lifecycle event queue; slow readers see `Lagged`.
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            handshake_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            queue_capacity: 4096,
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; reached only through [`StreamClient::close`] or drop.
    Closed,
}

/// Lifecycle events, published on a broadcast queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected {
        generation: u64,
    },
    Disconnected {
        generation: u64,
        reason: String,
    },
    ConnectFailed {
        attempt: u32,
        error: String,
        retry_in: Duration,
    },
    Closed,
}

// ==============================================================================
// Shared State
// ==============================================================================

struct Writer {
    generation: u64,
    sink: FrameSink,
}

/// A subscribe request waiting for its reply.
struct PendingSubscribe {
    kind: SubscriptionKind,
    local_id: u64,
    generation: u64,
    reply: oneshot::Sender<Result<Subscription, CoreError>>,
}

pub(crate) struct Inner {
    connector: Arc<dyn StreamConnector>,
    config: StreamConfig,
    span: Span,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<StreamEvent>,
    generation: AtomicU64,
    next_local_id: AtomicU64,
    writer: tokio::sync::Mutex<Option<Writer>>,
    write_failed: Notify,
    failed_generation: AtomicU64,
    registry: Mutex<Registry>,
    pending: Mutex<Correlator<PendingSubscribe>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Critical sections never panic midway, so a poisoned lock still holds
    // consistent data.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: StreamEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Write one frame on `generation`. A failed write tears the connection
    /// down so the run loop reconnects.
    async fn write(&self, generation: u64, text: String) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if writer.generation == generation => writer,
            _ => return Err(TransportError::NotConnected),
        };
        if let Err(e) = writer.sink.send(text).await {
            *guard = None;
            self.failed_generation.store(generation, Ordering::SeqCst);
            self.write_failed.notify_one();
            return Err(e);
        }
        Ok(())
    }

    fn unsubscribe_frame(&self, kind: SubscriptionKind, remote_id: u64) -> Option<String> {
        let id = lock(&self.pending).next_id();
        let params = [json!(remote_id)];
        JsonRpcRequest::new(id, &kind.unsubscribe_method(), &params)
            .to_json()
            .ok()
    }

    async fn send_unsubscribe(&self, kind: SubscriptionKind, remote_id: u64, generation: u64) {
        let Some(frame) = self.unsubscribe_frame(kind, remote_id) else {
            return;
        };
        match self.write(generation, frame).await {
            Ok(()) => debug!(stream.remote_id = remote_id, %kind, "unsubscribe sent"),
            Err(e) => {
                debug!(stream.remote_id = remote_id, %kind, error = %e, "unsubscribe not sent")
            }
        }
    }

    /// Release a subscription owned by a handle. Nothing is sent when the
    /// entry is already gone or belongs to an older connection.
    pub(crate) async fn release(&self, remote_id: u64, local_id: u64, generation: u64) {
        let released = lock(&self.registry).release(remote_id, local_id, generation);
        if let Some(entry) = released {
            self.send_unsubscribe(entry.kind, remote_id, generation).await;
        }
    }

    /// Synchronous variant of [`release`](Self::release) for `Drop`: the
    /// unsubscribe frame is written from a spawned task when a runtime is
    /// available.
    pub(crate) fn release_detached(
        self: &Arc<Self>,
        remote_id: u64,
        local_id: u64,
        generation: u64,
    ) {
        let released = lock(&self.registry).release(remote_id, local_id, generation);
        let Some(kind) = released.map(|entry| entry.kind) else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.clone();
            handle.spawn(
                async move { inner.send_unsubscribe(kind, remote_id, generation).await }
                    .instrument(self.span.clone()),
            );
        }
    }

    /// Terminate a subscription from the reader and release it server-side.
    fn terminate(self: &Arc<Self>, remote_id: u64, err: Option<SubscriptionError>) {
        let Some(entry) = lock(&self.registry).remove(remote_id) else {
            return;
        };
        let (kind, generation) = (entry.kind, entry.generation);
        match err {
            Some(err) => {
                warn!(stream.remote_id = remote_id, %kind, error = %err, "subscription terminated");
                entry.fail(err);
            }
            None => drop(entry),
        }
        let inner = self.clone();
        tokio::spawn(
            async move { inner.send_unsubscribe(kind, remote_id, generation).await }
                .instrument(self.span.clone()),
        );
    }
}

// ==============================================================================
// Client
// ==============================================================================

/// Persistent streaming client.
///
/// A background task owns the connection: it connects with backoff, reads and
/// demultiplexes frames, and on loss fails every open subscription with
/// `ConnectionLost` before reconnecting. Lifecycle changes are published on
/// [`events`](Self::events).
pub struct StreamClient {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamClient {
    /// Start a client for a `ws`/`wss` endpoint. Must be called within a
    /// tokio runtime; the connection is established in the background.
    pub fn new(endpoint: &str, config: StreamConfig, span: Span) -> Result<Self, CoreError> {
        let connector = WsConnector::new(endpoint)?;
        Ok(Self::with_connector(Arc::new(connector), config, span))
    }

    pub fn with_connector(
        connector: Arc<dyn StreamConnector>,
        config: StreamConfig,
        span: Span,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Arc::new(Inner {
            connector,
            config,
            span: span.clone(),
            state,
            shutdown,
            events,
            generation: AtomicU64::new(0),
            next_local_id: AtomicU64::new(1),
            writer: tokio::sync::Mutex::new(None),
            write_failed: Notify::new(),
            failed_generation: AtomicU64::new(0),
            registry: Mutex::new(Registry::default()),
            pending: Mutex::new(Correlator::new()),
        });

        let task = tokio::spawn(run(inner.clone()).instrument(span));
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Generation of the current (or most recent) connection; 0 before the
    /// first successful connect.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until connected, returning the connection generation.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<u64, CoreError> {
        let mut state = self.inner.state.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            state.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed)),
        )
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map(|s| *s);

        match reached {
            Ok(ConnectionState::Connected) => Ok(self.generation()),
            _ => Err(CoreError::Closed),
        }
    }

    /// Open a subscription on the current connection.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, CoreError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(CoreError::Closed);
        }
        let timeout = inner.config.request_timeout;
        let generation = self.wait_connected(timeout).await?;

        let kind = request.kind();
        let method = kind.subscribe_method();
        let params = request.params();
        let local_id = inner.next_local_id.fetch_add(1, Ordering::Relaxed);
        let (reply, reply_rx) = oneshot::channel();

        let id = lock(&inner.pending).register(PendingSubscribe {
            kind,
            local_id,
            generation,
            reply,
        });
        debug!(parent: &inner.span, rpc.id = id, rpc.method = %method, "subscribe");

        let sent = match JsonRpcRequest::new(id, &method, &params).to_json() {
            Ok(frame) => inner.write(generation, frame).await.map_err(CoreError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            lock(&inner.pending).resolve(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionLost("reader stopped".into()).into()),
            Err(_) => {
                // The reader may have resolved the entry between the timeout
                // and here; if so the subscription is released on drop.
                lock(&inner.pending).resolve(id);
                Err(TransportError::Timeout(timeout).into())
            }
        }
    }

    pub async fn account_subscribe(
        &self,
        pubkey: PublicKey,
        commitment: Option<Commitment>,
    ) -> Result<Subscription, CoreError> {
        self.subscribe(SubscribeRequest::Account { pubkey, commitment })
            .await
    }

    pub async fn program_subscribe(
        &self,
        program_id: PublicKey,
        commitment: Option<Commitment>,
        filters: Vec<ProgramAccountsFilter>,
    ) -> Result<Subscription, CoreError> {
        self.subscribe(SubscribeRequest::Program {
            program_id,
            commitment,
            filters,
        })
        .await
    }

    pub async fn signature_subscribe(
        &self,
        signature: Signature,
        commitment: Option<Commitment>,
    ) -> Result<Subscription, CoreError> {
        self.subscribe(SubscribeRequest::Signature {
            signature,
            commitment,
        })
        .await
    }

    pub async fn slot_subscribe(&self) -> Result<Subscription, CoreError> {
        self.subscribe(SubscribeRequest::Slot).await
    }

    pub async fn logs_subscribe(
        &self,
        filter: LogsFilter,
        commitment: Option<Commitment>,
    ) -> Result<Subscription, CoreError> {
        self.subscribe(SubscribeRequest::Logs { filter, commitment })
            .await
    }

    /// Shut down: every open subscription ends with `Closed`, pending
    /// requests fail, and the state becomes terminal. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

// ==============================================================================
// Connection Task
// ==============================================================================

enum ReadEnd {
    Shutdown,
    Lost(String),
}

async fn run(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut backoff = Backoff::new(inner.config.backoff);
    let mut attempt: u32 = 0;

    'outer: while !*shutdown.borrow() {
        inner.set_state(ConnectionState::Connecting);
        attempt += 1;

        let handshake = inner.config.handshake_timeout;
        let connected = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break 'outer,
            result = tokio::time::timeout(handshake, inner.connector.connect()) => {
                match result {
                    Ok(Ok(pair)) => Ok(pair),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(TransportError::Timeout(handshake)),
                }
            }
        };

        let delay = match connected {
            Ok((sink, stream)) => {
                attempt = 0;
                backoff.reset();
                match serve(&inner, sink, stream, &mut shutdown).await {
                    ReadEnd::Shutdown => break 'outer,
                    ReadEnd::Lost(_) => backoff.next_delay(),
                }
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                let delay = backoff.next_delay();
                warn!(attempt, error = %e, retry_in = ?delay, "stream connect failed");
                inner.emit(StreamEvent::ConnectFailed {
                    attempt,
                    error: e.to_string(),
                    retry_in: delay,
                });
                delay
            }
        };

        tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break 'outer,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    teardown(&inner, None).await;
    for entry in lock(&inner.registry).drain() {
        entry.fail(SubscriptionError::Closed);
    }
    for pending in lock(&inner.pending).drain() {
        let _ = pending.reply.send(Err(CoreError::Closed));
    }
    inner.set_state(ConnectionState::Closed);
    inner.emit(StreamEvent::Closed);
    info!("stream client closed");
}

/// Drive one established connection until it is lost or shut down.
async fn serve(
    inner: &Arc<Inner>,
    sink: FrameSink,
    mut stream: FrameStream,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadEnd {
    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    *inner.writer.lock().await = Some(Writer { generation, sink });
    inner.set_state(ConnectionState::Connected);
    inner.emit(StreamEvent::Connected { generation });
    info!(stream.generation = generation, "stream connected");

    let end = loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => break ReadEnd::Shutdown,
            _ = inner.write_failed.notified() => {
                if inner.failed_generation.load(Ordering::SeqCst) == generation {
                    break ReadEnd::Lost("write failed".into());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(text)) => dispatch(inner, generation, &text),
                Some(Err(e)) => break ReadEnd::Lost(e.to_string()),
                None => break ReadEnd::Lost("stream ended".into()),
            },
        }
    };

    if let ReadEnd::Lost(reason) = &end {
        teardown(inner, Some(generation)).await;
        inner.set_state(ConnectionState::Disconnected);
        warn!(stream.generation = generation, reason = %reason, "stream disconnected");
        inner.emit(StreamEvent::Disconnected {
            generation,
            reason: reason.clone(),
        });
    }
    end
}

/// Drop the writer, then fail everything tied to the lost connection. The
/// writer goes first so no request can be written after its table is drained.
async fn teardown(inner: &Inner, lost: Option<u64>) {
    if let Some(mut writer) = inner.writer.lock().await.take() {
        let _ = writer.sink.close().await;
    }
    let Some(generation) = lost else {
        return;
    };

    let entries = lock(&inner.registry).drain();
    let failed = entries.len();
    for entry in entries {
        entry.fail(SubscriptionError::ConnectionLost { generation });
    }
    let pending = lock(&inner.pending).drain();
    for request in pending {
        let _ = request.reply.send(Err(TransportError::ConnectionLost(format!(
            "connection generation {generation} lost before reply"
        ))
        .into()));
    }
    debug!(stream.generation = generation, subscriptions = failed, "connection state torn down");
}

// ==============================================================================
// Frame Dispatch
// ==============================================================================

fn dispatch(inner: &Arc<Inner>, generation: u64, text: &str) {
    trace!(stream.generation = generation, frame = %text, "frame");
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(stream.generation = generation, error = %e, "undecodable frame ignored");
            return;
        }
    };

    match frame.get("method").and_then(Value::as_str) {
        Some(method) => on_notification(inner, method, frame.get("params")),
        None => on_response(inner, generation, frame),
    }
}

fn on_response(inner: &Arc<Inner>, generation: u64, mut frame: Value) {
    let id = match frame.get("id").map(parse_response_id) {
        Some(Ok(id)) => id,
        _ => {
            match frame.get_mut("error").map(Value::take) {
                Some(err) => fail_unattributed(inner, generation, err),
                None => warn!(frame = %frame, "response without usable id ignored"),
            }
            return;
        }
    };
    let Some(pending) = lock(&inner.pending).resolve(id) else {
        trace!(rpc.id = id, "untracked response");
        return;
    };

    if let Some(err) = frame.get_mut("error").map(Value::take) {
        let _ = pending.reply.send(Err(parse_jsonrpc_error(err)));
        return;
    }
    let Some(remote_id) = frame.get("result").and_then(Value::as_u64) else {
        let _ = pending.reply.send(Err(CoreError::Protocol(format!(
            "subscribe reply without numeric id: {frame}"
        ))));
        return;
    };

    // Register before the next frame is read, so no notification for this
    // subscription can arrive ahead of its entry.
    let (results_tx, results_rx) = mpsc::channel(inner.config.queue_capacity.max(1));
    let (error_tx, error_rx) = oneshot::channel();
    let entry = Entry::new(
        pending.local_id,
        pending.kind,
        pending.generation,
        results_tx,
        error_tx,
    );
    if let Some(stale) = lock(&inner.registry).insert(remote_id, entry) {
        stale.fail(SubscriptionError::Closed);
    }
    debug!(
        rpc.id = id,
        stream.remote_id = remote_id,
        stream.generation = generation,
        kind = %pending.kind,
        "subscribed"
    );

    let subscription = Subscription::new(
        inner.clone(),
        pending.local_id,
        remote_id,
        pending.kind,
        pending.generation,
        results_rx,
        error_rx,
    );
    // A requester that gave up drops the handle here, which releases the
    // subscription server-side.
    let _ = pending.reply.send(Ok(subscription));
}

/// An error reply the server could not tie to a request (null id) answers
/// every request still waiting on this connection.
fn fail_unattributed(inner: &Inner, generation: u64, err: Value) {
    let pending = lock(&inner.pending).drain();
    warn!(
        stream.generation = generation,
        pending = pending.len(),
        error = %err,
        "error reply without id fails pending requests"
    );
    for request in pending {
        let _ = request.reply.send(Err(parse_jsonrpc_error(err.clone())));
    }
}

fn on_notification(inner: &Arc<Inner>, method: &str, params: Option<&Value>) {
    let Some(params) = params else {
        warn!(method, "notification without params ignored");
        return;
    };
    let Some(remote_id) = params.get("subscription").and_then(Value::as_u64) else {
        warn!(method, "notification without subscription id ignored");
        return;
    };

    let outcome = {
        let registry = lock(&inner.registry);
        let Some(entry) = registry.get(remote_id) else {
            trace!(method, stream.remote_id = remote_id, "notification for unknown subscription");
            return;
        };
        if SubscriptionKind::from_notification_method(method) != Some(entry.kind) {
            warn!(
                method,
                kind = %entry.kind,
                stream.remote_id = remote_id,
                "notification kind mismatch ignored"
            );
            return;
        }
        let result = params.get("result").cloned().unwrap_or(Value::Null);
        match Notification::decode(entry.kind, result) {
            Ok(notification) => match entry.deliver(notification) {
                Delivery::Delivered if entry.kind.is_one_shot() => Outcome::Completed,
                Delivery::Delivered => Outcome::Delivered,
                Delivery::Overflow { capacity } => {
                    Outcome::Fail(SubscriptionError::Overflow { capacity })
                }
                Delivery::Gone => Outcome::Gone,
            },
            Err(e) => Outcome::Fail(e),
        }
    };

    match outcome {
        Outcome::Delivered => {}
        Outcome::Completed => {
            // The server already released one-shot subscriptions.
            lock(&inner.registry).remove(remote_id);
        }
        Outcome::Gone => inner.terminate(remote_id, None),
        Outcome::Fail(err) => inner.terminate(remote_id, Some(err)),
    }
}

enum Outcome {
    Delivered,
    Completed,
    Gone,
    Fail(SubscriptionError),
}
