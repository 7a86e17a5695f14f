//! Persistent streaming client.
//!
//! One physical connection carries many subscriptions. The connection is
//! re-established with backoff after loss; subscriptions opened on a lost
//! connection end with [`SubscriptionError::ConnectionLost`] and must be
//! re-opened by the caller.
//!
//! [`SubscriptionError::ConnectionLost`]: crate::error::SubscriptionError::ConnectionLost

mod backoff;
mod client;
mod connector;
mod correlator;
#[cfg(test)]
pub mod mock;
mod notification;
mod registry;
mod subscription;

pub use backoff::BackoffConfig;
pub use client::{ConnectionState, StreamClient, StreamConfig, StreamEvent};
pub use connector::{FrameSink, FrameStream, StreamConnector, WsConnector};
pub use notification::{
    AccountNotification, LogsFilter, LogsNotification, Notification, ProgramNotification,
    SignatureNotification, SlotNotification, SubscribeRequest, SubscriptionKind,
};
pub use subscription::Subscription;

#[cfg(test)]
mod tests {
    use std::future::{pending, ready};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tracing::Span;

    use super::mock::{MockConnector, MockServer};
    use super::*;
    use crate::error::{CoreError, SubscriptionError, TransportError};
    use crate::test_util::pubkey;
    use crate::types::Signature;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            backoff: BackoffConfig {
                min: Duration::from_millis(10),
                max: Duration::from_millis(50),
                factor: 2.0,
            },
            handshake_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            queue_capacity: 16,
            event_capacity: 64,
        }
    }

    async fn start(config: StreamConfig) -> (StreamClient, Arc<MockConnector>, MockServer) {
        let connector = Arc::new(MockConnector::new());
        let client = StreamClient::with_connector(connector.clone(), config, Span::none());
        let server = connector.next_server().await;
        client
            .wait_connected(Duration::from_secs(2))
            .await
            .expect("initial connect");
        (client, connector, server)
    }

    fn slot_value(n: u64) -> Value {
        json!({"slot": n, "parent": n - 1, "root": 0})
    }

    fn slot_of(result: Result<Notification, CoreError>) -> u64 {
        match result.expect("notification") {
            Notification::Slot(slot) => slot.slot,
            other => panic!("expected slot notification, got {other:?}"),
        }
    }

    fn account_value(lamports: u64) -> Value {
        json!({
            "context": {"slot": 1},
            "value": {
                "lamports": lamports,
                "owner": "11111111111111111111111111111111",
                "data": ["", "base64"],
                "executable": false,
                "rentEpoch": 0
            }
        })
    }

    #[tokio::test]
    async fn notifications_arrive_in_order() {
        let (client, _connector, mut server) = start(fast_config()).await;

        let (sub, request) = tokio::join!(client.slot_subscribe(), server.accept_subscription(7));
        let mut sub = sub.expect("subscribed");
        assert_eq!(request["method"], "slotSubscribe");
        assert_eq!(sub.remote_id(), 7);
        assert_eq!(sub.generation(), 1);

        for n in 1..=5 {
            server.notify("slotNotification", 7, slot_value(n));
        }
        for n in 1..=5 {
            assert_eq!(slot_of(sub.recv(pending::<()>()).await), n);
        }
    }

    #[tokio::test]
    async fn notification_right_after_reply_is_not_lost() {
        let (client, _connector, mut server) = start(fast_config()).await;

        let (sub, ()) = tokio::join!(client.slot_subscribe(), async {
            let request = server.next_request().await;
            server.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": 3}));
            server.notify("slotNotification", 3, slot_value(100));
        });
        let mut sub = sub.expect("subscribed");
        assert_eq!(slot_of(sub.recv(pending::<()>()).await), 100);
    }

    #[tokio::test]
    async fn notifications_are_routed_by_subscription() {
        let (client, _connector, mut server) = start(fast_config()).await;

        let (slots, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(1));
        let (accounts, request) = tokio::join!(
            client.account_subscribe(pubkey(8), None),
            server.accept_subscription(2)
        );
        let (mut slots, mut accounts) = (slots.expect("slots"), accounts.expect("accounts"));
        assert_eq!(request["params"][0], json!(pubkey(8).to_string()));

        server.notify("accountNotification", 2, account_value(10));
        server.notify("slotNotification", 1, slot_value(1));
        server.notify("accountNotification", 2, account_value(20));
        server.notify("slotNotification", 1, slot_value(2));

        assert_eq!(slot_of(slots.recv(pending::<()>()).await), 1);
        assert_eq!(slot_of(slots.recv(pending::<()>()).await), 2);
        for expected in [10, 20] {
            match accounts.recv(pending::<()>()).await.expect("account") {
                Notification::Account(update) => assert_eq!(update.account.lamports, expected),
                other => panic!("expected account notification, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn garbage_and_unknown_ids_are_ignored() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(5));
        let mut sub = sub.expect("subscribed");

        server.send_raw("not json at all");
        server.notify("slotNotification", 99, slot_value(1));
        server.notify("accountNotification", 5, account_value(1));
        server.notify("slotNotification", 5, slot_value(2));

        assert_eq!(slot_of(sub.recv(pending::<()>()).await), 2);
    }

    #[tokio::test]
    async fn subscribe_error_reply_is_rpc_error() {
        let (client, _connector, mut server) = start(fast_config()).await;

        let (result, ()) = tokio::join!(client.slot_subscribe(), async {
            let request = server.next_request().await;
            server.send(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32602, "message": "Invalid params"}
            }));
        });
        let err = result.expect_err("server refused");
        assert!(matches!(err, CoreError::Rpc(ref rpc) if rpc.code == Some(-32602)));
    }

    #[tokio::test]
    async fn null_id_error_reply_fails_pending_subscribe_at_once() {
        let (client, _connector, mut server) = start(fast_config()).await;

        let attempt = tokio::time::timeout(Duration::from_millis(500), async {
            tokio::join!(client.slot_subscribe(), async {
                server.next_request().await;
                server.send(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": -32005, "message": "Too many requests"}
                }));
            })
        });
        let (result, ()) = attempt.await.expect("failed before the request timeout");
        let err = result.expect_err("server refused");
        assert!(matches!(err, CoreError::Rpc(ref rpc) if rpc.code == Some(-32005)));

        // The connection itself stays usable.
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(3));
        assert_eq!(sub.expect("subscribed").remote_id(), 3);
    }

    #[tokio::test]
    async fn connection_loss_fails_subscriptions_and_reconnects() {
        let (client, connector, mut server) = start(fast_config()).await;
        let mut events = client.events();

        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(1));
        let mut sub = sub.expect("subscribed");
        server.notify("slotNotification", 1, slot_value(1));
        server.fail("network unreachable");
        drop(server);

        // Buffered values first, then the terminal error.
        assert_eq!(slot_of(sub.recv(pending::<()>()).await), 1);
        let err = sub.recv(pending::<()>()).await.expect_err("terminal");
        assert!(matches!(
            err,
            CoreError::Subscription(SubscriptionError::ConnectionLost { generation: 1 })
        ));
        let again = sub.recv(pending::<()>()).await.expect_err("still terminal");
        assert!(matches!(
            again,
            CoreError::Subscription(SubscriptionError::ConnectionLost { generation: 1 })
        ));

        let mut server = connector.next_server().await;
        assert_eq!(
            client
                .wait_connected(Duration::from_secs(2))
                .await
                .expect("reconnected"),
            2
        );

        match events.recv().await.expect("event") {
            StreamEvent::Disconnected { generation, .. } => assert_eq!(generation, 1),
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert_eq!(
            events.recv().await.expect("event"),
            StreamEvent::Connected { generation: 2 }
        );

        // Re-subscribing on the new connection works.
        let (resub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(1));
        let mut resub = resub.expect("re-subscribed");
        assert_eq!(resub.generation(), 2);
        server.notify("slotNotification", 1, slot_value(2));
        assert_eq!(slot_of(resub.recv(pending::<()>()).await), 2);
    }

    #[tokio::test]
    async fn stale_handle_does_not_unsubscribe_on_new_connection() {
        let (client, connector, mut server) = start(fast_config()).await;

        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(1));
        let mut sub = sub.expect("subscribed");
        drop(server);
        assert!(sub.recv(pending::<()>()).await.is_err());

        let mut server = connector.next_server().await;
        client
            .wait_connected(Duration::from_secs(2))
            .await
            .expect("reconnected");
        sub.unsubscribe().await;
        drop(sub);
        tokio::task::yield_now().await;
        assert!(server.try_request().is_none());
    }

    #[tokio::test]
    async fn pending_subscribe_fails_on_loss() {
        let (client, _connector, mut server) = start(fast_config()).await;

        let (result, ()) = tokio::join!(client.slot_subscribe(), async move {
            let _ = server.next_request().await;
            drop(server);
        });
        let err = result.expect_err("connection lost before reply");
        assert!(matches!(
            err,
            CoreError::Transport(TransportError::ConnectionLost(_))
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn overflow_is_terminal_and_releases_subscription() {
        let config = StreamConfig {
            queue_capacity: 2,
            ..fast_config()
        };
        let (client, _connector, mut server) = start(config).await;
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(3));
        let mut sub = sub.expect("subscribed");

        for n in 1..=3 {
            server.notify("slotNotification", 3, slot_value(n));
        }
        let unsubscribe = server.next_request().await;
        assert_eq!(unsubscribe["method"], "slotUnsubscribe");
        assert_eq!(unsubscribe["params"], json!([3]));

        assert_eq!(slot_of(sub.recv(pending::<()>()).await), 1);
        assert_eq!(slot_of(sub.recv(pending::<()>()).await), 2);
        let err = sub.recv(pending::<()>()).await.expect_err("overflowed");
        assert!(matches!(
            err,
            CoreError::Subscription(SubscriptionError::Overflow { capacity: 2 })
        ));
    }

    #[tokio::test]
    async fn undecodable_notification_terminates_subscription() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(4));
        let mut sub = sub.expect("subscribed");

        server.notify("slotNotification", 4, json!({"unexpected": true}));
        let err = sub.recv(pending::<()>()).await.expect_err("decode failure");
        assert!(matches!(
            err,
            CoreError::Subscription(SubscriptionError::Decode(_))
        ));
        assert_eq!(server.next_request().await["method"], "slotUnsubscribe");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(4));
        let mut sub = sub.expect("subscribed");

        sub.unsubscribe().await;
        sub.unsubscribe().await;
        let request = server.next_request().await;
        assert_eq!(request["method"], "slotUnsubscribe");
        assert_eq!(request["params"], json!([4]));
        assert!(server.try_request().is_none());

        let err = sub.recv(pending::<()>()).await.expect_err("released");
        assert!(matches!(
            err,
            CoreError::Subscription(SubscriptionError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_handle_unsubscribes() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let (sub, _) = tokio::join!(
            client.account_subscribe(pubkey(1), None),
            server.accept_subscription(5)
        );
        drop(sub.expect("subscribed"));

        let request = server.next_request().await;
        assert_eq!(request["method"], "accountUnsubscribe");
        assert_eq!(request["params"], json!([5]));
    }

    #[tokio::test]
    async fn cancelled_recv_releases_subscription() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(6));
        let mut sub = sub.expect("subscribed");

        let err = sub.recv(ready(())).await.expect_err("cancelled");
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(server.next_request().await["method"], "slotUnsubscribe");
    }

    #[tokio::test]
    async fn signature_subscription_completes_after_first_notification() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let (sub, request) = tokio::join!(
            client.signature_subscribe(Signature::new([1; 64]), None),
            server.accept_subscription(9)
        );
        let mut sub = sub.expect("subscribed");
        assert_eq!(request["method"], "signatureSubscribe");

        server.notify(
            "signatureNotification",
            9,
            json!({"context": {"slot": 5}, "value": {"err": null}}),
        );
        match sub.recv(pending::<()>()).await.expect("status") {
            Notification::Signature(status) => assert!(status.err.is_none()),
            other => panic!("expected signature notification, got {other:?}"),
        }
        assert!(matches!(
            sub.recv(pending::<()>()).await,
            Err(CoreError::Subscription(SubscriptionError::Closed))
        ));

        drop(sub);
        tokio::task::yield_now().await;
        assert!(server.try_request().is_none());
    }

    #[tokio::test]
    async fn connect_failures_emit_events_and_retry() {
        let connector = Arc::new(MockConnector::new());
        connector.refuse_next(2);
        let client = StreamClient::with_connector(connector.clone(), fast_config(), Span::none());
        let mut events = client.events();

        let _server = connector.next_server().await;
        assert_eq!(
            client
                .wait_connected(Duration::from_secs(2))
                .await
                .expect("connected"),
            1
        );
        assert_eq!(connector.attempts(), 3);

        for expected_attempt in [1, 2] {
            match events.recv().await.expect("event") {
                StreamEvent::ConnectFailed { attempt, .. } => assert_eq!(attempt, expected_attempt),
                other => panic!("expected connect failure, got {other:?}"),
            }
        }
        assert_eq!(
            events.recv().await.expect("event"),
            StreamEvent::Connected { generation: 1 }
        );
    }

    #[tokio::test]
    async fn close_terminates_subscriptions_and_rejects_new_ones() {
        let (client, _connector, mut server) = start(fast_config()).await;
        let mut events = client.events();
        let (sub, _) = tokio::join!(client.slot_subscribe(), server.accept_subscription(2));
        let mut sub = sub.expect("subscribed");

        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            sub.recv(pending::<()>()).await,
            Err(CoreError::Subscription(SubscriptionError::Closed))
        ));
        assert!(matches!(client.slot_subscribe().await, Err(CoreError::Closed)));
        assert_eq!(events.recv().await.expect("event"), StreamEvent::Closed);
    }
}
