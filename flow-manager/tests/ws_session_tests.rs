//! Session manager behavior against a local WebSocket server:
//! resubscription after a forced disconnect, and message forwarding.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use flow_manager::config::{ReconnectSettings, StreamingSettings, VendorSettings};
use flow_manager::provider::vendor::channels::{ChannelName, SubscriptionSet};
use flow_manager::provider::vendor::ws::{VendorStreamConsumer, VendorWsSession};

/// Joins observed by the fake vendor, one Vec per connection.
type JoinLog = Arc<Mutex<Vec<Vec<String>>>>;

struct Recorder {
    messages: Arc<Mutex<Vec<(String, Value)>>>,
    tx: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl VendorStreamConsumer for Recorder {
    async fn on_message(&self, channel: &ChannelName, payload: &Value) {
        self.messages
            .lock()
            .push((channel.to_string(), payload.clone()));
        let _ = self.tx.send(());
    }
}

/// Fake vendor: accepts connections, records join messages, drops the
/// first connection after all joins arrive, and feeds one data frame on
/// the second.
async fn run_fake_vendor(
    listener: TcpListener,
    expected_joins: usize,
    joins: JoinLog,
    connected_tx: mpsc::UnboundedSender<usize>,
) {
    let mut connection = 0usize;
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(ok) => ok,
            Err(_) => return,
        };
        connection += 1;
        let mut ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => continue,
        };

        let mut seen = Vec::new();
        while seen.len() < expected_joins {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg: Value = serde_json::from_str(&text).unwrap();
                    if msg["msg_type"] == "join" {
                        seen.push(msg["channel"].as_str().unwrap().to_string());
                    }
                }
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        joins.lock().push(seen);
        let _ = connected_tx.send(connection);

        if connection == 1 {
            // Force a disconnect; the session must come back and rejoin.
            let _ = ws.close(None).await;
            continue;
        }

        // Second connection: deliver one frame, then stay open.
        let frame = r#"["gex:SPY", {"ticker": "SPY", "gamma_exposure": 1.25}]"#;
        let _ = ws.send(Message::Text(frame.to_string())).await;

        // Hold the socket open until the client goes away.
        while let Some(Ok(_)) = ws.next().await {}
    }
}

fn test_settings() -> StreamingSettings {
    StreamingSettings {
        staleness_secs: 0,
        reconnect: ReconnectSettings {
            initial_delay_secs: 0,
            max_delay_secs: 1,
            healthy_reset_secs: 300,
        },
        rate_limit_attempts: 20,
        rate_limit_window_secs: 60,
    }
}

#[tokio::test]
async fn reconnect_rejoins_exact_subscription_set() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let desired: BTreeSet<String> = ["flow-alerts", "gex:SPY", "price:SPY"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let joins: JoinLog = Arc::new(Mutex::new(Vec::new()));
    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_fake_vendor(
        listener,
        desired.len(),
        Arc::clone(&joins),
        connected_tx,
    ));

    let vendor = VendorSettings {
        rest_base_url: "http://unused".to_string(),
        websocket_url: format!("ws://{}", addr),
        api_token: "test-token".to_string(),
        request_timeout_secs: 5,
    };

    let messages = Arc::new(Mutex::new(Vec::new()));
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(Recorder {
        messages: Arc::clone(&messages),
        tx: msg_tx,
    });

    let (session, handle) = VendorWsSession::new(
        &vendor,
        test_settings(),
        SubscriptionSet::new(desired.clone()),
        consumer,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let session_task = tokio::spawn(session.run(shutdown_rx));

    // Both connections must complete their join handshake.
    for expected_connection in 1..=2 {
        let connection = tokio::time::timeout(Duration::from_secs(10), connected_rx.recv())
            .await
            .expect("vendor connection timed out")
            .unwrap();
        assert_eq!(connection, expected_connection);
    }

    // The data frame on the second connection reaches the consumer.
    tokio::time::timeout(Duration::from_secs(10), msg_rx.recv())
        .await
        .expect("message forwarding timed out")
        .unwrap();

    {
        let joins = joins.lock();
        assert_eq!(joins.len(), 2);
        for connection_joins in joins.iter() {
            let set: BTreeSet<String> = connection_joins.iter().cloned().collect();
            // Every channel in the set, only those, no duplicates
            assert_eq!(set, desired);
            assert_eq!(connection_joins.len(), desired.len());
        }
    }

    {
        let messages = messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "gex:SPY");
        assert_eq!(messages[0].1["gamma_exposure"], 1.25);
    }

    let health = handle.health();
    assert!(health.is_connected);
    assert!(health.reconnect_count >= 1);

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), session_task).await;
}

#[tokio::test]
async fn invalid_payloads_are_dropped_without_killing_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Vendor that sends garbage, then a valid frame.
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // Drain the join
        let _ = ws.next().await;

        let _ = ws.send(Message::Text("not json at all".to_string())).await;
        // Valid channel, payload missing required price field
        let _ = ws
            .send(Message::Text(r#"["price:SPY", {"symbol": "SPY"}]"#.to_string()))
            .await;
        let _ = ws
            .send(Message::Text(
                r#"["price:SPY", {"symbol": "SPY", "price": 450.5}]"#.to_string(),
            ))
            .await;
        let _ = ready_tx.send(());
        while let Some(Ok(_)) = ws.next().await {}
    });

    let vendor = VendorSettings {
        rest_base_url: "http://unused".to_string(),
        websocket_url: format!("ws://{}", addr),
        api_token: "t".to_string(),
        request_timeout_secs: 5,
    };

    let messages = Arc::new(Mutex::new(Vec::new()));
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(Recorder {
        messages: Arc::clone(&messages),
        tx: msg_tx,
    });

    let subscriptions = SubscriptionSet::default();
    subscriptions.add("price:SPY");

    let (session, _handle) =
        VendorWsSession::new(&vendor, test_settings(), subscriptions, consumer);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let session_task = tokio::spawn(session.run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(10), ready_rx.recv())
        .await
        .expect("vendor send timed out");
    tokio::time::timeout(Duration::from_secs(10), msg_rx.recv())
        .await
        .expect("valid message never arrived")
        .unwrap();

    // Only the valid frame got through
    let messages = messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1["price"], 450.5);

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), session_task).await;
}
