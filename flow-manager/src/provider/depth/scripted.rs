//! Scripted depth feed.
//!
//! An in-process implementation of [`DepthFeed`] that emulates the
//! venue's request-id and acknowledgment protocol, including the
//! concurrent-subscription cap. Used by the rotation controller's tests
//! and by `serve --depth-demo` runs where no venue transport is
//! configured.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BookSide, DepthError, DepthEvent, DepthFeed, DepthOp, DepthUpdate, RequestId};

/// Scripted venue-side state.
struct VenueState {
    /// Request ids the venue considers active (acked, not yet cancel-acked)
    active: HashSet<RequestId>,
    /// Cancels received but deliberately not yet acknowledged
    held_cancels: Vec<RequestId>,
    /// Venue-enforced cap on concurrent subscriptions; None = unlimited
    limit: Option<usize>,
    /// When true, cancel acks are withheld until `release_cancel_acks`
    hold_cancel_acks: bool,
}

/// Scripted implementation of the brokerage depth feed.
pub struct ScriptedDepthFeed {
    next_id: AtomicI64,
    events: mpsc::UnboundedSender<DepthEvent>,
    state: Mutex<VenueState>,
}

impl ScriptedDepthFeed {
    /// Create a feed and the event receiver its session would drive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DepthEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = Self {
            next_id: AtomicI64::new(1),
            events: tx,
            state: Mutex::new(VenueState {
                active: HashSet::new(),
                held_cancels: Vec::new(),
                limit: None,
                hold_cancel_acks: false,
            }),
        };
        (feed, rx)
    }

    /// Enforce a venue-side cap on concurrent subscriptions.
    pub fn set_subscription_limit(&self, limit: Option<usize>) {
        self.state.lock().limit = limit;
    }

    /// Withhold cancel acknowledgments until released.
    pub fn hold_cancel_acks(&self, hold: bool) {
        self.state.lock().hold_cancel_acks = hold;
        if !hold {
            self.release_cancel_acks();
        }
    }

    /// Acknowledge every withheld cancel.
    pub fn release_cancel_acks(&self) {
        let held: Vec<RequestId> = {
            let mut state = self.state.lock();
            state.hold_cancel_acks = false;
            std::mem::take(&mut state.held_cancels)
        };
        for request_id in held {
            self.state.lock().active.remove(&request_id);
            let _ = self.events.send(DepthEvent::CancelAck { request_id });
        }
    }

    /// Number of subscriptions the venue currently considers active.
    pub fn venue_active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Emit a depth row for an active subscription.
    pub fn emit_depth(&self, request_id: RequestId, price: f64, size: f64) {
        let _ = self.events.send(DepthEvent::Depth {
            request_id,
            update: DepthUpdate {
                position: 0,
                side: BookSide::Bid,
                operation: DepthOp::Update,
                price,
                size,
                venue: "SCRIPTED".to_string(),
            },
        });
    }
}

#[async_trait]
impl DepthFeed for ScriptedDepthFeed {
    async fn subscribe_depth(&self, _symbol: &str, _venue: &str) -> Result<RequestId, DepthError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let over_limit = {
            let state = self.state.lock();
            state
                .limit
                .map(|limit| state.active.len() >= limit)
                .unwrap_or(false)
        };

        if over_limit {
            let _ = self.events.send(DepthEvent::Error {
                request_id: Some(request_id),
                error: DepthError::SubscriptionLimit,
            });
        } else {
            self.state.lock().active.insert(request_id);
            let _ = self.events.send(DepthEvent::SubscribeAck { request_id });
        }

        Ok(request_id)
    }

    async fn cancel_depth(&self, request_id: RequestId) -> Result<(), DepthError> {
        let hold = {
            let mut state = self.state.lock();
            if state.hold_cancel_acks {
                state.held_cancels.push(request_id);
                true
            } else {
                state.active.remove(&request_id);
                false
            }
        };

        if !hold {
            let _ = self.events.send(DepthEvent::CancelAck { request_id });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acks_subscribe_within_limit() {
        let (feed, mut events) = ScriptedDepthFeed::new();
        feed.set_subscription_limit(Some(1));

        let id = feed.subscribe_depth("SPY", "SMART").await.unwrap();
        match events.recv().await.unwrap() {
            DepthEvent::SubscribeAck { request_id } => assert_eq!(request_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reports_limit_error_over_cap() {
        let (feed, mut events) = ScriptedDepthFeed::new();
        feed.set_subscription_limit(Some(1));

        feed.subscribe_depth("SPY", "SMART").await.unwrap();
        events.recv().await.unwrap();

        let second = feed.subscribe_depth("QQQ", "SMART").await.unwrap();
        match events.recv().await.unwrap() {
            DepthEvent::Error {
                request_id,
                error: DepthError::SubscriptionLimit,
            } => assert_eq!(request_id, Some(second)),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(feed.venue_active_count(), 1);
    }

    #[tokio::test]
    async fn held_cancels_ack_on_release() {
        let (feed, mut events) = ScriptedDepthFeed::new();

        let id = feed.subscribe_depth("SPY", "SMART").await.unwrap();
        events.recv().await.unwrap();

        feed.hold_cancel_acks(true);
        feed.cancel_depth(id).await.unwrap();
        assert_eq!(feed.venue_active_count(), 1);
        assert!(events.try_recv().is_err());

        feed.release_cancel_acks();
        match events.recv().await.unwrap() {
            DepthEvent::CancelAck { request_id } => assert_eq!(request_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(feed.venue_active_count(), 0);
    }
}
