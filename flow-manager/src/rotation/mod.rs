//! Depth rotation controller.
//!
//! Keeps at most `max_concurrent` rotating market-depth subscriptions
//! active against the brokerage venue while giving bounded dwell time to
//! every symbol in a FIFO queue. Pinned symbols hold always-on slots
//! outside the rotation.
//!
//! Cancellation is never fire-and-forget: a slot stays counted as
//! occupied until the venue acknowledges the cancel, so the controller's
//! occupancy view never understates what the provider believes is
//! consumed. On a "too many subscriptions" error the active batch
//! shrinks immediately and only grows back, one step at a time, after a
//! cooldown plus a run of error-free rotation cycles.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use flow_common::record::{CacheKind, Observation, Scope};

use crate::config::DepthSettings;
use crate::provider::depth::{DepthError, DepthEvent, DepthFeed, DepthUpdate, RequestId};
use crate::sink::IngestSink;

/// One active depth subscription.
#[derive(Debug, Clone)]
struct Slot {
    symbol: String,
    acquired_at: Instant,
    pinned: bool,
}

/// A subscribe request awaiting acknowledgment.
#[derive(Debug, Clone)]
struct PendingSubscribe {
    symbol: String,
    pinned: bool,
}

/// Point-in-time controller statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationStats {
    pub active: usize,
    pub pending_subscribe: usize,
    pub pending_cancel: usize,
    pub queued: usize,
    pub batch_size: usize,
    pub stable_rotations: u32,
}

/// Depth rotation controller.
///
/// All state is owned by the controller's single control loop; the only
/// shared surfaces are the feed request seam and the sink.
pub struct DepthRotationController {
    settings: DepthSettings,
    feed: Arc<dyn DepthFeed>,
    events: mpsc::UnboundedReceiver<DepthEvent>,
    sink: Arc<IngestSink>,

    queue: VecDeque<String>,
    pinned: Vec<String>,
    active: HashMap<RequestId, Slot>,
    pending_subscribe: HashMap<RequestId, PendingSubscribe>,
    pending_cancel: HashMap<RequestId, Slot>,

    batch_size: usize,
    cooldown_until: Option<Instant>,
    stable_rotations: u32,
    error_in_cycle: bool,
}

impl DepthRotationController {
    /// Create a controller over a feed and its event stream.
    ///
    /// `symbols` is the rotation population; symbols also present in the
    /// pinned list are excluded from it.
    pub fn new(
        settings: DepthSettings,
        feed: Arc<dyn DepthFeed>,
        events: mpsc::UnboundedReceiver<DepthEvent>,
        sink: Arc<IngestSink>,
        symbols: Vec<String>,
        pinned: Vec<String>,
    ) -> Self {
        let pinned: Vec<String> = pinned.iter().map(|s| s.to_uppercase()).collect();
        let queue: VecDeque<String> = symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|s| !pinned.contains(s))
            .collect();

        let batch_size = settings.max_concurrent;
        Self {
            settings,
            feed,
            events,
            sink,
            queue,
            pinned,
            active: HashMap::new(),
            pending_subscribe: HashMap::new(),
            pending_cancel: HashMap::new(),
            batch_size,
            cooldown_until: None,
            stable_rotations: 0,
            error_in_cycle: false,
        }
    }

    /// Run the control loop until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.settings.tick_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            max_concurrent = self.settings.max_concurrent,
            dwell_secs = self.settings.dwell_secs,
            pinned = self.pinned.len(),
            queued = self.queue.len(),
            "depth rotation controller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.shutdown_all().await;
                    break;
                }
                _ = tick.tick() => {
                    self.rotate_once().await;
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("depth event stream closed, stopping rotation");
                            break;
                        }
                    }
                }
            }
        }

        info!("depth rotation controller stopped");
    }

    /// One rotation cycle: expire dwell timers, fill free slots, and
    /// apply batch-growth hysteresis.
    pub async fn rotate_once(&mut self) {
        self.ensure_pinned().await;
        self.expire_dwelled().await;
        self.fill_slots().await;

        // Hysteresis accounting happens per cycle, not per event, so one
        // error wipes the streak for the whole cycle.
        if self.error_in_cycle {
            self.stable_rotations = 0;
        } else {
            self.stable_rotations = self.stable_rotations.saturating_add(1);
        }
        self.error_in_cycle = false;

        let cooldown_over = self
            .cooldown_until
            .map(|until| Instant::now() >= until)
            .unwrap_or(true);

        if self.batch_size < self.settings.max_concurrent
            && cooldown_over
            && self.stable_rotations >= self.settings.stable_rotations_required
        {
            self.batch_size += 1;
            self.stable_rotations = 0;
            info!(batch_size = self.batch_size, "growing depth batch size");
        }
    }

    /// Apply one event from the depth session.
    pub async fn handle_event(&mut self, event: DepthEvent) {
        match event {
            DepthEvent::SubscribeAck { request_id } => {
                if let Some(pending) = self.pending_subscribe.remove(&request_id) {
                    debug!(request_id, symbol = %pending.symbol, "depth subscribe acknowledged");
                    self.active.insert(
                        request_id,
                        Slot {
                            symbol: pending.symbol,
                            acquired_at: Instant::now(),
                            pinned: pending.pinned,
                        },
                    );
                } else {
                    warn!(request_id, "subscribe ack for unknown request id");
                }
            }

            DepthEvent::CancelAck { request_id } => {
                if let Some(slot) = self.pending_cancel.remove(&request_id) {
                    debug!(request_id, symbol = %slot.symbol, "depth cancel acknowledged");
                    if !slot.pinned {
                        self.queue.push_back(slot.symbol);
                    }
                } else {
                    warn!(request_id, "cancel ack for unknown request id");
                }
            }

            DepthEvent::Depth { request_id, update } => {
                self.write_depth(request_id, update).await;
            }

            DepthEvent::Error {
                request_id,
                error: DepthError::SubscriptionLimit,
            } => {
                self.on_subscription_limit(request_id);
            }

            DepthEvent::Error { request_id, error } => {
                self.on_request_error(request_id, error);
            }
        }
    }

    /// Drain every event currently buffered without waiting.
    pub async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }
    }

    /// Current controller statistics.
    pub fn stats(&self) -> RotationStats {
        RotationStats {
            active: self.active.len(),
            pending_subscribe: self.pending_subscribe.len(),
            pending_cancel: self.pending_cancel.len(),
            queued: self.queue.len(),
            batch_size: self.batch_size,
            stable_rotations: self.stable_rotations,
        }
    }

    /// Symbols currently holding a non-pinned slot (acked or awaiting ack).
    pub fn rotating_symbols(&self) -> Vec<String> {
        self.active
            .values()
            .filter(|s| !s.pinned)
            .map(|s| s.symbol.clone())
            .chain(
                self.pending_subscribe
                    .values()
                    .filter(|s| !s.pinned)
                    .map(|s| s.symbol.clone()),
            )
            .collect()
    }

    /// Occupied rotating slots: acked subscriptions, in-flight
    /// subscribes, and cancels the venue has not yet acknowledged.
    fn rotating_occupancy(&self) -> usize {
        self.active.values().filter(|s| !s.pinned).count()
            + self.pending_subscribe.values().filter(|s| !s.pinned).count()
            + self.pending_cancel.len()
    }

    fn is_symbol_held(&self, symbol: &str) -> bool {
        self.active.values().any(|s| s.symbol == symbol)
            || self.pending_subscribe.values().any(|s| s.symbol == symbol)
            || self.pending_cancel.values().any(|s| s.symbol == symbol)
    }

    async fn ensure_pinned(&mut self) {
        let missing: Vec<String> = self
            .pinned
            .iter()
            .filter(|symbol| !self.is_symbol_held(symbol))
            .cloned()
            .collect();

        for symbol in missing {
            match self
                .feed
                .subscribe_depth(&symbol, &self.settings.venue)
                .await
            {
                Ok(request_id) => {
                    info!(request_id, symbol = %symbol, "pinned depth subscribe issued");
                    self.pending_subscribe.insert(
                        request_id,
                        PendingSubscribe {
                            symbol,
                            pinned: true,
                        },
                    );
                }
                Err(e) => {
                    warn!(symbol = %symbol, "pinned depth subscribe failed: {}", e);
                }
            }
        }
    }

    async fn expire_dwelled(&mut self) {
        let dwell = Duration::from_secs(self.settings.dwell_secs);
        let now = Instant::now();

        let expired: Vec<RequestId> = self
            .active
            .iter()
            .filter(|(_, slot)| !slot.pinned && now.duration_since(slot.acquired_at) >= dwell)
            .map(|(&id, _)| id)
            .collect();

        for request_id in expired {
            let slot = match self.active.remove(&request_id) {
                Some(slot) => slot,
                None => continue,
            };
            match self.feed.cancel_depth(request_id).await {
                Ok(()) => {
                    info!(request_id, symbol = %slot.symbol, "dwell expired, cancel issued");
                    // Reserved until the venue acks the cancel
                    self.pending_cancel.insert(request_id, slot);
                }
                Err(e) => {
                    warn!(request_id, symbol = %slot.symbol, "cancel failed, keeping slot reserved: {}", e);
                    self.pending_cancel.insert(request_id, slot);
                }
            }
        }
    }

    async fn fill_slots(&mut self) {
        while self.rotating_occupancy() < self.batch_size {
            // Skip symbols that already hold a slot; they rejoin the
            // queue when their slot rotates out.
            let symbol = loop {
                match self.queue.pop_front() {
                    Some(symbol) if self.is_symbol_held(&symbol) => continue,
                    Some(symbol) => break Some(symbol),
                    None => break None,
                }
            };

            let Some(symbol) = symbol else { return };

            match self
                .feed
                .subscribe_depth(&symbol, &self.settings.venue)
                .await
            {
                Ok(request_id) => {
                    info!(request_id, symbol = %symbol, "depth subscribe issued");
                    self.pending_subscribe.insert(
                        request_id,
                        PendingSubscribe {
                            symbol,
                            pinned: false,
                        },
                    );
                }
                Err(e) => {
                    warn!(symbol = %symbol, "depth subscribe failed, requeueing: {}", e);
                    self.queue.push_back(symbol);
                    return;
                }
            }
        }
    }

    fn on_subscription_limit(&mut self, request_id: Option<RequestId>) {
        let previous = self.batch_size;
        self.batch_size = self.batch_size.saturating_sub(1).max(1);
        self.cooldown_until =
            Some(Instant::now() + Duration::from_secs(self.settings.cooldown_secs));
        self.stable_rotations = 0;
        self.error_in_cycle = true;

        warn!(
            previous,
            batch_size = self.batch_size,
            cooldown_secs = self.settings.cooldown_secs,
            "venue reported too many subscriptions, shrinking batch"
        );

        if let Some(request_id) = request_id {
            if let Some(pending) = self.pending_subscribe.remove(&request_id) {
                // The request never consumed a slot; retry it first
                if pending.pinned {
                    debug!(symbol = %pending.symbol, "pinned subscribe deferred by limit");
                } else {
                    self.queue.push_front(pending.symbol);
                }
            }
        }
    }

    fn on_request_error(&mut self, request_id: Option<RequestId>, error: DepthError) {
        self.error_in_cycle = true;
        let Some(request_id) = request_id else {
            warn!("depth session error: {}", error);
            return;
        };

        if let Some(slot) = self.active.remove(&request_id) {
            error!(request_id, symbol = %slot.symbol, "depth subscription evicted: {}", error);
            if !slot.pinned {
                self.queue.push_back(slot.symbol);
            }
        } else if let Some(pending) = self.pending_subscribe.remove(&request_id) {
            error!(request_id, symbol = %pending.symbol, "depth subscribe rejected: {}", error);
            if !pending.pinned {
                self.queue.push_back(pending.symbol);
            }
        } else if let Some(slot) = self.pending_cancel.remove(&request_id) {
            // The venue dropped the subscription on its own; treat as released
            debug!(request_id, symbol = %slot.symbol, "pending cancel resolved by error: {}", error);
            if !slot.pinned {
                self.queue.push_back(slot.symbol);
            }
        } else {
            warn!(request_id, "error for unknown request id: {}", error);
        }
    }

    async fn write_depth(&self, request_id: RequestId, update: DepthUpdate) {
        let symbol = self
            .active
            .get(&request_id)
            .map(|s| s.symbol.clone())
            .or_else(|| {
                // Data can race a cancel ack; still attribute it correctly
                self.pending_cancel
                    .get(&request_id)
                    .map(|s| s.symbol.clone())
            });

        let Some(symbol) = symbol else {
            debug!(request_id, "dropping depth row for unknown request id");
            return;
        };

        let payload = match serde_json::to_value(&update) {
            Ok(value) => value,
            Err(e) => {
                error!(request_id, "failed to serialize depth update: {}", e);
                return;
            }
        };
        let payload = json!({ "symbol": symbol, "row": payload });

        let observation = Observation::new(
            "depth:book",
            Scope::symbol(&symbol),
            CacheKind::BoundedLog,
            payload,
        );
        self.sink.write(observation).await;
    }

    /// Cancel everything and wait (bounded) for acknowledgments.
    async fn shutdown_all(&mut self) {
        info!(
            active = self.active.len(),
            pending = self.pending_subscribe.len(),
            "cancelling all depth subscriptions for shutdown"
        );

        let ids: Vec<RequestId> = self
            .active
            .keys()
            .chain(self.pending_subscribe.keys())
            .copied()
            .collect();

        for request_id in ids {
            if let Some(slot) = self.active.remove(&request_id) {
                self.pending_cancel.insert(request_id, slot);
            } else if let Some(pending) = self.pending_subscribe.remove(&request_id) {
                self.pending_cancel.insert(
                    request_id,
                    Slot {
                        symbol: pending.symbol,
                        acquired_at: Instant::now(),
                        pinned: pending.pinned,
                    },
                );
            }
            if let Err(e) = self.feed.cancel_depth(request_id).await {
                warn!(request_id, "shutdown cancel failed: {}", e);
            }
        }

        let deadline =
            Instant::now() + Duration::from_secs(self.settings.cancel_ack_timeout_secs);
        while !self.pending_cancel.is_empty() {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => None,
                event = self.events.recv() => event,
            };
            match event {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }

        if !self.pending_cancel.is_empty() {
            warn!(
                unacknowledged = self.pending_cancel.len(),
                "shutdown finished with unacknowledged cancels"
            );
        }
    }
}
