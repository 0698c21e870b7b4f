//! Upstream provider integrations.
//!
//! Two providers feed the engine: the market-data vendor (REST +
//! WebSocket) and the brokerage depth venue. Each integration exposes a
//! narrow seam so the control loops above it stay provider-agnostic.

pub mod depth;
pub mod vendor;

use chrono::{DateTime, Utc};

/// Per-connection health record.
///
/// Mutated only by the connection's own control loop; other components
/// read point-in-time copies for staleness decisions and stats.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    /// Whether the connection is currently established
    pub is_connected: bool,
    /// When the current connection was established
    pub connected_at: Option<DateTime<Utc>>,
    /// When the last inbound frame arrived
    pub last_message_at: Option<DateTime<Utc>>,
    /// Number of reconnects since startup
    pub reconnect_count: u32,
}

impl ConnectionHealth {
    /// Record a successful connect.
    pub fn mark_connected(&mut self) {
        self.is_connected = true;
        self.connected_at = Some(Utc::now());
        self.last_message_at = None;
    }

    /// Record a disconnect.
    pub fn mark_disconnected(&mut self) {
        self.is_connected = false;
        self.reconnect_count += 1;
    }

    /// Record an inbound frame.
    pub fn mark_message(&mut self) {
        self.last_message_at = Some(Utc::now());
    }
}
