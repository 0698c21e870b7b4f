//! Brokerage market-depth feed interface.
//!
//! The brokerage venue is session-oriented: every subscribe/cancel call
//! is tagged with a connection-scoped numeric request id, and outcomes
//! (acks, data, errors) arrive asynchronously as events carrying that
//! id. The venue enforces a small cap on concurrent depth subscriptions
//! and reports breaches with a distinguishable error.
//!
//! The rotation controller only sees this seam; the concrete transport
//! binding lives behind it.

mod scripted;

pub use scripted::ScriptedDepthFeed;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use flow_common::error::{ErrorCategory, ErrorClassification};

/// Connection-scoped request identifier assigned by the feed.
pub type RequestId = i64;

/// Side of the book a depth row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Operation applied to a depth row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthOp {
    Insert,
    Update,
    Delete,
}

/// One market-depth row update.
#[derive(Debug, Clone, Serialize)]
pub struct DepthUpdate {
    /// Book level position (0 = top of book)
    pub position: u32,
    pub side: BookSide,
    pub operation: DepthOp,
    pub price: f64,
    pub size: f64,
    /// Market-maker / venue identifier for the row
    pub venue: String,
}

/// Depth feed errors.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DepthError {
    /// The venue's concurrent-subscription cap was hit
    #[error("too many concurrent depth subscriptions")]
    SubscriptionLimit,

    /// The session transport failed
    #[error("depth session error: {0}")]
    Connection(String),

    /// The venue rejected the request for a non-capacity reason
    #[error("depth request rejected: {0}")]
    Rejected(String),
}

impl ErrorClassification for DepthError {
    fn category(&self) -> ErrorCategory {
        match self {
            DepthError::SubscriptionLimit => ErrorCategory::ResourceExhausted,
            DepthError::Connection(_) => ErrorCategory::Transient,
            DepthError::Rejected(_) => ErrorCategory::Permanent,
        }
    }
}

/// Asynchronous events from the depth session.
#[derive(Debug, Clone)]
pub enum DepthEvent {
    /// The venue confirmed a subscribe request
    SubscribeAck { request_id: RequestId },
    /// The venue confirmed a cancel; the slot is now actually free
    CancelAck { request_id: RequestId },
    /// A depth row update for an active subscription
    Depth {
        request_id: RequestId,
        update: DepthUpdate,
    },
    /// An error scoped to a request (or the session when `request_id` is None)
    Error {
        request_id: Option<RequestId>,
        error: DepthError,
    },
}

/// Request surface of the depth session.
///
/// Both calls return once the request is on the wire; outcomes arrive
/// as [`DepthEvent`]s. Cancels in particular are never fire-and-forget:
/// the caller must keep the slot reserved until [`DepthEvent::CancelAck`].
#[async_trait]
pub trait DepthFeed: Send + Sync {
    /// Issue a depth subscription; returns the assigned request id.
    async fn subscribe_depth(&self, symbol: &str, venue: &str) -> Result<RequestId, DepthError>;

    /// Issue a cancel for an active subscription.
    async fn cancel_depth(&self, request_id: RequestId) -> Result<(), DepthError>;
}
