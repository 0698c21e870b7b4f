//! # Flow Common
//!
//! Shared infrastructure for the telemetry acquisition services: error
//! classification, logging setup, the normalized observation record, and
//! the hot-cache abstraction used by every acquisition path.

pub mod cache;
pub mod error;
pub mod logging;
pub mod record;

pub use cache::{CachedEntry, HotCache, InMemoryHotCache, RedisHotCache};
pub use error::{ErrorCategory, ErrorClassification};
pub use record::{CacheKind, Observation, Scope};
