//! Standardized logging configuration for the acquisition services.
//!
//! Wraps `tracing-subscriber` with a small config surface:
//!
//! - `RUST_LOG`: standard tracing filter (e.g. `info`, `flow_manager=debug`)
//! - `LOG_FORMAT`: output format - `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: timestamp format - `local` (default), `utc`, or `none`

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
