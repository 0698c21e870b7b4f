//! Application configuration

mod settings;

pub use settings::{
    CacheBackend, CacheSettings, DatabaseSettings, DepthSettings, RateLimitSettings,
    ReconnectSettings, SchedulerSettings, Settings, StreamingSettings, SymbolSettings,
    VendorSettings,
};
