/*
[INPUT]:  Public API exports for the ticker-feed-client crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod manager;

// Re-export main types for convenience
pub use config::FeedConfig;
pub use manager::{
    ConnectionState, LastValueCache, StateHandler, StateListener, Subscription, TickerCallback,
    TickerManager,
};
