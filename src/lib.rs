// src/lib.rs
pub mod receiver {
    pub use crate::config::{parse_service_id, Input, Options};
    pub use crate::logging::init_logging;

    /// Async entry-point; returns when the input ends, on Ctrl-C or on a
    /// socket error.
    pub async fn run(opts: Options) -> anyhow::Result<()> {
        crate::core::run(opts).await
    }
}

pub mod constants;
pub mod error;
pub mod types;
pub mod psi;
pub mod dsmcc;
pub mod entity;
pub mod carousel;
pub mod processor;    // TS packets -> protocol messages
pub mod resource;     // module cache, locks, URLs
pub mod event_queue;  // document event delivery
pub mod config;
pub mod logging;

mod core;
mod network;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;
