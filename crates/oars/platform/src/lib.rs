//! OARS platform assembly.
//!
//! Configuration from the environment, the `PlatformContext` holding every
//! per-process singleton, the Action Service that orchestrates the full
//! state machine, and the operations status surface. No ambient globals:
//! everything the services need flows through the context.

#![deny(unsafe_code)]

mod action;
mod config;
mod context;
mod operations;

pub use action::{ActionService, DecisionResponse};
pub use config::{BackplaneDriver, BackplaneMode, PlatformConfig, StoreKind};
pub use context::PlatformContext;
pub use operations::{OperationsService, PlatformStatus};

use tracing_subscriber::EnvFilter;

/// Initialize tracing from `RUST_LOG`. Safe to call more than once.
pub fn init_telemetry() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
