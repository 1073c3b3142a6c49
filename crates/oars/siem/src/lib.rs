//! OARS SIEM delivery.
//!
//! Fans every security event out to the configured targets and survives
//! target outages: failed deliveries land in a disk-persisted retry queue
//! drained by a scheduler with exponential backoff, and items that exhaust
//! their retries move to tenant-scoped dead-letter storage.

#![deny(unsafe_code)]

mod deadletter;
mod delivery;
mod targets;
mod transport;

pub use deadletter::{DeadLetterAdmin, DeadLetterSink, StoreDeadLetterSink};
pub use delivery::{RetrySettings, SiemDeliveryService};
pub use targets::build_delivery;
pub use transport::{DeliveryRequest, HttpTransport, SiemTransport};
