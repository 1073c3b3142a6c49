//! OARS connector layer.
//!
//! The `Connector` contract, a registry with an operator allow-list, the
//! outbound target sandbox, and the execution service that stitches them
//! together. Individual connector business logic lives behind the
//! contract; the simulators here stand in for it.

#![deny(unsafe_code)]

mod execution;
mod registry;
mod sandbox;

pub use execution::{ExecutionOutcome, ExecutionService};
pub use registry::{Connector, ConnectorRegistry, ConnectorResult, SimulatedConnector};
pub use sandbox::is_forbidden_target;
