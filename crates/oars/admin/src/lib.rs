//! OARS administrative surfaces.
//!
//! Tenant and member directory, service accounts, SCIM provisioning,
//! the evidence graph, compliance control mappings, and backup
//! manifests. Every mutation publishes a security event so admin
//! activity lands in the ledger and SIEM like any other change.

#![deny(unsafe_code)]

mod backup;
mod controls;
mod directory;
mod evidence;
mod scim;

pub use backup::BackupService;
pub use controls::{ControlCoverage, ControlService};
pub use directory::{DirectoryService, NewServiceAccount};
pub use evidence::EvidenceService;
pub use scim::ScimService;
