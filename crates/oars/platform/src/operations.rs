//! Operations status surface.

use oars_backplane::{BackplaneDepth, ExecutionBackplane};
use oars_ledger::ImmutableLedger;
use oars_siem::SiemDeliveryService;
use oars_types::{LedgerStatus, OarsError, TargetMetrics};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One aggregate health snapshot for the admin surface.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    pub ledger: LedgerStatus,
    pub siem_queue_length: usize,
    pub siem_backpressure_drops: u64,
    pub siem_targets: HashMap<String, TargetMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backplane: Option<BackplaneDepth>,
}

pub struct OperationsService {
    ledger: Arc<ImmutableLedger>,
    siem: Arc<SiemDeliveryService>,
    backplane: Option<Arc<dyn ExecutionBackplane>>,
}

impl OperationsService {
    pub fn new(
        ledger: Arc<ImmutableLedger>,
        siem: Arc<SiemDeliveryService>,
        backplane: Option<Arc<dyn ExecutionBackplane>>,
    ) -> Self {
        Self {
            ledger,
            siem,
            backplane,
        }
    }

    pub async fn status(&self) -> Result<PlatformStatus, OarsError> {
        let backplane = match &self.backplane {
            Some(backplane) => Some(backplane.depth().await?),
            None => None,
        };
        Ok(PlatformStatus {
            ledger: self.ledger.status().await?,
            siem_queue_length: self.siem.queue_length().await,
            siem_backpressure_drops: self.siem.backpressure_drop_count().await,
            siem_targets: self.siem.metrics(),
            backplane,
        })
    }
}
