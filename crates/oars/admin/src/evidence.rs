//! Evidence graph administration.
//!
//! Nodes and edges are ids only; traversal happens through the store, so
//! the action/receipt/event web stays cycle-safe.

use chrono::Utc;
use oars_store::{EvidenceStore, QueryWindow};
use oars_types::{prefixed_id, EvidenceEdge, EvidenceNode, OarsError, Page};
use std::sync::Arc;

pub struct EvidenceService {
    store: Arc<dyn EvidenceStore>,
}

impl EvidenceService {
    pub fn new(store: Arc<dyn EvidenceStore>) -> Self {
        Self { store }
    }

    pub async fn add_node(
        &self,
        tenant_id: &str,
        node_id: &str,
        kind: &str,
        label: &str,
    ) -> Result<EvidenceNode, OarsError> {
        let node = EvidenceNode {
            node_id: node_id.to_string(),
            tenant_id: tenant_id.to_string(),
            kind: kind.to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
        };
        self.store.upsert_evidence_node(node.clone()).await?;
        Ok(node)
    }

    pub async fn link(
        &self,
        tenant_id: &str,
        from_id: &str,
        to_id: &str,
        relation: &str,
    ) -> Result<EvidenceEdge, OarsError> {
        if from_id == to_id {
            return Err(OarsError::Validation(
                "evidence edge endpoints must differ".into(),
            ));
        }
        let edge = EvidenceEdge {
            edge_id: prefixed_id("edg"),
            tenant_id: tenant_id.to_string(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            relation: relation.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_evidence_edge(edge.clone()).await?;
        Ok(edge)
    }

    pub async fn neighbors(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> Result<Vec<EvidenceEdge>, OarsError> {
        Ok(self.store.evidence_neighbors(tenant_id, node_id).await?)
    }

    pub async fn list_edges(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> Result<Page<EvidenceEdge>, OarsError> {
        Ok(self.store.list_evidence_edges(tenant_id, window).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oars_crypto::FieldProtection;
    use oars_store::file::FilePlatformStore;

    #[tokio::test]
    async fn edges_are_traversable_from_either_end() {
        let service = EvidenceService::new(Arc::new(FilePlatformStore::in_memory(
            FieldProtection::disabled(),
        )));
        service.add_node("tenant_alpha", "act_1", "action", "submit").await.unwrap();
        service.add_node("tenant_alpha", "rcpt_1", "receipt", "requested").await.unwrap();
        service.link("tenant_alpha", "act_1", "rcpt_1", "has_receipt").await.unwrap();

        let from_action = service.neighbors("tenant_alpha", "act_1").await.unwrap();
        let from_receipt = service.neighbors("tenant_alpha", "rcpt_1").await.unwrap();
        assert_eq!(from_action.len(), 1);
        assert_eq!(from_receipt.len(), 1);

        assert!(service
            .link("tenant_alpha", "act_1", "act_1", "self")
            .await
            .is_err());
    }
}
