//! OARS receipt service.
//!
//! Builds one signed receipt per action transition, chains receipts per
//! action oldest to newest, anchors each in the immutable ledger, and
//! verifies receipts and whole chains with or without store access.
//!
//! Canonical form for hashing and signing is the receipt JSON minus its
//! `integrity` block, serialized with sorted keys and no whitespace.

#![deny(unsafe_code)]

use chrono::Utc;
use oars_crypto::{hash_canonical, verify_with_public_pem};
use oars_events::SecurityEventService;
use oars_keys::SigningKeyService;
use oars_ledger::ImmutableLedger;
use oars_store::{EvidenceStore, ReceiptStore};
use oars_types::{
    prefixed_id, ActionRecord, EventSeverity, EvidenceEdge, EvidenceNode, OarsError,
    PolicySnapshot, Receipt, ReceiptIntegrity, ReceiptType, RiskAssessment, TenantPublicKey,
    VerificationReport, RECEIPT_SCHEMA_VERSION,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Inputs for one receipt.
pub struct CreateReceipt<'a> {
    pub action: &'a ActionRecord,
    pub receipt_type: ReceiptType,
    pub policy: PolicySnapshot,
    pub risk: RiskAssessment,
    pub request_id: &'a str,
}

/// What to verify: a stored receipt by id, or a standalone receipt with
/// caller-supplied key material and optional chain.
pub enum VerifyRequest {
    ById {
        tenant_id: String,
        receipt_id: String,
    },
    Standalone {
        receipt: Box<Receipt>,
        chain: Option<Vec<Receipt>>,
        public_key_pem: Option<String>,
        public_keys: Option<Vec<TenantPublicKey>>,
    },
}

pub struct ReceiptService {
    receipts: Arc<dyn ReceiptStore>,
    evidence: Arc<dyn EvidenceStore>,
    keys: Arc<SigningKeyService>,
    ledger: Arc<ImmutableLedger>,
    events: Option<Arc<SecurityEventService>>,
}

impl ReceiptService {
    pub fn new(
        receipts: Arc<dyn ReceiptStore>,
        evidence: Arc<dyn EvidenceStore>,
        keys: Arc<SigningKeyService>,
        ledger: Arc<ImmutableLedger>,
    ) -> Self {
        Self {
            receipts,
            evidence,
            keys,
            ledger,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<SecurityEventService>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build, sign, persist, and ledger-anchor one receipt.
    pub async fn create_receipt(&self, input: CreateReceipt<'_>) -> Result<Receipt, OarsError> {
        let action = input.action;
        let prior = self
            .receipts
            .list_receipts_for_action(&action.tenant_id, &action.action_id)
            .await?;
        let previous_receipt_id = prior.last().map(|r| r.receipt_id.clone());

        let mut receipt = Receipt {
            receipt_id: prefixed_id("rcpt"),
            action_id: action.action_id.clone(),
            tenant_id: action.tenant_id.clone(),
            receipt_type: input.receipt_type,
            timestamp: Utc::now(),
            schema_version: RECEIPT_SCHEMA_VERSION.to_string(),
            resource: action.resource.clone(),
            actor: action.actor.clone(),
            policy: input.policy,
            risk: input.risk,
            previous_receipt_id,
            integrity: None,
        };

        let payload_hash = canonical_payload_hash(&receipt)?;
        let bundle = self
            .keys
            .sign(&action.tenant_id, payload_hash.as_bytes())
            .await?;
        receipt.integrity = Some(ReceiptIntegrity {
            signing_key_id: bundle.key_id,
            signature: bundle.signature,
            payload_hash,
        });

        self.receipts.insert_receipt(receipt.clone()).await?;
        self.ledger.append_receipt(&receipt).await?;

        if let Some(events) = &self.events {
            events
                .publish(
                    &action.tenant_id,
                    "receipt.created",
                    EventSeverity::Info,
                    "receipt-service",
                    json!({
                        "receiptId": receipt.receipt_id,
                        "actionId": action.action_id,
                        "type": receipt.receipt_type,
                        "requestId": input.request_id,
                    }),
                )
                .await?;
        }

        self.link_evidence(&receipt).await?;

        info!(
            receipt = %receipt.receipt_id,
            action = %action.action_id,
            kind = receipt.receipt_type.as_str(),
            "receipt issued"
        );
        Ok(receipt)
    }

    async fn link_evidence(&self, receipt: &Receipt) -> Result<(), OarsError> {
        let now = Utc::now();
        self.evidence
            .upsert_evidence_node(EvidenceNode {
                node_id: receipt.receipt_id.clone(),
                tenant_id: receipt.tenant_id.clone(),
                kind: "receipt".to_string(),
                label: receipt.receipt_type.as_str().to_string(),
                created_at: now,
            })
            .await?;
        self.evidence
            .insert_evidence_edge(EvidenceEdge {
                edge_id: prefixed_id("edg"),
                tenant_id: receipt.tenant_id.clone(),
                from_id: receipt.action_id.clone(),
                to_id: receipt.receipt_id.clone(),
                relation: "has_receipt".to_string(),
                created_at: now,
            })
            .await?;
        if let Some(previous) = &receipt.previous_receipt_id {
            self.evidence
                .insert_evidence_edge(EvidenceEdge {
                    edge_id: prefixed_id("edg"),
                    tenant_id: receipt.tenant_id.clone(),
                    from_id: receipt.receipt_id.clone(),
                    to_id: previous.clone(),
                    relation: "follows".to_string(),
                    created_at: now,
                })
                .await?;
        }
        Ok(())
    }

    /// Verify one receipt: schema, signature, and chain.
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerificationReport, OarsError> {
        let (receipt, chain, pem, key_list) = match request {
            VerifyRequest::ById {
                tenant_id,
                receipt_id,
            } => {
                let receipt = self
                    .receipts
                    .get_receipt(&tenant_id, &receipt_id)
                    .await?
                    .ok_or_else(|| {
                        OarsError::NotFound(format!("receipt {receipt_id} not found"))
                    })?;
                let chain = self
                    .receipts
                    .list_receipts_for_action(&tenant_id, &receipt.action_id)
                    .await?;
                (receipt, Some(chain), None, None)
            }
            VerifyRequest::Standalone {
                receipt,
                chain,
                public_key_pem,
                public_keys,
            } => (*receipt, chain, public_key_pem, public_keys),
        };

        let mut errors = Vec::new();
        let is_schema_valid = validate_schema(&receipt, &mut errors);
        let is_signature_valid = self
            .verify_signature(&receipt, pem.as_deref(), key_list.as_deref(), &mut errors)
            .await;
        let is_chain_valid = match &chain {
            Some(chain) => {
                self.verify_chain(&receipt, chain, pem.as_deref(), key_list.as_deref(), &mut errors)
                    .await
            }
            // Without chain context only the receipt's own linkage shape
            // can be judged, which schema validation already covered.
            None => true,
        };

        Ok(VerificationReport {
            is_signature_valid,
            is_chain_valid,
            is_schema_valid,
            verification_errors: errors,
        })
    }

    async fn verify_signature(
        &self,
        receipt: &Receipt,
        pem: Option<&str>,
        key_list: Option<&[TenantPublicKey]>,
        errors: &mut Vec<String>,
    ) -> bool {
        let Some(integrity) = &receipt.integrity else {
            errors.push(format!("receipt {} has no integrity block", receipt.receipt_id));
            return false;
        };

        let payload_hash = match canonical_payload_hash(receipt) {
            Ok(hash) => hash,
            Err(error) => {
                errors.push(format!(
                    "receipt {} cannot be canonicalized: {error}",
                    receipt.receipt_id
                ));
                return false;
            }
        };
        if payload_hash != integrity.payload_hash {
            errors.push(format!(
                "receipt {} payload hash mismatch",
                receipt.receipt_id
            ));
            return false;
        }

        let verified = if let Some(pem) = pem {
            verify_with_public_pem(pem, payload_hash.as_bytes(), &integrity.signature)
        } else if let Some(keys) = key_list {
            match keys.iter().find(|k| k.key_id == integrity.signing_key_id) {
                Some(key) => verify_with_public_pem(
                    &key.public_key_pem,
                    payload_hash.as_bytes(),
                    &integrity.signature,
                ),
                None => {
                    errors.push(format!(
                        "unknown signing key {}",
                        integrity.signing_key_id
                    ));
                    return false;
                }
            }
        } else {
            match self.keys.get_public_key(&integrity.signing_key_id).await {
                Some(key) => verify_with_public_pem(
                    &key.public_key_pem,
                    payload_hash.as_bytes(),
                    &integrity.signature,
                ),
                None => {
                    errors.push(format!(
                        "unknown signing key {}",
                        integrity.signing_key_id
                    ));
                    return false;
                }
            }
        };

        if !verified {
            errors.push(format!(
                "receipt {} signature does not verify",
                receipt.receipt_id
            ));
        }
        verified
    }

    async fn verify_chain(
        &self,
        receipt: &Receipt,
        chain: &[Receipt],
        pem: Option<&str>,
        key_list: Option<&[TenantPublicKey]>,
        errors: &mut Vec<String>,
    ) -> bool {
        let mut ordered: Vec<&Receipt> = chain
            .iter()
            .filter(|r| r.action_id == receipt.action_id)
            .collect();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        if !ordered.iter().any(|r| r.receipt_id == receipt.receipt_id) {
            errors.push(format!(
                "receipt {} is not part of the supplied chain",
                receipt.receipt_id
            ));
            return false;
        }

        let mut valid = true;
        let mut previous: Option<&Receipt> = None;
        for link in ordered {
            match (previous, &link.previous_receipt_id) {
                (None, None) => {}
                (None, Some(_)) => {
                    errors.push(format!(
                        "first receipt {} references a predecessor",
                        link.receipt_id
                    ));
                    valid = false;
                }
                (Some(prior), Some(reference)) if &prior.receipt_id == reference => {}
                (Some(prior), _) => {
                    errors.push(format!(
                        "receipt {} does not chain to {}",
                        link.receipt_id, prior.receipt_id
                    ));
                    valid = false;
                }
            }
            if let Some(prior) = previous {
                if link.timestamp < prior.timestamp {
                    errors.push(format!(
                        "receipt {} timestamp precedes its predecessor",
                        link.receipt_id
                    ));
                    valid = false;
                }
            }
            if !self.verify_signature(link, pem, key_list, errors).await {
                valid = false;
            }
            previous = Some(link);
        }
        valid
    }
}

/// SHA-256 over the canonical JSON of the receipt without `integrity`.
fn canonical_payload_hash(receipt: &Receipt) -> Result<String, OarsError> {
    let mut unsigned = receipt.clone();
    unsigned.integrity = None;
    let value = serde_json::to_value(&unsigned)
        .map_err(|e| OarsError::Internal(format!("receipt serialization failed: {e}")))?;
    Ok(hash_canonical(&value))
}

fn validate_schema(receipt: &Receipt, errors: &mut Vec<String>) -> bool {
    let mut valid = true;
    if receipt.receipt_id.trim().is_empty() {
        errors.push("receiptId is empty".to_string());
        valid = false;
    }
    if receipt.action_id.trim().is_empty() {
        errors.push("actionId is empty".to_string());
        valid = false;
    }
    if receipt.tenant_id.trim().is_empty() {
        errors.push("tenantId is empty".to_string());
        valid = false;
    }
    if receipt.schema_version != RECEIPT_SCHEMA_VERSION {
        errors.push(format!(
            "unsupported schema version {}",
            receipt.schema_version
        ));
        valid = false;
    }
    if receipt.integrity.is_none() {
        errors.push("integrity block is missing".to_string());
        valid = false;
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oars_crypto::FieldProtection;
    use oars_siem::{DeliveryRequest, RetrySettings, SiemDeliveryService, SiemTransport};
    use oars_store::file::FilePlatformStore;
    use oars_types::{
        ActionActor, ActionContext, ActionResource, ActionState, PolicyDecision, RiskTier,
    };

    struct NullTransport;

    #[async_trait]
    impl SiemTransport for NullTransport {
        async fn send(&self, _request: &DeliveryRequest) -> Result<(), String> {
            Ok(())
        }
    }

    struct Fixture {
        service: ReceiptService,
        keys: Arc<SigningKeyService>,
        store: Arc<FilePlatformStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FilePlatformStore::in_memory(FieldProtection::disabled()));
        let keys = Arc::new(SigningKeyService::ephemeral());
        let ledger = Arc::new(
            ImmutableLedger::open(dir.path().join("ledger.ndjson")).await.unwrap(),
        );
        let siem = Arc::new(
            SiemDeliveryService::new(
                vec![],
                Arc::new(NullTransport),
                RetrySettings::default(),
                None,
                None,
            )
            .await
            .unwrap(),
        );
        let events = Arc::new(SecurityEventService::new(
            store.clone(),
            Arc::clone(&ledger),
            siem,
            None,
        ));
        let service = ReceiptService::new(
            store.clone(),
            store.clone(),
            Arc::clone(&keys),
            ledger,
        )
        .with_events(events);
        Fixture {
            service,
            keys,
            store,
            _dir: dir,
        }
    }

    fn action() -> ActionRecord {
        let now = Utc::now();
        ActionRecord {
            action_id: prefixed_id("act"),
            tenant_id: "tenant_alpha".into(),
            state: ActionState::Requested,
            actor: ActionActor {
                agent_id: Some("agent_finops".into()),
                ..Default::default()
            },
            resource: ActionResource {
                tool_id: "jira".into(),
                operation: "create_ticket".into(),
                target: "project:SEC".into(),
            },
            input: json!({"summary": "x"}),
            context: ActionContext::default(),
            policy: None,
            risk: None,
            approval_id: None,
            receipt_ids: vec![],
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn policy() -> PolicySnapshot {
        PolicySnapshot {
            decision: PolicyDecision::Allow,
            policy_set_id: None,
            policy_version: None,
            rule_ids: vec![],
            rationale: "Default policy: allow.".into(),
        }
    }

    fn risk() -> RiskAssessment {
        RiskAssessment {
            score: 45,
            tier: RiskTier::Medium,
            signals: vec!["mutating_operation".into()],
        }
    }

    async fn issue(fx: &Fixture, action: &ActionRecord, kind: ReceiptType) -> Receipt {
        fx.service
            .create_receipt(CreateReceipt {
                action,
                receipt_type: kind,
                policy: policy(),
                risk: risk(),
                request_id: "req_1",
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn receipts_chain_per_action_and_verify() {
        let fx = fixture().await;
        let action = action();

        let first = issue(&fx, &action, ReceiptType::Requested).await;
        let second = issue(&fx, &action, ReceiptType::Approved).await;
        let third = issue(&fx, &action, ReceiptType::Executed).await;

        assert!(first.previous_receipt_id.is_none());
        assert_eq!(second.previous_receipt_id.as_deref(), Some(first.receipt_id.as_str()));
        assert_eq!(third.previous_receipt_id.as_deref(), Some(second.receipt_id.as_str()));

        let report = fx
            .service
            .verify(VerifyRequest::ById {
                tenant_id: "tenant_alpha".into(),
                receipt_id: third.receipt_id.clone(),
            })
            .await
            .unwrap();
        assert!(report.is_valid(), "errors: {:?}", report.verification_errors);
    }

    #[tokio::test]
    async fn verification_survives_key_rotation() {
        let fx = fixture().await;
        let action = action();
        let before = issue(&fx, &action, ReceiptType::Requested).await;

        fx.keys.rotate_tenant_key("tenant_alpha").await.unwrap();
        let after = issue(&fx, &action, ReceiptType::Approved).await;

        let old_key = before.integrity.as_ref().unwrap().signing_key_id.clone();
        let new_key = after.integrity.as_ref().unwrap().signing_key_id.clone();
        assert_ne!(old_key, new_key);

        let report = fx
            .service
            .verify(VerifyRequest::ById {
                tenant_id: "tenant_alpha".into(),
                receipt_id: before.receipt_id.clone(),
            })
            .await
            .unwrap();
        assert!(report.is_signature_valid);
        assert!(report.is_chain_valid);
    }

    #[tokio::test]
    async fn tampered_receipt_fails_signature() {
        let fx = fixture().await;
        let action = action();
        let mut receipt = issue(&fx, &action, ReceiptType::Requested).await;
        receipt.resource.target = "project:OTHER".into();

        let report = fx
            .service
            .verify(VerifyRequest::Standalone {
                receipt: Box::new(receipt),
                chain: None,
                public_key_pem: None,
                public_keys: None,
            })
            .await
            .unwrap();
        assert!(!report.is_signature_valid);
        assert!(report
            .verification_errors
            .iter()
            .any(|e| e.contains("payload hash mismatch")));
    }

    #[tokio::test]
    async fn unknown_signing_key_reports_cleanly() {
        let fx = fixture().await;
        let action = action();
        let receipt = issue(&fx, &action, ReceiptType::Requested).await;

        let report = fx
            .service
            .verify(VerifyRequest::Standalone {
                receipt: Box::new(receipt),
                chain: None,
                public_key_pem: None,
                public_keys: Some(vec![]),
            })
            .await
            .unwrap();
        assert!(!report.is_signature_valid);
        assert!(report
            .verification_errors
            .iter()
            .any(|e| e.contains("unknown signing key")));
    }

    #[tokio::test]
    async fn supplied_public_keys_allow_offline_verification() {
        let fx = fixture().await;
        let action = action();
        let receipt = issue(&fx, &action, ReceiptType::Requested).await;
        let public_keys = fx.keys.list_tenant_public_keys("tenant_alpha").await;

        let report = fx
            .service
            .verify(VerifyRequest::Standalone {
                receipt: Box::new(receipt.clone()),
                chain: Some(vec![receipt]),
                public_key_pem: None,
                public_keys: Some(public_keys),
            })
            .await
            .unwrap();
        assert!(report.is_valid(), "errors: {:?}", report.verification_errors);
    }

    #[tokio::test]
    async fn broken_chain_linkage_is_detected() {
        let fx = fixture().await;
        let action = action();
        let first = issue(&fx, &action, ReceiptType::Requested).await;
        let mut second = issue(&fx, &action, ReceiptType::Approved).await;

        // Break linkage and re-sign so only the chain check can catch it.
        second.previous_receipt_id = Some("rcpt_forged".into());
        second.integrity = None;
        let payload_hash = canonical_payload_hash(&second).unwrap();
        let bundle = fx.keys.sign("tenant_alpha", payload_hash.as_bytes()).await.unwrap();
        second.integrity = Some(ReceiptIntegrity {
            signing_key_id: bundle.key_id,
            signature: bundle.signature,
            payload_hash,
        });

        let report = fx
            .service
            .verify(VerifyRequest::Standalone {
                receipt: Box::new(second.clone()),
                chain: Some(vec![first, second]),
                public_key_pem: None,
                public_keys: None,
            })
            .await
            .unwrap();
        assert!(!report.is_chain_valid);
        assert!(report.is_signature_valid);
    }

    #[tokio::test]
    async fn evidence_edges_link_action_and_prior_receipt() {
        let fx = fixture().await;
        let action = action();
        let first = issue(&fx, &action, ReceiptType::Requested).await;
        let second = issue(&fx, &action, ReceiptType::Approved).await;

        let edges = fx
            .store
            .evidence_neighbors("tenant_alpha", &second.receipt_id)
            .await
            .unwrap();
        assert!(edges
            .iter()
            .any(|e| e.from_id == action.action_id && e.relation == "has_receipt"));
        assert!(edges
            .iter()
            .any(|e| e.to_id == first.receipt_id && e.relation == "follows"));
    }
}
