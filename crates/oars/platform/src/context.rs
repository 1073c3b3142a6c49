//! Platform context: every per-process singleton, assembled once at
//! startup and passed by reference. Nothing here is reachable through
//! ambient globals.

use crate::action::ActionService;
use crate::config::{BackplaneDriver, BackplaneMode, PlatformConfig, StoreKind};
use crate::operations::OperationsService;
use oars_admin::{BackupService, ControlService, DirectoryService, EvidenceService, ScimService};
use oars_approvals::{ApprovalService, DevStepUpVerifier};
use oars_backplane::{
    file::FileBackplane, BackplaneSettings, ExecutionBackplane, Worker, WorkerSettings,
};
use oars_connectors::{ConnectorRegistry, ExecutionService};
use oars_crypto::FieldProtection;
use oars_events::{AlertRouter, SecurityEventService};
use oars_identity::{IdempotencyService, WorkloadIdentityVerifier};
use oars_keys::SigningKeyService;
use oars_ledger::{ImmutableLedger, RetentionService};
use oars_policy::PolicyService;
use oars_receipts::ReceiptService;
use oars_siem::{
    DeadLetterAdmin, HttpTransport, RetrySettings, SiemDeliveryService, StoreDeadLetterSink,
};
use oars_store::{file::FilePlatformStore, PlatformStore};
use oars_types::OarsError;
use oars_vault::VaultSecretService;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub struct PlatformContext {
    pub config: PlatformConfig,
    pub store: Arc<dyn PlatformStore>,
    pub keys: Arc<SigningKeyService>,
    pub ledger: Arc<ImmutableLedger>,
    pub siem: Arc<SiemDeliveryService>,
    pub dead_letters: Arc<DeadLetterAdmin>,
    pub events: Arc<SecurityEventService>,
    pub alerts: Arc<AlertRouter>,
    pub policy: Arc<PolicyService>,
    pub approvals: Arc<ApprovalService>,
    pub vault: Arc<VaultSecretService>,
    pub registry: Arc<ConnectorRegistry>,
    pub execution: Arc<ExecutionService>,
    pub receipts: Arc<ReceiptService>,
    pub backplane: Option<Arc<dyn ExecutionBackplane>>,
    pub idempotency: Arc<IdempotencyService>,
    pub mtls: Arc<WorkloadIdentityVerifier>,
    pub retention: Arc<RetentionService>,
    pub directory: Arc<DirectoryService>,
    pub scim: Arc<ScimService>,
    pub evidence: Arc<EvidenceService>,
    pub controls: Arc<ControlService>,
    pub backup: Arc<BackupService>,
    pub actions: Arc<ActionService>,
    pub operations: Arc<OperationsService>,
}

impl PlatformContext {
    /// Assemble the platform from configuration. Ledger verification and
    /// store schema failures abort startup here.
    pub async fn build(config: PlatformConfig) -> Result<Self, OarsError> {
        let protection =
            FieldProtection::from_optional_key(config.data_encryption_key.as_deref());

        match config.store {
            StoreKind::File => {
                let store = Arc::new(
                    FilePlatformStore::open(config.data_dir.join("store.json"), protection)
                        .await?,
                );
                Self::assemble(config, store).await
            }
            StoreKind::Postgres => Self::build_postgres(config, protection).await,
        }
    }

    #[cfg(feature = "postgres")]
    async fn build_postgres(
        config: PlatformConfig,
        protection: FieldProtection,
    ) -> Result<Self, OarsError> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| OarsError::Validation("postgres store requires DATABASE_URL".into()))?;
        let store = Arc::new(
            oars_store::postgres::PostgresPlatformStore::connect(&url, protection).await?,
        );
        Self::assemble(config, store).await
    }

    #[cfg(not(feature = "postgres"))]
    async fn build_postgres(
        _config: PlatformConfig,
        _protection: FieldProtection,
    ) -> Result<Self, OarsError> {
        Err(OarsError::Validation(
            "STORE=postgres requires the `postgres` cargo feature".into(),
        ))
    }

    /// Wire every service off the concrete store type so each one gets
    /// exactly the trait surface it needs.
    async fn assemble<S>(config: PlatformConfig, store: Arc<S>) -> Result<Self, OarsError>
    where
        S: PlatformStore + 'static,
    {
        let keys = Arc::new(
            SigningKeyService::open(config.data_dir.join("tenant-keys.json")).await?,
        );
        let ledger = Arc::new(ImmutableLedger::open(&config.immutable_ledger_path).await?);

        let transport = Arc::new(HttpTransport::new(30).map_err(OarsError::Internal)?);
        let siem = Arc::new(
            SiemDeliveryService::new(
                config.siem_targets.clone(),
                transport,
                RetrySettings {
                    interval_seconds: config.siem_retry_interval_seconds,
                    max_attempts: config.siem_retry_max_attempts,
                    max_queue_size: config.siem_retry_max_queue_size,
                },
                config.siem_retry_queue_path.clone(),
                Some(Arc::new(StoreDeadLetterSink::new(store.clone()))),
            )
            .await
            .map_err(OarsError::Internal)?,
        );
        if config.siem_retry_auto_start {
            siem.start_retry_scheduler();
        }
        let dead_letters = Arc::new(DeadLetterAdmin::new(store.clone(), siem.clone()));

        let events = Arc::new(SecurityEventService::new(
            store.clone(),
            ledger.clone(),
            siem.clone(),
            config.event_file_sink.clone(),
        ));
        let alerts = Arc::new(AlertRouter::new(store.clone(), events.clone()));

        let policy = Arc::new(PolicyService::new(store.clone()));
        let approvals = Arc::new(
            ApprovalService::new(store.clone(), store.clone(), Arc::new(DevStepUpVerifier))
                .with_events(events.clone()),
        );
        let vault = Arc::new(VaultSecretService::new(store.clone()).with_events(events.clone()));
        let registry = Arc::new(ConnectorRegistry::with_builtins(
            config.connector_allow_list.clone(),
        ));
        let execution = Arc::new(ExecutionService::new(registry.clone(), vault.clone()));
        let receipts = Arc::new(
            ReceiptService::new(store.clone(), store.clone(), keys.clone(), ledger.clone())
                .with_events(events.clone()),
        );

        let backplane: Option<Arc<dyn ExecutionBackplane>> = match config.backplane_mode {
            BackplaneMode::Inline => None,
            BackplaneMode::Queue => {
                let settings = BackplaneSettings {
                    max_attempts: config.backplane_max_attempts,
                    lock_timeout_seconds: config.backplane_lock_timeout_seconds,
                    retry_delay_seconds: config.backplane_retry_delay_seconds,
                };
                match config.backplane_driver {
                    BackplaneDriver::File => Some(Arc::new(
                        FileBackplane::open(config.data_dir.join("jobs.json"), settings).await?,
                    )),
                    BackplaneDriver::Postgres => {
                        Some(Self::postgres_backplane(&config, settings).await?)
                    }
                }
            }
        };

        let idempotency = Arc::new(IdempotencyService::new(store.clone()));
        let mtls = Arc::new(WorkloadIdentityVerifier::new(config.mtls.clone()));
        let retention = Arc::new(RetentionService::new(store.clone(), ledger.clone()));
        let directory = Arc::new(DirectoryService::new(store.clone()).with_events(events.clone()));
        let scim = Arc::new(ScimService::new(store.clone()).with_events(events.clone()));
        let evidence = Arc::new(EvidenceService::new(store.clone()));
        let controls = Arc::new(ControlService::new(store.clone(), ledger.clone()));
        let backup = Arc::new(BackupService::new(config.data_dir.join("backups")));

        let actions = Arc::new(ActionService::new(
            store.clone(),
            policy.clone(),
            approvals.clone(),
            receipts.clone(),
            execution.clone(),
            alerts.clone(),
            events.clone(),
            idempotency.clone(),
            backplane.clone(),
        ));
        let operations = Arc::new(OperationsService::new(
            ledger.clone(),
            siem.clone(),
            backplane.clone(),
        ));

        info!(
            store = ?config.store,
            backplane = ?config.backplane_mode,
            siem_targets = config.siem_targets.len(),
            "platform context assembled"
        );
        Ok(Self {
            config,
            store,
            keys,
            ledger,
            siem,
            dead_letters,
            events,
            alerts,
            policy,
            approvals,
            vault,
            registry,
            execution,
            receipts,
            backplane,
            idempotency,
            mtls,
            retention,
            directory,
            scim,
            evidence,
            controls,
            backup,
            actions,
            operations,
        })
    }

    #[cfg(feature = "postgres")]
    async fn postgres_backplane(
        config: &PlatformConfig,
        settings: BackplaneSettings,
    ) -> Result<Arc<dyn ExecutionBackplane>, OarsError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            OarsError::Validation("postgres backplane requires DATABASE_URL".into())
        })?;
        Ok(Arc::new(
            oars_backplane::postgres::PostgresBackplane::connect(url, settings).await?,
        ))
    }

    #[cfg(not(feature = "postgres"))]
    async fn postgres_backplane(
        _config: &PlatformConfig,
        _settings: BackplaneSettings,
    ) -> Result<Arc<dyn ExecutionBackplane>, OarsError> {
        Err(OarsError::Validation(
            "BACKPLANE_DRIVER=postgres requires the `postgres` cargo feature".into(),
        ))
    }

    /// Spawn a backplane worker task. Returns the shutdown handle, or
    /// `None` when the platform runs inline.
    pub fn spawn_worker(&self) -> Option<watch::Sender<bool>> {
        let backplane = self.backplane.clone()?;
        let worker = Worker::new(
            backplane,
            self.actions.clone(),
            WorkerSettings {
                poll_interval_ms: self.config.backplane_poll_interval_ms,
                claim_limit: self.config.backplane_claim_limit,
                retry_delay_seconds: self.config.backplane_retry_delay_seconds,
                ..Default::default()
            },
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(error) = worker.run(stop_rx).await {
                tracing::error!(%error, "backplane worker exited with error");
            }
        });
        Some(stop_tx)
    }

    /// Orderly shutdown of background machinery.
    pub fn shutdown(&self) {
        self.siem.stop_retry_scheduler();
    }
}
