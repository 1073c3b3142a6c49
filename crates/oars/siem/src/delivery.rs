//! Delivery service: synchronous fan-out plus the durable retry queue.

use crate::deadletter::DeadLetterSink;
use crate::targets::build_delivery;
use crate::transport::SiemTransport;
use chrono::{Duration, Utc};
use oars_types::{RetryQueueItem, SecurityEvent, SiemTargetConfig, TargetMetrics};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Retry queue tuning.
#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub interval_seconds: u64,
    pub max_attempts: u32,
    pub max_queue_size: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            max_attempts: 5,
            max_queue_size: 1000,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    items: Vec<RetryQueueItem>,
    #[serde(default)]
    backpressure_drop_count: u64,
}

/// Multi-target SIEM delivery with a persistent retry queue.
pub struct SiemDeliveryService {
    targets: Vec<SiemTargetConfig>,
    transport: Arc<dyn SiemTransport>,
    settings: RetrySettings,
    queue_path: Option<PathBuf>,
    queue: Mutex<QueueDocument>,
    metrics: SyncMutex<HashMap<String, TargetMetrics>>,
    dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
    in_progress: AtomicBool,
    scheduler_stop: SyncMutex<Option<watch::Sender<bool>>>,
}

impl SiemDeliveryService {
    /// Build the service, reloading any persisted retry queue from disk.
    pub async fn new(
        targets: Vec<SiemTargetConfig>,
        transport: Arc<dyn SiemTransport>,
        settings: RetrySettings,
        queue_path: Option<PathBuf>,
        dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
    ) -> Result<Self, String> {
        let queue = match &queue_path {
            Some(path) if tokio::fs::try_exists(path).await.map_err(|e| e.to_string())? => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::from_str(&raw).map_err(|e| e.to_string())?
            }
            _ => QueueDocument::default(),
        };

        Ok(Self {
            targets,
            transport,
            settings,
            queue_path,
            queue: Mutex::new(queue),
            metrics: SyncMutex::new(HashMap::new()),
            dead_letter_sink,
            in_progress: AtomicBool::new(false),
            scheduler_stop: SyncMutex::new(None),
        })
    }

    pub fn targets(&self) -> &[SiemTargetConfig] {
        &self.targets
    }

    /// Deliver `event` to every target; failures land in the retry queue.
    pub async fn publish(&self, event: &SecurityEvent) {
        for target in &self.targets {
            match self.send_to_target(target, event).await {
                Ok(()) => self.record_success(target.id()),
                Err(error) => {
                    warn!(target = target.id(), %error, "siem delivery failed, queueing for retry");
                    self.record_failure(target.id(), &error);
                    self.enqueue(RetryQueueItem {
                        target_id: target.id().to_string(),
                        event: event.clone(),
                        attempts: 1,
                        next_attempt_at: Utc::now()
                            + Duration::seconds(self.settings.interval_seconds as i64),
                        last_error: error,
                    })
                    .await;
                }
            }
        }
    }

    /// Deliver one event to one target immediately, bypassing the queue.
    pub async fn replay_to_target(
        &self,
        target_id: &str,
        event: &SecurityEvent,
    ) -> Result<(), String> {
        let target = self
            .targets
            .iter()
            .find(|t| t.id() == target_id)
            .ok_or_else(|| format!("unknown siem target {target_id}"))?;
        match self.send_to_target(target, event).await {
            Ok(()) => {
                self.record_success(target_id);
                Ok(())
            }
            Err(error) => {
                self.record_failure(target_id, &error);
                Err(error)
            }
        }
    }

    async fn send_to_target(
        &self,
        target: &SiemTargetConfig,
        event: &SecurityEvent,
    ) -> Result<(), String> {
        let request = build_delivery(target, event)?;
        self.transport.send(&request).await
    }

    fn record_success(&self, target_id: &str) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(target_id.to_string()).or_default();
        entry.success_count += 1;
    }

    fn record_failure(&self, target_id: &str, error: &str) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(target_id.to_string()).or_default();
        entry.failure_count += 1;
        entry.last_error = Some(error.to_string());
    }

    /// Per-target delivery counters.
    pub fn metrics(&self) -> HashMap<String, TargetMetrics> {
        self.metrics.lock().clone()
    }

    pub async fn queue_length(&self) -> usize {
        self.queue.lock().await.items.len()
    }

    pub async fn backpressure_drop_count(&self) -> u64 {
        self.queue.lock().await.backpressure_drop_count
    }

    async fn enqueue(&self, item: RetryQueueItem) {
        let mut queue = self.queue.lock().await;
        if queue.items.len() >= self.settings.max_queue_size {
            // Evict the soonest-due item so the queue keeps absorbing
            // fresh failures under sustained outage.
            if let Some(evict_index) = queue
                .items
                .iter()
                .enumerate()
                .min_by_key(|(_, i)| i.next_attempt_at)
                .map(|(index, _)| index)
            {
                queue.items.remove(evict_index);
                queue.backpressure_drop_count += 1;
            }
        }
        queue.items.push(item);
        self.persist_queue(&queue).await;
    }

    async fn persist_queue(&self, queue: &QueueDocument) {
        let Some(path) = &self.queue_path else {
            return;
        };
        let serialized = match serde_json::to_string(queue) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(%error, "failed to serialize siem retry queue");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(error) = tokio::fs::create_dir_all(parent).await {
                warn!(%error, "failed to create siem queue directory");
                return;
            }
        }
        let tmp = path.with_extension("tmp");
        if let Err(error) = tokio::fs::write(&tmp, serialized.as_bytes()).await {
            warn!(%error, "failed to write siem retry queue");
            return;
        }
        if let Err(error) = tokio::fs::rename(&tmp, path).await {
            warn!(%error, "failed to replace siem retry queue");
        }
    }

    /// One retry pass. `force` retries items regardless of due time.
    /// Reentrancy-guarded: overlapping cycles are skipped, not queued.
    pub async fn run_cycle(&self, force: bool) -> usize {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("siem retry cycle already in progress, skipping");
            return 0;
        }

        let drained = self.run_cycle_inner(force).await;
        self.in_progress.store(false, Ordering::SeqCst);
        drained
    }

    async fn run_cycle_inner(&self, force: bool) -> usize {
        let now = Utc::now();
        let due: Vec<RetryQueueItem> = {
            let mut queue = self.queue.lock().await;
            let (due, remaining): (Vec<_>, Vec<_>) = queue
                .items
                .drain(..)
                .partition(|item| force || item.next_attempt_at <= now);
            queue.items = remaining;
            self.persist_queue(&queue).await;
            due
        };

        let mut drained = 0;
        for mut item in due {
            let Some(target) = self.targets.iter().find(|t| t.id() == item.target_id) else {
                warn!(target = %item.target_id, "retry item references unknown target, dropping");
                continue;
            };
            match self.send_to_target(target, &item.event).await {
                Ok(()) => {
                    self.record_success(&item.target_id);
                    drained += 1;
                }
                Err(error) => {
                    self.record_failure(&item.target_id, &error);
                    item.attempts += 1;
                    item.last_error = error;
                    if item.attempts >= self.settings.max_attempts {
                        if let Some(sink) = &self.dead_letter_sink {
                            sink.dead_letter(item).await;
                        } else {
                            warn!(target = %item.target_id, "retries exhausted with no dead-letter sink");
                        }
                    } else {
                        let backoff = self.settings.interval_seconds as i64
                            * i64::from(item.attempts.min(4));
                        item.next_attempt_at = now + Duration::seconds(backoff);
                        self.enqueue(item).await;
                    }
                }
            }
        }
        drained
    }

    /// Force a full pass over the queue regardless of due times.
    pub async fn flush_queue(&self) -> usize {
        self.run_cycle(true).await
    }

    /// Start the background retry scheduler. Idempotent.
    pub fn start_retry_scheduler(self: &Arc<Self>) {
        let mut stop_slot = self.scheduler_stop.lock();
        if stop_slot.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *stop_slot = Some(stop_tx);

        let service = Arc::clone(self);
        let interval = std::time::Duration::from_secs(service.settings.interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.run_cycle(false).await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stop the scheduler; the current cycle finishes cleanly.
    pub fn stop_retry_scheduler(&self) {
        if let Some(stop) = self.scheduler_stop.lock().take() {
            let _ = stop.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeliveryRequest, SiemTransport};
    use async_trait::async_trait;
    use oars_types::prefixed_id;
    use std::sync::atomic::AtomicU32;

    /// Fails the first N sends, then succeeds.
    struct FlakyTransport {
        failures_remaining: AtomicU32,
        sends: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failures),
                sends: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SiemTransport for FlakyTransport {
        async fn send(&self, _request: &DeliveryRequest) -> Result<(), String> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                Err("connection refused".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn webhook_target(id: &str) -> SiemTargetConfig {
        SiemTargetConfig::GenericWebhook {
            id: id.into(),
            url: "https://siem.example.com/ingest".into(),
            auth_header: None,
        }
    }

    fn sample_event() -> SecurityEvent {
        SecurityEvent {
            event_id: prefixed_id("evt"),
            tenant_id: "tenant_alpha".into(),
            event_type: "action.requested".into(),
            severity: oars_types::EventSeverity::Info,
            actor: "system".into(),
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    async fn service_with(
        transport: Arc<dyn SiemTransport>,
        settings: RetrySettings,
    ) -> SiemDeliveryService {
        SiemDeliveryService::new(
            vec![webhook_target("hook1")],
            transport,
            settings,
            None,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn queue_drains_after_transient_failures() {
        let transport = Arc::new(FlakyTransport::new(3));
        let service = service_with(transport.clone(), RetrySettings::default()).await;

        service.publish(&sample_event()).await;
        assert_eq!(service.queue_length().await, 1);

        // Three forced cycles: two more failures, then success.
        for _ in 0..3 {
            service.flush_queue().await;
        }
        assert_eq!(service.queue_length().await, 0);

        let metrics = service.metrics();
        let hook = metrics.get("hook1").unwrap();
        assert_eq!(hook.success_count, 1);
        assert_eq!(hook.failure_count, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_go_to_dead_letter_sink() {
        struct CaptureSink(Mutex<Vec<RetryQueueItem>>);

        #[async_trait]
        impl DeadLetterSink for CaptureSink {
            async fn dead_letter(&self, item: RetryQueueItem) {
                self.0.lock().await.push(item);
            }
        }

        let sink = Arc::new(CaptureSink(Mutex::new(Vec::new())));
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let service = SiemDeliveryService::new(
            vec![webhook_target("hook1")],
            transport,
            RetrySettings {
                max_attempts: 3,
                ..Default::default()
            },
            None,
            Some(sink.clone()),
        )
        .await
        .unwrap();

        service.publish(&sample_event()).await;
        service.flush_queue().await;
        service.flush_queue().await;

        assert_eq!(service.queue_length().await, 0);
        let captured = sink.0.lock().await;
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].attempts, 3);
    }

    #[tokio::test]
    async fn backpressure_evicts_soonest_due_item() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let service = service_with(
            transport,
            RetrySettings {
                max_queue_size: 2,
                ..Default::default()
            },
        )
        .await;

        for _ in 0..3 {
            service.publish(&sample_event()).await;
        }
        assert_eq!(service.queue_length().await, 2);
        assert_eq!(service.backpressure_drop_count().await, 1);
    }

    #[tokio::test]
    async fn queue_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("siem-retry.json");
        let transport = Arc::new(FlakyTransport::new(u32::MAX));

        {
            let service = SiemDeliveryService::new(
                vec![webhook_target("hook1")],
                transport.clone(),
                RetrySettings::default(),
                Some(path.clone()),
                None,
            )
            .await
            .unwrap();
            service.publish(&sample_event()).await;
            assert_eq!(service.queue_length().await, 1);
        }

        let reloaded = SiemDeliveryService::new(
            vec![webhook_target("hook1")],
            transport,
            RetrySettings::default(),
            Some(path),
            None,
        )
        .await
        .unwrap();
        assert_eq!(reloaded.queue_length().await, 1);
    }

    #[tokio::test]
    async fn replay_to_unknown_target_errors() {
        let transport = Arc::new(FlakyTransport::new(0));
        let service = service_with(transport, RetrySettings::default()).await;
        let result = service.replay_to_target("missing", &sample_event()).await;
        assert!(result.is_err());
    }
}
