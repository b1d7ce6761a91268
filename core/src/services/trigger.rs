//! Cost-calculation trigger queue
//!
//! After a transaction commits, cost recomputation is scheduled here instead
//! of running on the write path. The queue is a tokio mpsc channel split into
//! a cloneable [`CostTriggerQueue`] handle for producers and a
//! [`TriggerWorker`] that drains jobs sequentially through an injected
//! handler. A failing job is retried with linear backoff on a spawned timer,
//! so one bad job never stalls the drain loop; after the retry budget is
//! spent the job is dropped with a single terminal audit event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::config::TriggerConfig;
use crate::error::AppResult;

/// One queued cost recomputation, keyed by the transaction that caused it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostJob {
    pub transaction_id: Uuid,
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub transaction_date: NaiveDate,
    pub user_id: String,
}

/// What a handled job produced, reported in the COMPLETE audit event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostJobOutcome {
    pub items: usize,
    pub total_amount: Decimal,
}

/// Handler invoked by the worker for each job
#[async_trait]
pub trait CostJobHandler: Send + Sync {
    async fn handle(&self, job: &CostJob) -> AppResult<CostJobOutcome>;
}

/// Queue tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct TriggerSettings {
    /// Retries before a job is dropped
    pub max_retries: u32,

    /// Base backoff; retry N waits N times this value
    pub retry_delay: Duration,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&TriggerConfig> for TriggerSettings {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: CostJob,
    /// Retries already consumed; 0 on first delivery
    attempt: u32,
}

/// Creates a connected queue handle and worker pair
pub fn cost_trigger_queue(
    handler: Arc<dyn CostJobHandler>,
    audit: Arc<dyn AuditSink>,
    settings: TriggerSettings,
) -> (CostTriggerQueue, TriggerWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let queue = CostTriggerQueue {
        tx: tx.clone(),
        audit: Arc::clone(&audit),
        pending: Arc::clone(&pending),
    };
    let worker = TriggerWorker {
        rx,
        retry_tx: tx,
        handler,
        audit,
        settings,
        pending,
    };
    (queue, worker)
}

/// Producer handle; cloneable and cheap to share across services
#[derive(Clone)]
pub struct CostTriggerQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    audit: Arc<dyn AuditSink>,
    pending: Arc<AtomicUsize>,
}

impl CostTriggerQueue {
    /// Schedules cost recomputation for a committed transaction.
    ///
    /// Never fails: the calling write has already committed and must not be
    /// rolled back because billing is behind. A dropped worker is logged and
    /// the job is discarded.
    pub async fn enqueue(&self, job: CostJob) {
        let entry = AuditEntry::new(
            AuditAction::Trigger,
            "CostJob",
            job.transaction_id.to_string(),
            &job.user_id,
        )
        .with_detail(json!({
            "batch_lot": job.batch_lot,
            "transaction_date": job.transaction_date,
        }));

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueuedJob { job, attempt: 0 }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("trigger queue worker is gone, cost job discarded");
        }
        self.audit.record(entry).await;
    }

    /// Jobs currently queued, including retries waiting on their timers once
    /// those have been re-sent
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Consumer side; owns the channel receiver and drains sequentially
pub struct TriggerWorker {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
    /// Kept for re-enqueueing retries; also keeps the channel open, so `run`
    /// loops until the task is aborted
    retry_tx: mpsc::UnboundedSender<QueuedJob>,
    handler: Arc<dyn CostJobHandler>,
    audit: Arc<dyn AuditSink>,
    settings: TriggerSettings,
    pending: Arc<AtomicUsize>,
}

impl TriggerWorker {
    /// Drain loop for production use; spawn this on the runtime
    pub async fn run(mut self) {
        tracing::info!(
            max_retries = self.settings.max_retries,
            retry_delay_ms = self.settings.retry_delay.as_millis() as u64,
            "trigger worker started"
        );
        while let Some(queued) = self.rx.recv().await {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.process(queued).await;
        }
    }

    /// Processes everything currently in the channel, then returns. Retries
    /// scheduled on timers are picked up by a later drain.
    pub async fn drain_pending(&mut self) {
        while let Ok(queued) = self.rx.try_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.process(queued).await;
        }
    }

    /// Discards everything currently queued without processing
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn process(&self, queued: QueuedJob) {
        let QueuedJob { job, attempt } = queued;
        match self.handler.handle(&job).await {
            Ok(outcome) => {
                tracing::debug!(
                    transaction_id = %job.transaction_id,
                    items = outcome.items,
                    "cost job completed"
                );
                self.audit
                    .record(
                        AuditEntry::new(
                            AuditAction::Complete,
                            "CostJob",
                            job.transaction_id.to_string(),
                            &job.user_id,
                        )
                        .with_detail(json!({
                            "items": outcome.items,
                            "total_amount": outcome.total_amount,
                        })),
                    )
                    .await;
            }
            Err(err) if attempt < self.settings.max_retries => {
                let next_attempt = attempt + 1;
                let delay = self.settings.retry_delay * next_attempt;
                tracing::warn!(
                    transaction_id = %job.transaction_id,
                    attempt = next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "cost job failed, retry scheduled"
                );
                self.audit
                    .record(
                        AuditEntry::new(
                            AuditAction::Retry,
                            "CostJob",
                            job.transaction_id.to_string(),
                            &job.user_id,
                        )
                        .with_detail(json!({
                            "attempt": next_attempt,
                            "delay_ms": delay.as_millis() as u64,
                            "error": err.to_string(),
                        })),
                    )
                    .await;

                // Re-enqueue on a timer so the drain loop moves on to the
                // next job immediately.
                let tx = self.retry_tx.clone();
                let pending = Arc::clone(&self.pending);
                pending.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if tx
                        .send(QueuedJob {
                            job,
                            attempt: next_attempt,
                        })
                        .is_err()
                    {
                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
            Err(err) => {
                tracing::error!(
                    transaction_id = %job.transaction_id,
                    attempts = attempt + 1,
                    error = %err,
                    "cost job failed permanently"
                );
                self.audit
                    .record(
                        AuditEntry::new(
                            AuditAction::Failed,
                            "CostJob",
                            job.transaction_id.to_string(),
                            &job.user_id,
                        )
                        .with_detail(json!({
                            "attempts": attempt + 1,
                            "error": err.to_string(),
                        })),
                    )
                    .await;
            }
        }
    }
}
