//! Outbox worker: drains deferred memory writes with bounded retries,
//! exponential backoff, and dead-lettering.
//!
//! Each delivered row completes the causal audit chain: the gateway's
//! `openmemory_write_failed:*` row and this worker's
//! `outbox_flush_success` row share the same `evidence_refs.outbox_id`.
//! The two correlation ids are independent; they trace different causal
//! stages.

use crate::external::ExternalMemoryClient;
use mnemo_common::config::OutboxConfig;
use mnemo_core::ids::CorrelationId;
use mnemo_core::model::ModelManager;
use mnemo_core::model::audit::{AuditAction, AuditBmc, AuditForInsert, EvidenceRefs};
use mnemo_core::model::knowledge::KnowledgeBmc;
use mnemo_core::model::outbox::{OutboxBmc, OutboxStatus};
use mnemo_core::Result;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerBatchStats {
    pub selected: usize,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub dead: usize,
}

pub struct OutboxWorker {
    mm: ModelManager,
    external: ExternalMemoryClient,
    config: OutboxConfig,
    worker_id: String,
}

impl OutboxWorker {
    pub fn new(
        mm: ModelManager,
        external: ExternalMemoryClient,
        config: OutboxConfig,
        worker_id: String,
    ) -> Self {
        OutboxWorker {
            mm,
            external,
            config,
            worker_id,
        }
    }

    /// Drain one batch of due rows.
    pub async fn process_batch(&self) -> Result<WorkerBatchStats> {
        let mut stats = WorkerBatchStats::default();

        let due = OutboxBmc::select_due(&self.mm, self.config.batch_size, self.config.max_retries)
            .await?;
        stats.selected = due.len();

        for entry in due {
            // Exclusive claim; a zero-row update means another worker won.
            let claimed = OutboxBmc::claim(
                &self.mm,
                entry.outbox_id,
                &self.worker_id,
                self.config.lease_seconds,
                self.config.max_retries,
            )
            .await?;
            if !claimed {
                continue;
            }
            stats.claimed += 1;

            let delivery = tokio::time::timeout(
                Duration::from_secs(self.config.item_timeout_seconds),
                self.external.store(&entry.payload_md, &entry.target_space),
            )
            .await;

            match delivery {
                Ok(Ok(memory_id)) => {
                    OutboxBmc::mark_sent(&self.mm, entry.outbox_id, &memory_id).await?;

                    // Flush audit: same outbox_id as the failure audit,
                    // fresh correlation id for this causal stage.
                    let correlation_id = CorrelationId::new();
                    let mut refs = EvidenceRefs::outbox_worker(&correlation_id);
                    refs.outbox_id = Some(entry.outbox_id);
                    refs.memory_id = Some(memory_id.clone());
                    AuditBmc::insert(
                        &self.mm,
                        AuditForInsert {
                            actor_user_id: self.worker_id.clone(),
                            target_space: entry.target_space.clone(),
                            action: AuditAction::Allow,
                            reason: "outbox_flush_success".to_string(),
                            payload_sha: Some(entry.payload_sha.clone()),
                            evidence_refs: refs,
                        },
                    )
                    .await?;

                    KnowledgeBmc::record(
                        &self.mm,
                        &entry.payload_sha,
                        &entry.payload_md,
                        Some(&memory_id),
                        &entry.target_space,
                    )
                    .await?;

                    info!(outbox_id = entry.outbox_id, %memory_id, "outbox entry delivered");
                    stats.sent += 1;
                }
                Ok(Err(err)) => {
                    let jitter =
                        rand::thread_rng().gen_range(0.0..0.5) * self.config.base_backoff_seconds;
                    let status = OutboxBmc::mark_failed(
                        &self.mm,
                        entry.outbox_id,
                        &err.to_string(),
                        self.config.max_retries,
                        self.config.base_backoff_seconds,
                        jitter,
                    )
                    .await?;
                    warn!(
                        outbox_id = entry.outbox_id,
                        error = %err,
                        status = status.as_str(),
                        "outbox delivery failed"
                    );
                    if status == OutboxStatus::Dead {
                        stats.dead += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
                Err(_elapsed) => {
                    let jitter =
                        rand::thread_rng().gen_range(0.0..0.5) * self.config.base_backoff_seconds;
                    let status = OutboxBmc::mark_failed(
                        &self.mm,
                        entry.outbox_id,
                        &format!(
                            "delivery timed out after {}s",
                            self.config.item_timeout_seconds
                        ),
                        self.config.max_retries,
                        self.config.base_backoff_seconds,
                        jitter,
                    )
                    .await?;
                    warn!(outbox_id = entry.outbox_id, "outbox delivery timed out");
                    if status == OutboxStatus::Dead {
                        stats.dead += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Poll loop with a cooperative stop signal; never aborts mid-batch.
    pub async fn run_loop(&self, mut stop: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        info!(worker_id = %self.worker_id, "outbox worker started");
        loop {
            if *stop.borrow() {
                break;
            }
            let stats = self.process_batch().await?;
            if stats.selected > 0 {
                info!(
                    sent = stats.sent,
                    failed = stats.failed,
                    dead = stats.dead,
                    "outbox batch processed"
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_seconds)) => {}
                _ = stop.changed() => {}
            }
        }
        info!(worker_id = %self.worker_id, "outbox worker stopped");
        Ok(())
    }
}
