//! Gateway write and query paths.
//!
//! Write path: render → dedup probe → policy → external store → audit,
//! with the durable outbox as the failure branch. Two orderings are
//! load-bearing:
//!
//! - the outbox enqueue happens BEFORE the failure audit, so the audit
//!   row can embed the `outbox_id`;
//! - audit inserts are fatal to the request (fail-closed): a successful
//!   external write whose audit insert fails returns `action="error"`,
//!   and the external write is deliberately not compensated.
//!
//! The correlation id is generated at the HTTP/CLI boundary and threaded
//! through unchanged; nothing below this layer regenerates it.

use crate::card::{MemoryCard, RenderLimits, render_card};
use crate::external::{ExternalMemoryClient, MemoryHit, redact_error};
use crate::policy::{self, PolicyAction, PolicyInput};
use mnemo_common::config::GatewayConfig;
use mnemo_core::ids::CorrelationId;
use mnemo_core::model::ModelManager;
use mnemo_core::model::attachment::{AttachmentBmc, AttachmentForCreate};
use mnemo_core::model::audit::{AuditAction, AuditBmc, AuditForInsert, EvidenceRefs};
use mnemo_core::model::knowledge::KnowledgeBmc;
use mnemo_core::model::outbox::OutboxBmc;
use mnemo_core::model::team_settings::TeamSettingsBmc;
use mnemo_core::{ErrorCategory, Result};
use serde::Serialize;
use tracing::{error, info, warn};

/// Gateway response for a store request; mirrors the API contract.
#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub ok: bool,
    /// `allow | redirect | reject | deferred | error`
    pub action: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_sha: Option<String>,
    #[serde(default)]
    pub deduped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub ok: bool,
    pub correlation_id: String,
    pub results: Vec<MemoryHit>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EvidenceOutcome {
    Stored {
        ok: bool,
        attachment_id: i64,
        uri: String,
        sha256: String,
        size_bytes: i64,
    },
    TooLarge {
        ok: bool,
        error_code: String,
        size: usize,
        max: usize,
    },
}

pub struct MemoryGateway {
    mm: ModelManager,
    external: ExternalMemoryClient,
    config: GatewayConfig,
    limits: RenderLimits,
}

impl MemoryGateway {
    pub fn new(mm: ModelManager, external: ExternalMemoryClient, config: GatewayConfig) -> Self {
        MemoryGateway {
            mm,
            external,
            config,
            limits: RenderLimits::default(),
        }
    }

    pub fn mm(&self) -> &ModelManager {
        &self.mm
    }

    /// The write path. `correlation_id` comes from the boundary.
    pub async fn store(
        &self,
        card: &MemoryCard,
        actor_known: bool,
        target_space: &str,
        correlation_id: &CorrelationId,
    ) -> Result<StoreOutcome> {
        if let Err(detail) = card.validate() {
            return Ok(StoreOutcome {
                ok: false,
                action: "error".to_string(),
                correlation_id: correlation_id.to_string(),
                memory_id: None,
                outbox_id: None,
                reason: Some(format!("validation_error:{detail}")),
                payload_sha: None,
                deduped: false,
            });
        }

        let rendered = render_card(card, &self.limits);

        // Dedup probe: an identical payload was already delivered.
        if let Some(hit) = KnowledgeBmc::check_dedup(&self.mm, &rendered.payload_sha).await?
            && let Some(memory_id) = hit.memory_id
        {
            info!(payload_sha = %rendered.payload_sha, %memory_id, "dedup hit");
            return Ok(StoreOutcome {
                ok: true,
                action: "allow".to_string(),
                correlation_id: correlation_id.to_string(),
                memory_id: Some(memory_id),
                outbox_id: None,
                reason: None,
                payload_sha: Some(rendered.payload_sha),
                deduped: true,
            });
        }

        let settings = TeamSettingsBmc::get(&self.mm, &self.config.project_key).await?;
        let decision = policy::decide(
            &PolicyInput {
                actor: &card.owner,
                actor_known,
                target_space,
                kind: &card.kind,
                evidence: &card.evidence,
                validate_evidence_refs: self.config.validate_evidence_refs,
            },
            &settings,
        );

        if decision.action == PolicyAction::Reject {
            AuditBmc::insert(
                &self.mm,
                AuditForInsert {
                    actor_user_id: card.owner.clone(),
                    target_space: target_space.to_string(),
                    action: AuditAction::Reject,
                    reason: decision.reason.clone(),
                    payload_sha: Some(rendered.payload_sha.clone()),
                    evidence_refs: EvidenceRefs::gateway(correlation_id),
                },
            )
            .await?;
            return Ok(StoreOutcome {
                ok: false,
                action: "reject".to_string(),
                correlation_id: correlation_id.to_string(),
                memory_id: None,
                outbox_id: None,
                reason: Some(decision.reason),
                payload_sha: Some(rendered.payload_sha),
                deduped: false,
            });
        }

        let final_space = decision.final_space.clone();

        match self.external.store(&rendered.payload_md, &final_space).await {
            Ok(memory_id) => {
                let audit_action = match decision.action {
                    PolicyAction::Redirect => AuditAction::Redirect,
                    _ => AuditAction::Allow,
                };
                let mut refs = EvidenceRefs::gateway(correlation_id);
                refs.memory_id = Some(memory_id.clone());
                let audit = AuditBmc::insert(
                    &self.mm,
                    AuditForInsert {
                        actor_user_id: card.owner.clone(),
                        target_space: final_space.clone(),
                        action: audit_action,
                        reason: decision.reason.clone(),
                        payload_sha: Some(rendered.payload_sha.clone()),
                        evidence_refs: refs,
                    },
                )
                .await;
                if let Err(e) = audit {
                    // Fail closed: the external write stands (external
                    // memory is authoritative), the request does not.
                    error!(error = %e, "audit insert failed after successful store");
                    return Ok(StoreOutcome {
                        ok: false,
                        action: "error".to_string(),
                        correlation_id: correlation_id.to_string(),
                        memory_id: Some(memory_id),
                        outbox_id: None,
                        reason: Some("audit_or_outbox_write_failed".to_string()),
                        payload_sha: Some(rendered.payload_sha),
                        deduped: false,
                    });
                }

                KnowledgeBmc::record(
                    &self.mm,
                    &rendered.payload_sha,
                    &rendered.payload_md,
                    Some(&memory_id),
                    &final_space,
                )
                .await?;

                Ok(StoreOutcome {
                    ok: true,
                    action: decision.action.as_str().to_string(),
                    correlation_id: correlation_id.to_string(),
                    memory_id: Some(memory_id),
                    outbox_id: None,
                    reason: match decision.action {
                        PolicyAction::Redirect => Some(decision.reason),
                        _ => None,
                    },
                    payload_sha: Some(rendered.payload_sha),
                    deduped: false,
                })
            }
            Err(err) => {
                warn!(error = %err, space = %final_space, "external memory store failed, deferring");

                // Outbox FIRST, so the audit can embed the outbox_id.
                let outbox_id = match OutboxBmc::enqueue(
                    &self.mm,
                    &final_space,
                    &rendered.payload_md,
                    &rendered.payload_sha,
                )
                .await
                {
                    Ok(outbox_id) => outbox_id,
                    Err(e) => {
                        error!(error = %e, "outbox enqueue failed after external failure");
                        return Ok(StoreOutcome {
                            ok: false,
                            action: "error".to_string(),
                            correlation_id: correlation_id.to_string(),
                            memory_id: None,
                            outbox_id: None,
                            reason: Some("audit_or_outbox_write_failed".to_string()),
                            payload_sha: Some(rendered.payload_sha),
                            deduped: false,
                        });
                    }
                };

                let mut refs = EvidenceRefs::gateway(correlation_id);
                refs.outbox_id = Some(outbox_id);
                refs.error = Some(redact_error(&err));
                let audit = AuditBmc::insert(
                    &self.mm,
                    AuditForInsert {
                        actor_user_id: card.owner.clone(),
                        target_space: final_space.clone(),
                        action: AuditAction::Redirect,
                        reason: format!("openmemory_write_failed:{}", err.category),
                        payload_sha: Some(rendered.payload_sha.clone()),
                        evidence_refs: refs,
                    },
                )
                .await;
                if let Err(e) = audit {
                    error!(error = %e, "failure audit insert failed");
                    return Ok(StoreOutcome {
                        ok: false,
                        action: "error".to_string(),
                        correlation_id: correlation_id.to_string(),
                        memory_id: None,
                        outbox_id: Some(outbox_id),
                        reason: Some("audit_or_outbox_write_failed".to_string()),
                        payload_sha: Some(rendered.payload_sha),
                        deduped: false,
                    });
                }

                KnowledgeBmc::record(
                    &self.mm,
                    &rendered.payload_sha,
                    &rendered.payload_md,
                    None,
                    &final_space,
                )
                .await?;

                Ok(StoreOutcome {
                    ok: false,
                    action: "deferred".to_string(),
                    correlation_id: correlation_id.to_string(),
                    memory_id: None,
                    outbox_id: Some(outbox_id),
                    reason: Some(format!("openmemory_write_failed:{}", err.category)),
                    payload_sha: Some(rendered.payload_sha),
                    deduped: false,
                })
            }
        }
    }

    /// Query path: external search, falling back to the local candidate
    /// corpus when the service is unreachable.
    pub async fn query(
        &self,
        query: &str,
        space: Option<&str>,
        limit: usize,
        correlation_id: &CorrelationId,
    ) -> Result<QueryOutcome> {
        match self.external.search(query, space, limit).await {
            Ok(results) => Ok(QueryOutcome {
                ok: true,
                correlation_id: correlation_id.to_string(),
                results,
                degraded: false,
                fallback: None,
            }),
            Err(err) => {
                warn!(error = %err, "external memory search failed, using local fallback");
                let candidates = KnowledgeBmc::search_prefix(&self.mm, query, limit).await?;
                let results = candidates
                    .into_iter()
                    .map(|c| MemoryHit {
                        memory_id: c.memory_id.unwrap_or_else(|| format!("candidate-{}", c.id)),
                        text: c.payload_md,
                        score: None,
                    })
                    .collect();
                Ok(QueryOutcome {
                    ok: true,
                    correlation_id: correlation_id.to_string(),
                    results,
                    degraded: true,
                    fallback: Some("knowledge_candidates".to_string()),
                })
            }
        }
    }

    /// Evidence upload: cap, hash, store, register.
    pub async fn store_evidence(
        &self,
        kind: &str,
        filename: Option<&str>,
        bytes: &[u8],
        item_id: Option<i64>,
    ) -> Result<EvidenceOutcome> {
        let max = self.config.evidence_max_size_bytes;
        if bytes.len() > max {
            return Ok(EvidenceOutcome::TooLarge {
                ok: false,
                error_code: ErrorCategory::ContentTooLarge.as_str().to_string(),
                size: bytes.len(),
                max,
            });
        }

        let sha256 = mnemo_core::artifact::sha256_hex(bytes);
        let meta = filename.map(|name| serde_json::json!({ "filename": name }));
        let attachment = AttachmentBmc::create(
            &self.mm,
            AttachmentForCreate {
                item_id,
                kind: kind.to_string(),
                sha256: sha256.clone(),
                size_bytes: bytes.len() as i64,
                meta_json: meta,
            },
        )
        .await?;

        // Content lands under attachments/<id>/<sha256>; the row's
        // canonical memory:// uri points at it.
        let rel_path = format!("attachments/{}/{}", attachment.attachment_id, sha256);
        self.mm.artifacts().put(&rel_path, bytes)?;

        Ok(EvidenceOutcome::Stored {
            ok: true,
            attachment_id: attachment.attachment_id,
            uri: attachment.uri.unwrap_or_default(),
            sha256,
            size_bytes: bytes.len() as i64,
        })
    }
}
