//! Policy engine: decide what happens to a write before anything is
//! stored.
//!
//! Decisions depend on the per-project settings row (`team_write_enabled`
//! plus `policy_json`) and the card's evidence. The engine performs no
//! I/O; the caller loads settings and hands them in.

use crate::card::EvidenceRef;
use mnemo_core::model::team_settings::TeamSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Redirect,
    Reject,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::Redirect => "redirect",
            PolicyAction::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: PolicyAction,
    pub reason: String,
    pub final_space: String,
}

/// Typed view over `team_settings.policy_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_evidence_mode")]
    pub evidence_mode: String,
    #[serde(default = "default_private_prefix")]
    pub private_space_prefix: String,
    #[serde(default = "default_unknown_actor_policy")]
    pub unknown_actor_policy: String,
}

fn default_evidence_mode() -> String {
    "compat".to_string()
}

fn default_private_prefix() -> String {
    "private:".to_string()
}

fn default_unknown_actor_policy() -> String {
    "allow".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            evidence_mode: default_evidence_mode(),
            private_space_prefix: default_private_prefix(),
            unknown_actor_policy: default_unknown_actor_policy(),
        }
    }
}

impl PolicyConfig {
    pub fn from_settings(settings: &TeamSettings) -> Self {
        settings
            .policy_json
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Inputs the engine actually reads.
#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub actor: &'a str,
    /// Whether the actor resolves against the identity registry.
    pub actor_known: bool,
    pub target_space: &'a str,
    pub kind: &'a str,
    pub evidence: &'a [EvidenceRef],
    pub validate_evidence_refs: bool,
}

fn is_team_space(space: &str) -> bool {
    space == "team" || space.starts_with("team:")
}

/// `decide(actor, target_space, kind, evidence, settings)`.
pub fn decide(input: &PolicyInput<'_>, settings: &TeamSettings) -> Decision {
    let config = PolicyConfig::from_settings(settings);

    if !settings.team_write_enabled && is_team_space(input.target_space) {
        return Decision {
            action: PolicyAction::Redirect,
            reason: "policy:team_write_disabled".to_string(),
            final_space: format!("{}{}", config.private_space_prefix, input.actor),
        };
    }

    if !input.actor_known {
        match config.unknown_actor_policy.as_str() {
            "reject" => {
                return Decision {
                    action: PolicyAction::Reject,
                    reason: "policy:unknown_actor".to_string(),
                    final_space: input.target_space.to_string(),
                };
            }
            "degrade" => {
                return Decision {
                    action: PolicyAction::Redirect,
                    reason: "policy:unknown_actor_degraded".to_string(),
                    final_space: format!("{}{}", config.private_space_prefix, input.actor),
                };
            }
            _ => {}
        }
    }

    if input.validate_evidence_refs {
        for evidence in input.evidence {
            if let Err(detail) = evidence.validate() {
                let strict = config.evidence_mode == "strict";
                // Compat mode tolerates malformed refs on non-team spaces.
                if strict || is_team_space(input.target_space) {
                    return Decision {
                        action: PolicyAction::Reject,
                        reason: format!("evidence:invalid:{detail}"),
                        final_space: input.target_space.to_string(),
                    };
                }
            }
        }
    }

    Decision {
        action: PolicyAction::Allow,
        reason: "policy_passed".to_string(),
        final_space: input.target_space.to_string(),
    }
}
