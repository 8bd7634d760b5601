//! In-loop adaptive sync policy.
//!
//! The degradation controller watches each batch outcome and tunes the
//! forward window, the batch size, and the diff mode:
//!
//! - rate-limited or timed-out batch → shrink window (floored) and batch
//! - clean batch with enough commits → grow window (capped)
//! - persistent 429/5xx pressure → demote diff mode
//!   (`always → best_effort → none`)

use mnemo_core::ErrorCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Full diff required; fetch failure is an error.
    Always,
    /// Fetch failure downgrades the blob to a metadata ministat.
    BestEffort,
    /// Skip patch content entirely.
    None,
}

impl DiffMode {
    pub fn parse(s: &str) -> DiffMode {
        match s {
            "always" => DiffMode::Always,
            "none" => DiffMode::None,
            _ => DiffMode::BestEffort,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffMode::Always => "always",
            DiffMode::BestEffort => "best_effort",
            DiffMode::None => "none",
        }
    }

    fn demoted(&self) -> DiffMode {
        match self {
            DiffMode::Always => DiffMode::BestEffort,
            DiffMode::BestEffort | DiffMode::None => DiffMode::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DegradationConfig {
    pub forward_window_seconds: i64,
    pub forward_window_min_seconds: i64,
    pub forward_window_max_seconds: i64,
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub shrink_factor: f64,
    pub grow_factor: f64,
    pub commit_threshold: usize,
    /// Consecutive pressured batches before the diff mode is demoted.
    pub demote_after_pressure_batches: u32,
}

impl DegradationConfig {
    pub fn from_sync_config(sync: &mnemo_common::config::SyncConfig) -> Self {
        DegradationConfig {
            forward_window_seconds: sync.forward_window_seconds,
            forward_window_min_seconds: sync.forward_window_min_seconds,
            forward_window_max_seconds: sync.forward_window_seconds * 4,
            batch_size: sync.batch_size,
            min_batch_size: 1,
            shrink_factor: sync.adaptive_shrink_factor,
            grow_factor: sync.adaptive_grow_factor,
            commit_threshold: sync.adaptive_commit_threshold,
            demote_after_pressure_batches: 3,
        }
    }
}

/// What one batch observed, fed back into the controller.
#[derive(Debug, Clone, Default)]
pub struct BatchObservation {
    pub commit_count: usize,
    pub rate_limited: u32,
    pub timeouts: u32,
    pub server_errors: u32,
    pub content_too_large: u32,
}

impl BatchObservation {
    pub fn note(&mut self, category: ErrorCategory) {
        match category {
            ErrorCategory::RateLimited => self.rate_limited += 1,
            ErrorCategory::Timeout => self.timeouts += 1,
            ErrorCategory::ServerError | ErrorCategory::HttpError => self.server_errors += 1,
            ErrorCategory::ContentTooLarge => self.content_too_large += 1,
            _ => {}
        }
    }

    fn pressured(&self) -> bool {
        self.rate_limited > 0 || self.timeouts > 0 || self.server_errors > 0
    }
}

/// Snapshot of current tuning, recorded into the sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationSnapshot {
    pub forward_window_seconds: i64,
    pub batch_size: usize,
    pub diff_mode: String,
    pub pressure_batches: u32,
}

pub struct DegradationController {
    config: DegradationConfig,
    forward_window_seconds: i64,
    batch_size: usize,
    diff_mode: DiffMode,
    consecutive_pressure: u32,
}

impl DegradationController {
    pub fn new(config: DegradationConfig, initial_diff_mode: DiffMode) -> Self {
        let forward = config.forward_window_seconds;
        let batch = config.batch_size;
        DegradationController {
            config,
            forward_window_seconds: forward,
            batch_size: batch,
            diff_mode: initial_diff_mode,
            consecutive_pressure: 0,
        }
    }

    pub fn forward_window_seconds(&self) -> i64 {
        self.forward_window_seconds
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn diff_mode(&self) -> DiffMode {
        self.diff_mode
    }

    /// Feed one batch outcome back in.
    pub fn observe(&mut self, obs: &BatchObservation) {
        if obs.pressured() {
            self.consecutive_pressure += 1;

            let shrunk =
                (self.forward_window_seconds as f64 * self.config.shrink_factor) as i64;
            self.forward_window_seconds =
                shrunk.max(self.config.forward_window_min_seconds);

            let shrunk_batch = (self.batch_size as f64 * self.config.shrink_factor) as usize;
            self.batch_size = shrunk_batch.max(self.config.min_batch_size);

            if self.consecutive_pressure >= self.config.demote_after_pressure_batches {
                let demoted = self.diff_mode.demoted();
                if demoted != self.diff_mode {
                    tracing::warn!(
                        from = self.diff_mode.as_str(),
                        to = demoted.as_str(),
                        "persistent backend pressure, demoting diff mode"
                    );
                    self.diff_mode = demoted;
                    self.consecutive_pressure = 0;
                }
            }
            return;
        }

        self.consecutive_pressure = 0;
        if obs.commit_count >= self.config.commit_threshold {
            let grown = (self.forward_window_seconds as f64 * self.config.grow_factor) as i64;
            self.forward_window_seconds =
                grown.min(self.config.forward_window_max_seconds);
            let grown_batch = (self.batch_size as f64 * self.config.grow_factor) as usize;
            self.batch_size = grown_batch.min(self.config.batch_size);
        }
    }

    pub fn snapshot(&self) -> DegradationSnapshot {
        DegradationSnapshot {
            forward_window_seconds: self.forward_window_seconds,
            batch_size: self.batch_size,
            diff_mode: self.diff_mode.as_str().to_string(),
            pressure_batches: self.consecutive_pressure,
        }
    }
}

/// SVN patch-fetch pacing: long `svn diff` loops renew the sync lease
/// every `renew_interval_revs` processed revisions.
pub struct SvnPatchFetchController {
    renew_interval_revs: usize,
    processed_since_renew: usize,
}

impl SvnPatchFetchController {
    pub fn new(renew_interval_revs: usize) -> Self {
        SvnPatchFetchController {
            renew_interval_revs: renew_interval_revs.max(1),
            processed_since_renew: 0,
        }
    }

    /// Record one processed revision; true when the lease should be
    /// renewed now.
    pub fn should_renew(&mut self) -> bool {
        self.processed_since_renew += 1;
        if self.processed_since_renew >= self.renew_interval_revs {
            self.processed_since_renew = 0;
            true
        } else {
            false
        }
    }
}
