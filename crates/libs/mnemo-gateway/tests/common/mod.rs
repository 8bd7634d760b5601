//! Shared fixtures: isolated database + artifact root, a gateway wired to
//! a caller-provided external-memory endpoint.

#![allow(dead_code)]

use mnemo_common::config::{AppConfig, GatewayConfig};
use mnemo_core::{ModelManager, Result};
use mnemo_gateway::card::{EvidenceRef, MemoryCard};
use mnemo_gateway::external::ExternalMemoryClient;
use mnemo_gateway::gateway::MemoryGateway;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestContext {
    pub mm: ModelManager,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{}.db", counter));
        let artifacts_root = temp_dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts_root)?;

        let db = mnemo_core::store::open_and_migrate(&db_path).await?;
        let mm = ModelManager::new_for_test(db, artifacts_root, Arc::new(AppConfig::default()));
        Ok(Self { mm, temp_dir })
    }

    pub fn gateway(&self, external_base_url: &str) -> MemoryGateway {
        self.gateway_with_config(external_base_url, gateway_config())
    }

    pub fn gateway_with_config(
        &self,
        external_base_url: &str,
        config: GatewayConfig,
    ) -> MemoryGateway {
        let external =
            ExternalMemoryClient::new(external_base_url, 2).expect("external client");
        MemoryGateway::new(self.mm.clone(), external, config)
    }
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        request_timeout_seconds: 2,
        ..AppConfig::default().gateway
    }
}

pub fn sample_card(owner: &str) -> MemoryCard {
    MemoryCard {
        kind: "FACT".to_string(),
        owner: owner.to_string(),
        module: "scm/sync".to_string(),
        summary: "Cursor advancement is monotonic".to_string(),
        details: vec!["Watermark compares (ts, sha) lexicographically".to_string()],
        evidence: vec![EvidenceRef {
            uri: "memory://patch_blobs/git/git:1:abcdef01/aa".to_string(),
            sha256: Some("a".repeat(64)),
            event_id: None,
            svn_rev: None,
            git_commit: None,
            mr: None,
        }],
        confidence: "high".to_string(),
        visibility: "team".to_string(),
        ttl: "long".to_string(),
    }
}
