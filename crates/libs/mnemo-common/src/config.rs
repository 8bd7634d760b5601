use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
///
/// Loaded once in `main` and passed down as `Arc<AppConfig>`; nothing in
/// the library crates reads the environment directly.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub artifacts: ArtifactsConfig,
    pub svn: SvnConfig,
    pub gitlab: GitLabConfig,
    pub sync: SyncConfig,
    pub materialize: MaterializeConfig,
    pub gateway: GatewayConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path of the local database file. `POSTGRES_DSN` overrides this when
    /// set so deployments keep a single connection knob.
    pub path: String,
    /// Schema/namespace hint carried through for operational tooling.
    pub schema: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArtifactsConfig {
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SvnConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub non_interactive: bool,
    pub trust_server_cert: bool,
    pub command_timeout_seconds: u64,
    pub batch_size: usize,
    pub overlap: i64,
    pub lease_seconds: i64,
    pub renew_interval_revs: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GitLabConfig {
    pub url: Option<String>,
    pub project_id: Option<String>,
    pub ref_name: Option<String>,
    pub tenant_id: Option<String>,
    /// Token source: `env` | `file` | `exec`.
    pub token_source: String,
    pub token_env: String,
    pub token_file: Option<String>,
    pub token_exec: Option<String>,
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub max_concurrency: usize,
    pub per_page: usize,
    pub lease_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    /// `strict` | `best_effort`
    pub mode: String,
    /// `always` | `best_effort` | `none`
    pub diff_mode: String,
    pub overlap_seconds: i64,
    pub time_window_days: i64,
    pub forward_window_seconds: i64,
    pub forward_window_min_seconds: i64,
    pub adaptive_shrink_factor: f64,
    pub adaptive_grow_factor: f64,
    pub adaptive_commit_threshold: usize,
    pub bulk_git_total_changes_threshold: i64,
    pub bulk_git_files_changed_threshold: i64,
    pub bulk_svn_changed_paths_threshold: i64,
    pub bulk_diff_size_threshold: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MaterializeConfig {
    pub batch_size: usize,
    pub retry_failed: bool,
    pub max_size_bytes: usize,
    /// `strict` | `mirror`
    pub sha_mismatch_policy: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub openmemory_base_url: String,
    pub request_timeout_seconds: u64,
    pub project_key: String,
    pub private_space_prefix: String,
    pub evidence_max_size_bytes: usize,
    pub validate_evidence_refs: bool,
    /// Gate profile name carried into policy decisions (`default`, `strict`, ...).
    pub profile: String,
    /// Whether the semantic index backend is attached.
    pub seekdb_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutboxConfig {
    pub batch_size: usize,
    pub max_retries: i64,
    pub base_backoff_seconds: f64,
    pub lease_seconds: i64,
    pub item_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
}

/// Parse boolean environment variable with truthy value detection
pub fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "t" | "y"))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8787,
            },
            database: DatabaseConfig {
                path: "data/mnemo.db".to_string(),
                schema: None,
            },
            artifacts: ArtifactsConfig {
                root: "data/artifacts".to_string(),
            },
            svn: SvnConfig {
                url: None,
                username: None,
                password: None,
                non_interactive: true,
                trust_server_cert: false,
                command_timeout_seconds: 60,
                batch_size: 100,
                overlap: 0,
                lease_seconds: 300,
                renew_interval_revs: 10,
            },
            gitlab: GitLabConfig {
                url: None,
                project_id: None,
                ref_name: None,
                tenant_id: None,
                token_source: "env".to_string(),
                token_env: "GITLAB_TOKEN".to_string(),
                token_file: None,
                token_exec: None,
                request_timeout_seconds: 60,
                max_attempts: 3,
                backoff_base_seconds: 1.0,
                backoff_max_seconds: 60.0,
                rate_limit_rps: 10,
                rate_limit_burst: 20,
                max_concurrency: 4,
                per_page: 100,
                lease_seconds: 120,
            },
            sync: SyncConfig {
                batch_size: 100,
                mode: "best_effort".to_string(),
                diff_mode: "best_effort".to_string(),
                overlap_seconds: 120,
                time_window_days: 30,
                forward_window_seconds: 86_400,
                forward_window_min_seconds: 3_600,
                adaptive_shrink_factor: 0.5,
                adaptive_grow_factor: 1.5,
                adaptive_commit_threshold: 20,
                bulk_git_total_changes_threshold: 2_000,
                bulk_git_files_changed_threshold: 50,
                bulk_svn_changed_paths_threshold: 50,
                bulk_diff_size_threshold: 1_048_576,
            },
            materialize: MaterializeConfig {
                batch_size: 50,
                retry_failed: false,
                max_size_bytes: 10 * 1024 * 1024,
                sha_mismatch_policy: "strict".to_string(),
            },
            gateway: GatewayConfig {
                openmemory_base_url: "http://127.0.0.1:8077".to_string(),
                request_timeout_seconds: 15,
                project_key: "default".to_string(),
                private_space_prefix: "private:".to_string(),
                evidence_max_size_bytes: 10 * 1024 * 1024,
                validate_evidence_refs: true,
                profile: "default".to_string(),
                seekdb_enabled: false,
            },
            outbox: OutboxConfig {
                batch_size: 20,
                max_retries: 5,
                base_backoff_seconds: 2.0,
                lease_seconds: 60,
                item_timeout_seconds: 15,
                poll_interval_seconds: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration with 12-factor env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. Env vars of record (`PORT`, `HOST`, `OPENMEMORY_BASE_URL`, ...)
    /// 2. Config files (`config/default.toml`, `config/{run_mode}.toml`)
    /// 3. Hardcoded defaults
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let defaults = AppConfig::default();

        let mut builder = Config::builder()
            .add_source(Config::try_from(&defaults)?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        // 12-factor standard overrides
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse::<i64>()
        {
            builder = builder.set_override("server.port", p)?;
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        // Environment variables of record. Unknown env vars are ignored.
        if let Ok(dsn) = env::var("POSTGRES_DSN") {
            builder = builder.set_override("database.path", dsn)?;
        }
        if let Ok(schema) = env::var("OM_PG_SCHEMA") {
            builder = builder.set_override("database.schema", schema)?;
        }
        if let Ok(url) = env::var("OPENMEMORY_BASE_URL") {
            builder = builder.set_override("gateway.openmemory_base_url", url)?;
        }
        if let Ok(key) = env::var("PROJECT_KEY") {
            builder = builder.set_override("gateway.project_key", key)?;
        }
        if let Ok(max) = env::var("EVIDENCE_MAX_SIZE_BYTES")
            && let Ok(n) = max.parse::<i64>()
        {
            builder = builder.set_override("gateway.evidence_max_size_bytes", n)?;
        }
        if let Ok(profile) = env::var("GATE_PROFILE") {
            builder = builder.set_override("gateway.profile", profile)?;
        }
        if let Some(enabled) = parse_bool_env("STEP3_PGVECTOR_AUTO_INIT") {
            builder = builder.set_override("gateway.seekdb_enabled", enabled)?;
        }

        builder.build()?.try_deserialize()
    }
}
