//! mnemo: engineering-memory platform CLI.
//!
//! Subcommands map one-to-one onto the operational jobs: the HTTP gateway
//! (`serve`), the sync pipelines (`sync-svn`, `sync-gitlab`), blob
//! materialization (`materialize`), the outbox drain (`outbox-worker`),
//! the integrity scan (`integrity-check`), and the reliability report
//! (`report`).
//!
//! Exit codes: 0 clean, 1 issues found or operation failure, 10 SVN sync
//! error, 11 GitLab sync error, 12 materialize error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mnemo_common::config::AppConfig;
use mnemo_core::ModelManager;
use mnemo_core::model::lease::generate_worker_id;
use mnemo_core::model::repo::{RepoBmc, RepoForEnsure};
use mnemo_gateway::external::ExternalMemoryClient;
use mnemo_gateway::gateway::MemoryGateway;
use mnemo_gateway::outbox_worker::OutboxWorker;
use mnemo_scm::gitlab::{GitLabClient, TokenProvider};
use mnemo_scm::integrity::{IntegrityChecker, IntegrityOptions};
use mnemo_scm::materialize::{LivePatchFetcher, Materializer, ShaMismatchPolicy};
use mnemo_scm::policy::{DegradationConfig, DegradationController, DiffMode};
use mnemo_scm::svn::SvnAdapter;
use mnemo_scm::sync::gitlab::{GitLabSync, GitLabSyncConfig};
use mnemo_scm::sync::svn::{SvnSync, SvnSyncConfig};
use mnemo_scm::sync::SyncMode;
use mnemo_scm::window::WindowParams;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const EXIT_ISSUES: u8 = 1;
const EXIT_SVN: u8 = 10;
const EXIT_GITLAB: u8 = 11;
const EXIT_MATERIALIZE: u8 = 12;

#[derive(Parser)]
#[command(name = "mnemo", version, about = "engineering-memory platform")]
struct Cli {
    /// Emit JSON-formatted logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the memory gateway HTTP server plus the outbox worker
    Serve,
    /// Sync SVN revisions for the configured repository
    SyncSvn {
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Stop cursor advancement on unrecoverable errors
        #[arg(long)]
        strict: bool,
    },
    /// Sync GitLab commits for the configured project
    SyncGitlab {
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        strict: bool,
        /// Keep syncing every N seconds, adapting window and batch size
        #[arg(long, value_name = "SECONDS")]
        watch: Option<u64>,
    },
    /// Materialize unresolved patch blobs
    Materialize {
        /// Materialize one specific blob
        #[arg(long)]
        blob_id: Option<i64>,
        /// Restrict to one source type (svn|git)
        #[arg(long)]
        source_type: Option<String>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Also retry previously failed blobs
        #[arg(long)]
        retry_failed: bool,
    },
    /// Drain the memory outbox
    OutboxWorker {
        /// Process one batch and exit
        #[arg(long)]
        once: bool,
    },
    /// Scan for integrity issues across SCM and gateway relations
    IntegrityCheck {
        /// Verify artifact files exist
        #[arg(long)]
        check_artifacts: bool,
        /// Re-hash artifact content (bounded by --limit)
        #[arg(long)]
        verify_sha256: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Apply deterministic source-id repairs
        #[arg(long)]
        fix: bool,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the reliability report
    Report,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    mnemo_common::tracing::setup_tracing(cli.log_json);

    let config = match AppConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(EXIT_ISSUES);
        }
    };

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::from(EXIT_ISSUES)
        }
    }
}

async fn run(command: Command, config: Arc<AppConfig>) -> Result<ExitCode> {
    let mm = ModelManager::new(config.clone())
        .await
        .context("database initialization failed")?;

    match command {
        Command::Serve => serve(mm, &config).await,
        Command::SyncSvn { batch_size, strict } => sync_svn(mm, &config, batch_size, strict).await,
        Command::SyncGitlab {
            batch_size,
            strict,
            watch,
        } => sync_gitlab(mm, &config, batch_size, strict, watch).await,
        Command::Materialize {
            blob_id,
            source_type,
            batch_size,
            retry_failed,
        } => materialize(mm, &config, blob_id, source_type, batch_size, retry_failed).await,
        Command::OutboxWorker { once } => outbox_worker(mm, &config, once).await,
        Command::IntegrityCheck {
            check_artifacts,
            verify_sha256,
            limit,
            fix,
            json,
        } => {
            let options = IntegrityOptions {
                check_artifacts,
                verify_sha256,
                limit,
                fix,
            };
            integrity_check(mm, options, json).await
        }
        Command::Report => report(mm).await,
    }
}

fn external_client(config: &AppConfig) -> Result<ExternalMemoryClient> {
    ExternalMemoryClient::new(
        config.gateway.openmemory_base_url.clone(),
        config.gateway.request_timeout_seconds,
    )
    .map_err(|e| anyhow::anyhow!("external memory client: {e}"))
}

async fn serve(mm: ModelManager, config: &AppConfig) -> Result<ExitCode> {
    let external = external_client(config)?;
    let gateway = Arc::new(MemoryGateway::new(
        mm.clone(),
        external.clone(),
        config.gateway.clone(),
    ));

    // Outbox worker runs alongside the server, stopped on shutdown.
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let worker = OutboxWorker::new(
        mm,
        external,
        config.outbox.clone(),
        generate_worker_id(),
    );
    let worker_handle = tokio::spawn(async move { worker.run_loop(stop_rx).await });

    let state = mnemo_server::AppState::new(gateway, config);
    let result = mnemo_server::run(state, config).await;

    let _ = stop_tx.send(true);
    let _ = worker_handle.await;

    result.context("server failed")?;
    Ok(ExitCode::SUCCESS)
}

async fn sync_svn(
    mm: ModelManager,
    config: &AppConfig,
    batch_size: Option<usize>,
    strict: bool,
) -> Result<ExitCode> {
    let Some(url) = config.svn.url.clone() else {
        error!("svn.url is not configured");
        return Ok(ExitCode::from(EXIT_SVN));
    };

    let repo = RepoBmc::ensure(
        &mm,
        RepoForEnsure {
            repo_type: "svn".to_string(),
            url,
            project_key: config.gateway.project_key.clone(),
            default_branch: None,
        },
    )
    .await?;

    let adapter = SvnAdapter::new(config.svn.clone());
    let mode = if strict {
        SyncMode::Strict
    } else {
        SyncMode::parse(&config.sync.mode)
    };
    let sync = SvnSync::new(
        &mm,
        &adapter,
        SvnSyncConfig {
            batch_size: batch_size.unwrap_or(config.svn.batch_size),
            overlap: config.svn.overlap,
            mode,
            diff_mode: DiffMode::parse(&config.sync.diff_mode),
            lease_seconds: config.svn.lease_seconds,
            renew_interval_revs: config.svn.renew_interval_revs,
            bulk_changed_paths_threshold: config.sync.bulk_svn_changed_paths_threshold,
            bulk_diff_size_threshold: config.sync.bulk_diff_size_threshold,
        },
    );

    let worker_id = generate_worker_id();
    match sync.run(&repo, &worker_id).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "svn sync failed");
            Ok(ExitCode::from(EXIT_SVN))
        }
    }
}

async fn sync_gitlab(
    mm: ModelManager,
    config: &AppConfig,
    batch_size: Option<usize>,
    strict: bool,
    watch: Option<u64>,
) -> Result<ExitCode> {
    let (Some(base_url), Some(project_id)) =
        (config.gitlab.url.clone(), config.gitlab.project_id.clone())
    else {
        error!("gitlab.url and gitlab.project_id must be configured");
        return Ok(ExitCode::from(EXIT_GITLAB));
    };

    let repo_url = format!("{}/{}", base_url.trim_end_matches('/'), project_id);
    let repo = RepoBmc::ensure(
        &mm,
        RepoForEnsure {
            repo_type: "git".to_string(),
            url: repo_url,
            project_key: config.gateway.project_key.clone(),
            default_branch: config.gitlab.ref_name.clone(),
        },
    )
    .await?;

    let token_provider = TokenProvider::from_config(&config.gitlab)
        .map_err(|e| anyhow::anyhow!("gitlab token provider: {e}"))?;
    let client = GitLabClient::new(base_url, token_provider, config.gitlab.clone())
        .map_err(|e| anyhow::anyhow!("gitlab client: {e}"))?;

    let mode = if strict {
        SyncMode::Strict
    } else {
        SyncMode::parse(&config.sync.mode)
    };
    let sync_config = GitLabSyncConfig {
        project_id,
        ref_name: config.gitlab.ref_name.clone(),
        mode,
        lease_seconds: config.gitlab.lease_seconds,
        max_diff_size_bytes: config.materialize.max_size_bytes,
        bulk_total_changes_threshold: config.sync.bulk_git_total_changes_threshold,
        bulk_files_changed_threshold: config.sync.bulk_git_files_changed_threshold,
        bulk_diff_size_threshold: config.sync.bulk_diff_size_threshold,
        window: WindowParams {
            overlap_seconds: config.sync.overlap_seconds,
            time_window_days: config.sync.time_window_days,
            forward_window_seconds: config.sync.forward_window_seconds,
        },
    };
    let sync = GitLabSync::new(&mm, &client, sync_config);

    let mut degradation_config = DegradationConfig::from_sync_config(&config.sync);
    if let Some(batch_size) = batch_size {
        degradation_config.batch_size = batch_size;
    }
    let mut controller =
        DegradationController::new(degradation_config, DiffMode::parse(&config.sync.diff_mode));
    let worker_id = generate_worker_id();

    loop {
        match sync.run(&repo, &worker_id, &mut controller).await {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(e) => {
                error!(error = %e, "gitlab sync failed");
                if watch.is_none() {
                    return Ok(ExitCode::from(EXIT_GITLAB));
                }
            }
        }

        // Loop mode: keep going until interrupted, adapting between runs.
        let Some(interval) = watch else {
            return Ok(ExitCode::SUCCESS);
        };
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping watch loop");
                return Ok(ExitCode::SUCCESS);
            }
        }
    }
}

async fn materialize(
    mm: ModelManager,
    config: &AppConfig,
    blob_id: Option<i64>,
    source_type: Option<String>,
    batch_size: Option<usize>,
    retry_failed: bool,
) -> Result<ExitCode> {
    let gitlab = match (&config.gitlab.url, TokenProvider::from_config(&config.gitlab)) {
        (Some(url), Ok(provider)) => {
            GitLabClient::new(url.clone(), provider, config.gitlab.clone()).ok()
        }
        _ => None,
    };
    let fetcher = LivePatchFetcher {
        svn: SvnAdapter::new(config.svn.clone()),
        gitlab,
        gitlab_project_id: config.gitlab.project_id.clone(),
    };
    let materializer = Materializer::new(
        &mm,
        &fetcher,
        config.materialize.max_size_bytes,
        ShaMismatchPolicy::parse(&config.materialize.sha_mismatch_policy),
    );

    if let Some(blob_id) = blob_id {
        match materializer.materialize_blob(blob_id).await {
            Ok(outcome) => {
                println!("{outcome:?}");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                error!(error = %e, blob_id, "materialize failed");
                Ok(ExitCode::from(EXIT_MATERIALIZE))
            }
        }
    } else {
        match materializer
            .materialize_batch(
                retry_failed || config.materialize.retry_failed,
                source_type.as_deref(),
                batch_size.unwrap_or(config.materialize.batch_size),
            )
            .await
        {
            Ok(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                let code = if summary.failed > 0 { EXIT_ISSUES } else { 0 };
                Ok(ExitCode::from(code))
            }
            Err(e) => {
                error!(error = %e, "materialize batch failed");
                Ok(ExitCode::from(EXIT_MATERIALIZE))
            }
        }
    }
}

async fn outbox_worker(mm: ModelManager, config: &AppConfig, once: bool) -> Result<ExitCode> {
    let external = external_client(config)?;
    let worker = OutboxWorker::new(
        mm,
        external,
        config.outbox.clone(),
        generate_worker_id(),
    );

    if once {
        let stats = worker.process_batch().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(ExitCode::SUCCESS);
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = stop_tx.send(true);
    });
    worker.run_loop(stop_rx).await?;
    Ok(ExitCode::SUCCESS)
}

async fn integrity_check(
    mm: ModelManager,
    options: IntegrityOptions,
    json: bool,
) -> Result<ExitCode> {
    let report = IntegrityChecker::new(&mm, options).run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for issue in &report.issues {
            let fixed = if issue.fixed { " [fixed]" } else { "" };
            println!(
                "{} {} {}: {}{}",
                issue.class, issue.entity, issue.entity_id, issue.detail, fixed
            );
        }
        println!(
            "checked {} rows, {} issues, {} fixed",
            report.rows_checked,
            report.issues.len(),
            report.fixes_applied
        );
    }

    if report.clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_ISSUES))
    }
}

async fn report(mm: ModelManager) -> Result<ExitCode> {
    let report = mnemo_gateway::report::build_report(&mm).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}
