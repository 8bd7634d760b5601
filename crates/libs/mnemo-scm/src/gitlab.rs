//! GitLab REST adapter.
//!
//! One client per `(base_url, tenant)`: a token provider that never logs
//! the raw token, a keyed token bucket awaiting capacity before dispatch,
//! a per-tenant concurrency semaphore, and bounded retries with jittered
//! exponential backoff. 429 responses honor `Retry-After`. Every outcome
//! is classified into the shared [`ErrorCategory`] taxonomy; nothing
//! escapes this module as a raw reqwest error.

use crate::AdapterError;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use mnemo_common::config::GitLabConfig;
use mnemo_core::ErrorCategory;
use rand::Rng;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Pluggable token source. Supports rotation (file/exec re-read per
/// request); the raw token never reaches a log line.
#[derive(Debug, Clone)]
pub enum TokenProvider {
    Env(String),
    File(String),
    Exec(String),
    /// Fixed token, used by tests.
    Static(String),
}

impl TokenProvider {
    pub fn from_config(config: &GitLabConfig) -> Result<Self, AdapterError> {
        match config.token_source.as_str() {
            "env" => Ok(TokenProvider::Env(config.token_env.clone())),
            "file" => config
                .token_file
                .clone()
                .map(TokenProvider::File)
                .ok_or_else(|| {
                    AdapterError::new(
                        ErrorCategory::ValidationError,
                        "token_source=file requires token_file",
                    )
                }),
            "exec" => config
                .token_exec
                .clone()
                .map(TokenProvider::Exec)
                .ok_or_else(|| {
                    AdapterError::new(
                        ErrorCategory::ValidationError,
                        "token_source=exec requires token_exec",
                    )
                }),
            other => Err(AdapterError::new(
                ErrorCategory::ValidationError,
                format!("unknown token_source: {other}"),
            )),
        }
    }

    pub fn token(&self) -> Result<String, AdapterError> {
        match self {
            TokenProvider::Env(var) => std::env::var(var).map_err(|_| {
                AdapterError::new(
                    ErrorCategory::AuthError,
                    format!("token env var {var} not set"),
                )
            }),
            TokenProvider::File(path) => std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|e| {
                    AdapterError::new(
                        ErrorCategory::AuthError,
                        format!("token file unreadable: {e}"),
                    )
                }),
            TokenProvider::Exec(cmd) => {
                let output = std::process::Command::new("sh")
                    .arg("-c")
                    .arg(cmd)
                    .output()
                    .map_err(|e| {
                        AdapterError::new(
                            ErrorCategory::AuthError,
                            format!("token exec failed: {e}"),
                        )
                    })?;
                if !output.status.success() {
                    return Err(AdapterError::new(
                        ErrorCategory::AuthError,
                        "token exec returned non-zero",
                    ));
                }
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            TokenProvider::Static(token) => Ok(token.clone()),
        }
    }
}

/// `glpat-abcd...` → `glpat-a***`
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(7).collect();
    format!("{visible}***")
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCommit {
    pub id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    pub committed_date: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub stats: Option<GitLabCommitStats>,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitLabCommitStats {
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabDiffEntry {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
}

/// Non-exceptional outcome for size-guarded diff fetches.
#[derive(Debug, Clone)]
pub enum DiffOutcome {
    Ok(String),
    TooLarge { size: usize, max: usize },
}

pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token_provider: TokenProvider,
    config: GitLabConfig,
    limiter: Arc<KeyedLimiter>,
    semaphore: Arc<Semaphore>,
    limiter_key: String,
}

impl GitLabClient {
    pub fn new(
        base_url: impl Into<String>,
        token_provider: TokenProvider,
        config: GitLabConfig,
    ) -> Result<Self, AdapterError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| {
                AdapterError::new(ErrorCategory::Unknown, format!("http client build: {e}"))
            })?;

        let rps = NonZeroU32::new(config.rate_limit_rps.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.rate_limit_burst.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps).allow_burst(burst);
        let limiter = Arc::new(RateLimiter::keyed(quota));

        let tenant = config.tenant_id.clone().unwrap_or_else(|| "-".to_string());
        let limiter_key = format!("{base_url}|{tenant}");
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        Ok(Self {
            http,
            base_url,
            token_provider,
            config,
            limiter,
            semaphore,
            limiter_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One page of commits for a project.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_commits(
        &self,
        project_id: &str,
        since: Option<&str>,
        until: Option<&str>,
        ref_name: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<GitLabCommit>, AdapterError> {
        let mut url = format!(
            "{}/api/v4/projects/{}/repository/commits?page={}&per_page={}&with_stats=true",
            self.base_url,
            encode_project_id(project_id),
            page,
            per_page
        );
        if let Some(since) = since {
            url.push_str(&format!("&since={since}"));
        }
        if let Some(until) = until {
            url.push_str(&format!("&until={until}"));
        }
        if let Some(ref_name) = ref_name {
            url.push_str(&format!("&ref_name={ref_name}"));
        }
        self.get_json(&url).await
    }

    /// All commits in a window, paginating until a short page. Cross-page
    /// dedup by sha (GitLab repeats boundary commits between pages).
    pub async fn get_commits_window(
        &self,
        project_id: &str,
        since: Option<&str>,
        until: Option<&str>,
        ref_name: Option<&str>,
        max_commits: usize,
    ) -> Result<Vec<GitLabCommit>, AdapterError> {
        let per_page = self.config.per_page.clamp(1, 100);
        let mut page = 1;
        let mut seen = std::collections::HashSet::new();
        let mut commits = Vec::new();

        loop {
            let batch = self
                .get_commits(project_id, since, until, ref_name, page, per_page)
                .await?;
            let batch_len = batch.len();
            for commit in batch {
                if seen.insert(commit.id.clone()) {
                    commits.push(commit);
                }
            }
            if batch_len < per_page || commits.len() >= max_commits {
                break;
            }
            page += 1;
        }
        Ok(commits)
    }

    /// Raw diff entries for one commit.
    pub async fn get_commit_diff(
        &self,
        project_id: &str,
        sha: &str,
    ) -> Result<Vec<GitLabDiffEntry>, AdapterError> {
        let url = format!(
            "{}/api/v4/projects/{}/repository/commits/{}/diff",
            self.base_url,
            encode_project_id(project_id),
            sha
        );
        self.get_json(&url).await
    }

    /// Unified-diff text for one commit.
    pub async fn get_commit_diff_text(
        &self,
        project_id: &str,
        sha: &str,
    ) -> Result<String, AdapterError> {
        let entries = self.get_commit_diff(project_id, sha).await?;
        Ok(render_diff_entries(&entries))
    }

    /// Size-guarded variant: an oversized diff is a value, not an error.
    pub async fn get_commit_diff_safe(
        &self,
        project_id: &str,
        sha: &str,
        max_size: usize,
    ) -> Result<DiffOutcome, AdapterError> {
        let text = self.get_commit_diff_text(project_id, sha).await?;
        if text.len() > max_size {
            return Ok(DiffOutcome::TooLarge {
                size: text.len(),
                max: max_size,
            });
        }
        Ok(DiffOutcome::Ok(text))
    }

    /// Single commit with stats.
    pub async fn get_commit(
        &self,
        project_id: &str,
        sha: &str,
    ) -> Result<GitLabCommit, AdapterError> {
        let url = format!(
            "{}/api/v4/projects/{}/repository/commits/{}?stats=true",
            self.base_url,
            encode_project_id(project_id),
            sha
        );
        self.get_json(&url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, AdapterError> {
        let _permit = self.semaphore.acquire().await.map_err(|_| {
            AdapterError::new(ErrorCategory::Unknown, "semaphore closed")
        })?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.until_key_ready(&self.limiter_key).await;

            let token = self.token_provider.token()?;
            debug!(endpoint = %redact_url(url), attempt, "gitlab request");

            let response = self
                .http
                .get(url)
                .header("PRIVATE-TOKEN", token)
                .send()
                .await;

            let err = match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<T>().await.map_err(|e| {
                            AdapterError::new(
                                ErrorCategory::ParseError,
                                format!("response decode: {e}"),
                            )
                            .with_endpoint(redact_url(url))
                        });
                    }
                    let retry_after = parse_retry_after(&resp);
                    let category = classify_status(status.as_u16());
                    let err = AdapterError::new(
                        category,
                        format!("gitlab returned {}", status.as_u16()),
                    )
                    .with_endpoint(redact_url(url))
                    .with_status(status.as_u16());

                    if category.retryable() && attempt < self.config.max_attempts {
                        let delay = retry_after.unwrap_or_else(|| self.backoff_delay(attempt));
                        warn!(
                            endpoint = %redact_url(url),
                            status = status.as_u16(),
                            attempt,
                            delay_s = delay.as_secs_f64(),
                            "gitlab request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    err
                }
                Err(e) => {
                    let category = classify_transport_error(&e);
                    let err = AdapterError::new(category, e.to_string())
                        .with_endpoint(redact_url(url));
                    if category.retryable() && attempt < self.config.max_attempts {
                        let delay = self.backoff_delay(attempt);
                        warn!(
                            endpoint = %redact_url(url),
                            attempt,
                            delay_s = delay.as_secs_f64(),
                            "gitlab transport error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    err
                }
            };
            return Err(err);
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_seconds * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.0..0.3) * base;
        let capped = (base + jitter).min(self.config.backoff_max_seconds);
        Duration::from_millis((capped * 1000.0) as u64)
    }
}

/// Map an HTTP status to the shared taxonomy.
pub fn classify_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimited,
        401 | 403 => ErrorCategory::AuthError,
        413 => ErrorCategory::ContentTooLarge,
        500..=599 => ErrorCategory::ServerError,
        400..=499 => ErrorCategory::ClientError,
        _ => ErrorCategory::HttpError,
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ErrorCategory {
    if e.is_timeout() {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::NetworkError
    }
}

fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("Retry-After")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// `group/project` → `group%2Fproject`; numeric ids pass through.
pub fn encode_project_id(project_id: &str) -> String {
    project_id.replace('/', "%2F")
}

/// Strip query strings from endpoints before they reach logs or DB columns
/// (`since`/tokens may carry sensitive material).
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

/// Render GitLab diff entries as unified diff text. Deterministic: entries
/// render in API order with stable headers.
pub fn render_diff_entries(entries: &[GitLabDiffEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "diff --git a/{} b/{}\n",
            entry.old_path, entry.new_path
        ));
        if entry.new_file {
            out.push_str("new file\n");
        }
        if entry.deleted_file {
            out.push_str("deleted file\n");
        }
        if entry.renamed_file {
            out.push_str(&format!(
                "rename from {}\nrename to {}\n",
                entry.old_path, entry.new_path
            ));
        }
        out.push_str(&format!(
            "--- a/{}\n+++ b/{}\n",
            entry.old_path, entry.new_path
        ));
        out.push_str(&entry.diff);
        if !entry.diff.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(429), ErrorCategory::RateLimited);
        assert_eq!(classify_status(401), ErrorCategory::AuthError);
        assert_eq!(classify_status(403), ErrorCategory::AuthError);
        assert_eq!(classify_status(404), ErrorCategory::ClientError);
        assert_eq!(classify_status(500), ErrorCategory::ServerError);
        assert_eq!(classify_status(503), ErrorCategory::ServerError);
        assert_eq!(classify_status(413), ErrorCategory::ContentTooLarge);
    }

    #[test]
    fn project_id_encoding() {
        assert_eq!(encode_project_id("123"), "123");
        assert_eq!(encode_project_id("group/proj"), "group%2Fproj");
        assert_eq!(encode_project_id("a/b/c"), "a%2Fb%2Fc");
    }

    #[test]
    fn token_masking_never_shows_tail() {
        let masked = mask_token("glpat-supersecretvalue");
        assert!(!masked.contains("supersecret"));
        assert!(masked.ends_with("***"));
    }

    #[test]
    fn url_redaction_strips_query() {
        assert_eq!(
            redact_url("https://gl/api/v4/projects/1/repository/commits?since=2024&private=x"),
            "https://gl/api/v4/projects/1/repository/commits"
        );
        assert_eq!(redact_url("https://gl/api"), "https://gl/api");
    }

    #[test]
    fn diff_rendering_is_deterministic() {
        let entries = vec![GitLabDiffEntry {
            old_path: "src/a.rs".to_string(),
            new_path: "src/a.rs".to_string(),
            diff: "@@ -1 +1 @@\n-old\n+new\n".to_string(),
            new_file: false,
            renamed_file: false,
            deleted_file: false,
        }];
        let a = render_diff_entries(&entries);
        let b = render_diff_entries(&entries);
        assert_eq!(a, b);
        assert!(a.starts_with("diff --git a/src/a.rs b/src/a.rs\n"));
        assert!(a.contains("--- a/src/a.rs\n+++ b/src/a.rs\n"));
        assert!(a.ends_with('\n'));
    }
}
