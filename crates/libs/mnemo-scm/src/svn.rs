//! SVN CLI adapter.
//!
//! Shells out to `svn log --xml` / `svn diff`, injecting credentials and
//! non-interactive flags from config. Outcomes are classified into the
//! shared taxonomy by exit code and stderr keywords; the adapter never
//! returns a raw process error across its boundary. Any logged command
//! string has the password redacted.

use crate::AdapterError;
use mnemo_common::config::SvnConfig;
use mnemo_core::ErrorCategory;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// Uniform result of one SVN CLI invocation.
#[derive(Debug, Clone)]
pub struct SvnCommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error_type: Option<ErrorCategory>,
    pub error_message: Option<String>,
}

/// One entry of `svn log --xml -v`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvnLogEntry {
    pub revision: i64,
    pub author: String,
    pub date: Option<String>,
    pub message: String,
    pub changed_paths: Vec<SvnChangedPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SvnChangedPath {
    pub action: String,
    pub path: String,
}

/// stderr keywords that mean the credentials were refused.
const AUTH_ERROR_MARKERS: [&str; 4] = [
    "authorization failed",
    "svn: E170001",
    "svn: E215004",
    "svn: E175013",
];

pub struct SvnAdapter {
    config: SvnConfig,
}

impl SvnAdapter {
    pub fn new(config: SvnConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SvnConfig {
        &self.config
    }

    /// Run one svn command with auth/non-interactive flags injected.
    pub async fn run_svn_cmd(&self, args: &[String]) -> SvnCommandResult {
        let mut full_args: Vec<String> = args.to_vec();
        if let Some(username) = &self.config.username {
            full_args.push("--username".to_string());
            full_args.push(username.clone());
        }
        if let Some(password) = &self.config.password {
            full_args.push("--password".to_string());
            full_args.push(password.clone());
        }
        if self.config.non_interactive {
            full_args.push("--non-interactive".to_string());
        }
        if self.config.trust_server_cert {
            full_args.push("--trust-server-cert-failures=unknown-ca".to_string());
        }

        debug!(cmd = %mask_svn_command_for_log(&full_args), "running svn command");

        let child = tokio::process::Command::new("svn")
            .args(&full_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return SvnCommandResult {
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    error_type: Some(ErrorCategory::DependencyMissing),
                    error_message: Some(format!("failed to spawn svn: {e}")),
                };
            }
        };

        let timeout = Duration::from_secs(self.config.command_timeout_seconds);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return SvnCommandResult {
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    error_type: Some(ErrorCategory::CommandError),
                    error_message: Some(format!("svn wait failed: {e}")),
                };
            }
            Err(_) => {
                warn!(
                    timeout_s = self.config.command_timeout_seconds,
                    "svn command timed out"
                );
                return SvnCommandResult {
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    error_type: Some(ErrorCategory::Timeout),
                    error_message: Some(format!(
                        "svn command timed out after {}s",
                        self.config.command_timeout_seconds
                    )),
                };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            return SvnCommandResult {
                success: true,
                stdout,
                stderr,
                error_type: None,
                error_message: None,
            };
        }

        let stderr_lower = stderr.to_lowercase();
        let error_type = if AUTH_ERROR_MARKERS
            .iter()
            .any(|marker| stderr_lower.contains(&marker.to_lowercase()))
        {
            ErrorCategory::AuthError
        } else {
            ErrorCategory::CommandError
        };

        SvnCommandResult {
            success: false,
            stdout,
            stderr: stderr.clone(),
            error_type: Some(error_type),
            error_message: Some(first_stderr_line(&stderr)),
        }
    }

    /// `svn log --xml -v -r <start>:<end> --limit <n> <url>`
    pub async fn fetch_log(
        &self,
        url: &str,
        start_rev: i64,
        limit: usize,
    ) -> Result<Vec<SvnLogEntry>, AdapterError> {
        let args = vec![
            "log".to_string(),
            "--xml".to_string(),
            "-v".to_string(),
            "-r".to_string(),
            format!("{start_rev}:HEAD"),
            "--limit".to_string(),
            limit.to_string(),
            url.to_string(),
        ];
        let result = self.run_svn_cmd(&args).await;
        if !result.success {
            return Err(command_error(&result, format!("svn log -r {start_rev}:HEAD")));
        }
        parse_svn_log_xml(&result.stdout)
    }

    /// `svn diff -c <rev> <url>`
    pub async fn fetch_diff(&self, url: &str, revision: i64) -> Result<String, AdapterError> {
        let args = vec![
            "diff".to_string(),
            "-c".to_string(),
            revision.to_string(),
            url.to_string(),
        ];
        let result = self.run_svn_cmd(&args).await;
        if !result.success {
            return Err(command_error(&result, format!("svn diff -c {revision}")));
        }
        Ok(result.stdout)
    }
}

fn command_error(result: &SvnCommandResult, endpoint: String) -> AdapterError {
    AdapterError {
        category: result.error_type.unwrap_or(ErrorCategory::CommandError),
        message: result
            .error_message
            .clone()
            .unwrap_or_else(|| "svn command failed".to_string()),
        endpoint: Some(endpoint),
        status: None,
    }
}

fn first_stderr_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("svn command failed")
        .trim()
        .to_string()
}

/// Redact the password value in a command line destined for logs.
pub fn mask_svn_command_for_log(args: &[String]) -> String {
    let mut masked = Vec::with_capacity(args.len());
    let mut redact_next = false;
    for arg in args {
        if redact_next {
            masked.push("***".to_string());
            redact_next = false;
            continue;
        }
        if arg == "--password" {
            redact_next = true;
            masked.push(arg.clone());
        } else if let Some(rest) = arg.strip_prefix("--password=") {
            let _ = rest;
            masked.push("--password=***".to_string());
        } else {
            masked.push(arg.clone());
        }
    }
    format!("svn {}", masked.join(" "))
}

/// Parse `svn log --xml -v` output.
pub fn parse_svn_log_xml(xml: &str) -> Result<Vec<SvnLogEntry>, AdapterError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| {
        AdapterError::new(ErrorCategory::ParseError, format!("svn log xml: {e}"))
    })?;

    let mut entries = Vec::new();
    for node in doc
        .root_element()
        .children()
        .filter(|n| n.has_tag_name("logentry"))
    {
        let revision: i64 = node
            .attribute("revision")
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| {
                AdapterError::new(ErrorCategory::ParseError, "logentry missing revision")
            })?;

        let text_of = |tag: &str| -> Option<String> {
            node.children()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.text())
                .map(str::to_string)
        };

        let changed_paths = node
            .children()
            .find(|n| n.has_tag_name("paths"))
            .map(|paths| {
                paths
                    .children()
                    .filter(|n| n.has_tag_name("path"))
                    .map(|p| SvnChangedPath {
                        action: p.attribute("action").unwrap_or("").to_string(),
                        path: p.text().unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        entries.push(SvnLogEntry {
            revision,
            author: text_of("author").unwrap_or_default(),
            date: text_of("date")
                .and_then(|d| mnemo_core::time::normalize_iso_ts_z(&d)),
            message: text_of("msg").unwrap_or_default(),
            changed_paths,
        });
    }
    Ok(entries)
}
