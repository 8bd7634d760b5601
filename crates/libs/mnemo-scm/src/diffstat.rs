//! Summary renderers for diff content.
//!
//! `diffstat` is the per-file +/- table computed from a unified diff;
//! `ministat` is the aggregate rollup used when the full diff is
//! unavailable (built from GitLab stats, SVN changed paths, or the diff
//! itself). Both renderers are deterministic: identical input bytes
//! produce identical output bytes, which keeps artifact sha256 values
//! stable across re-materialization.

use crate::svn::SvnChangedPath;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStat {
    path: String,
    additions: usize,
    deletions: usize,
}

/// Render a per-file diffstat table from unified diff text.
pub fn generate_diffstat(diff: &str) -> String {
    let files = collect_file_stats(diff);
    let mut out = String::new();
    let mut total_add = 0;
    let mut total_del = 0;

    let width = files.iter().map(|f| f.path.len()).max().unwrap_or(0);
    for file in &files {
        total_add += file.additions;
        total_del += file.deletions;
        let _ = writeln!(
            out,
            " {:<width$} | {:>4} +{} -{}",
            file.path,
            file.additions + file.deletions,
            file.additions,
            file.deletions,
        );
    }
    let _ = writeln!(
        out,
        " {} files changed, {} insertions(+), {} deletions(-)",
        files.len(),
        total_add,
        total_del
    );
    out
}

/// Aggregate rollup from explicit counters (GitLab commit stats).
pub fn generate_ministat_from_stats(additions: i64, deletions: i64, total: i64) -> String {
    format!("additions={additions} deletions={deletions} total={total}\n")
}

/// Aggregate rollup from SVN changed paths.
pub fn generate_ministat_from_changed_paths(paths: &[SvnChangedPath]) -> String {
    let mut added = 0usize;
    let mut modified = 0usize;
    let mut deleted = 0usize;
    let mut other = 0usize;
    for p in paths {
        match p.action.as_str() {
            "A" => added += 1,
            "M" => modified += 1,
            "D" => deleted += 1,
            _ => other += 1,
        }
    }
    format!(
        "paths={} added={added} modified={modified} deleted={deleted} other={other}\n",
        paths.len()
    )
}

/// Aggregate rollup computed from the +/- lines of a unified diff.
pub fn generate_ministat_from_diff(diff: &str) -> String {
    let files = collect_file_stats(diff);
    let additions: usize = files.iter().map(|f| f.additions).sum();
    let deletions: usize = files.iter().map(|f| f.deletions).sum();
    format!(
        "files={} additions={additions} deletions={deletions} total={}\n",
        files.len(),
        additions + deletions
    )
}

fn collect_file_stats(diff: &str) -> Vec<FileStat> {
    let mut files: Vec<FileStat> = Vec::new();
    let mut current: Option<FileStat> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current.take() {
                files.push(file);
            }
            // `a/<path> b/<path>`: take the b-side.
            let path = rest
                .split_whitespace()
                .last()
                .map(|p| p.strip_prefix("b/").unwrap_or(p))
                .unwrap_or(rest)
                .to_string();
            current = Some(FileStat {
                path,
                additions: 0,
                deletions: 0,
            });
            continue;
        }
        if let Some(rest) = line.strip_prefix("Index: ") {
            if let Some(file) = current.take() {
                files.push(file);
            }
            current = Some(FileStat {
                path: rest.trim().to_string(),
                additions: 0,
                deletions: 0,
            });
            continue;
        }
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if let Some(file) = current.as_mut() {
            if line.starts_with('+') {
                file.additions += 1;
            } else if line.starts_with('-') {
                file.deletions += 1;
            }
        }
    }
    if let Some(file) = current.take() {
        files.push(file);
    }
    files
}

/// Count the files touched by a unified diff.
pub fn count_files_changed(diff: &str) -> usize {
    collect_file_stats(diff).len()
}
