//! Git adapter for repository status snapshots.
//!
//! Every command result is followed by a snapshot of the working tree so the
//! model sees what its command changed. Outside a repository the snapshot
//! degrades to a marker instead of failing.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::truncate::tail;

/// Snapshot text used when the workspace is not a git work tree.
pub const SNAPSHOT_DISABLED: &str = "\n[git]\n[disabled: not a git repository]";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if `workdir` is inside a git work tree.
    pub fn is_work_tree(&self) -> bool {
        match self.run(&["rev-parse", "--is-inside-work-tree"]) {
            Ok(output) => {
                output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            Err(_) => false,
        }
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Working tree diff, leaving out `excluded` (relative to `workdir`).
    pub fn diff_excluding(&self, excluded: &str) -> Result<String> {
        let pathspec = format!(":(exclude){excluded}");
        self.run_capture(&["diff", "--", ".", &pathspec])
    }

    /// Human-readable status + diff block appended to command results.
    ///
    /// Each part is bounded to the newest `limit` bytes.
    #[instrument(skip_all)]
    pub fn snapshot(&self, excluded: &str, limit: usize) -> String {
        if !self.is_work_tree() {
            debug!("not a git work tree, snapshot disabled");
            return SNAPSHOT_DISABLED.to_string();
        }
        let status = match self.status_porcelain() {
            Ok(entries) => entries
                .iter()
                .map(|e| format!("{} {}", e.code, e.path))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("[git status failed: {e}]"),
        };
        let diff = self
            .diff_excluding(excluded)
            .unwrap_or_else(|e| format!("[git diff failed: {e}]"));
        format!(
            "\n[git status]\n{}\n[git diff]\n{}",
            tail(&status, limit),
            tail(&diff, limit)
        )
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
