//! Per-run audit log under `logs/`.
//!
//! One file per run, named after its start time, only ever appended to. This is
//! the product's forensic trail and is independent of `RUST_LOG` tracing.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// Run metadata written at the top of the log.
#[derive(Debug, Clone)]
pub struct RunHeader<'a> {
    pub started_at: DateTime<Local>,
    pub provider: &'a str,
    pub model: &'a str,
    pub goal: &'a str,
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: File,
}

impl AuditLog {
    /// Create `log_dir/run_<YYYYmmdd_HHMMSS>.log` and write the header.
    ///
    /// A second run within the same second gets a numeric suffix instead of
    /// appending to the first run's log.
    pub fn create(log_dir: &Path, header: &RunHeader<'_>) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("create log dir {}", log_dir.display()))?;
        let stamp = header.started_at.format("%Y%m%d_%H%M%S").to_string();

        let mut attempt = 0u32;
        let (path, file) = loop {
            let name = match attempt {
                0 => format!("run_{stamp}.log"),
                n => format!("run_{stamp}_{n}.log"),
            };
            let path = log_dir.join(name);
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("create {}", path.display()));
                }
            }
        };

        let mut log = Self { path, file };
        log.append(&format!(
            "# Vibe Runner Log\nstarted_at={}\nprovider={}\nmodel={}\ngoal={}\n\n",
            header.started_at.to_rfc3339(),
            header.provider,
            header.model,
            header.goal
        ))?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw text.
    pub fn append(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("append {}", self.path.display()))
    }

    /// Append `text` followed by a newline.
    pub fn line(&mut self, text: &str) -> Result<()> {
        self.append(&format!("{text}\n"))
    }

    /// Open a step block with the model's raw response.
    pub fn step(&mut self, step: u32, response: &str) -> Result<()> {
        self.append(&format!("\n## step {step}\nresponse={response}\n"))
    }
}
