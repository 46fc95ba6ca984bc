//! The task document (`TASK.md`): the model's working notes, replaced
//! wholesale after every accepted step.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Content written at run start, before the model has produced a patch.
pub fn initial_task_document(goal: &str) -> String {
    format!("# Task Log\n\n## Goal\n- {goal}\n\n## Checklist\n- [ ] Plan\n")
}

#[derive(Debug, Clone)]
pub struct TaskDocument {
    path: PathBuf,
}

impl TaskDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Replace the whole document.
    ///
    /// Written to a sibling temp file first and renamed over the target, so a
    /// crash mid-write leaves the previous content intact.
    pub fn write(&self, contents: &str) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "TASK.md".to_string());
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} to {}", tmp.display(), self.path.display()))
    }

    /// Current content; empty if the file is gone.
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }
}

/// Read the optional project instruction file, falling back to a minimal one.
pub fn read_instructions(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok("# Agent\n- Keep changes minimal\n".to_string())
        }
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}
