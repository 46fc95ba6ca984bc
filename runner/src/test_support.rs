//! Test doubles and fixtures shared by unit and integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Local;
use serde_json::{Value, json};

use crate::core::history::ConversationHistory;
use crate::io::audit_log::{AuditLog, RunHeader};
use crate::io::console::{Console, Line};
use crate::io::interrupt::Interrupt;
use crate::io::llm::LlmClient;

/// Minimal valid decision with `decision = direct_execute`.
pub fn decision(phase: &str, cmd: &str, task_md_patch: &str) -> Value {
    json!({
        "phase": phase,
        "decision": "direct_execute",
        "cmd": cmd,
        "task_md_patch": task_md_patch,
    })
}

/// Model double that replays queued replies in order.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Value>>,
    calls: Mutex<Vec<usize>>,
    interrupt_first: Option<Interrupt>,
    fired: AtomicBool,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Make the first call raise `interrupt` and hang instead of replying.
    pub fn interrupt_first(mut self, interrupt: Interrupt) -> Self {
        self.interrupt_first = Some(interrupt);
        self
    }

    /// History length seen by each call, in order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn next_decision(&self, history: &ConversationHistory) -> Result<Value> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(history.len());
        if let Some(interrupt) = &self.interrupt_first
            && !self.fired.swap(true, Ordering::SeqCst)
        {
            interrupt.trigger();
            thread::sleep(Duration::from_millis(500));
            return Err(anyhow!("abandoned call should not be observed"));
        }
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no more replies"))
    }
}

/// Console double: answers prompts from a queue and records everything shown.
///
/// An exhausted queue reads as closed input.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    input: VecDeque<Line>,
    output: Vec<String>,
    prompts: Vec<String>,
}

impl ScriptedConsole {
    pub fn new(input: Vec<Line>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// Convenience for text-only scripts.
    pub fn with_lines(lines: &[&str]) -> Self {
        Self::new(lines.iter().map(|l| Line::Text(l.to_string())).collect())
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn remaining_input(&self) -> usize {
        self.input.len()
    }
}

impl Console for ScriptedConsole {
    fn say(&mut self, text: &str) {
        self.output.push(text.to_string());
    }

    fn read_line(&mut self, prompt: &str) -> Result<Line> {
        self.prompts.push(prompt.to_string());
        Ok(self.input.pop_front().unwrap_or(Line::Eof))
    }
}

/// Audit log under `root/logs` with a fixed header.
pub fn test_audit_log(root: &Path) -> AuditLog {
    AuditLog::create(
        &root.join("logs"),
        &RunHeader {
            started_at: Local::now(),
            provider: "openai",
            model: "test-model",
            goal: "test goal",
        },
    )
    .expect("create audit log")
}

/// Initialize a git repository with one commit containing `README.md`.
pub fn init_git_repo(root: &Path) {
    git(root, &["init", "-q"]);
    git(root, &["config", "user.email", "runner@example.com"]);
    git(root, &["config", "user.name", "Runner Test"]);
    std::fs::write(root.join("README.md"), "hi\n").expect("write README");
    git(root, &["add", "README.md"]);
    git(root, &["commit", "-q", "-m", "init"]);
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .expect("run git");
    assert!(status.success(), "git {} failed", args.join(" "));
}
