//! Shell command execution for model-proposed and human `run` commands.
//!
//! Runtime failures never surface as errors here: a block, a timeout, an
//! interrupt or a spawn failure all come back as an [`ExecutionResult`] with a
//! distinguished exit code so the model can react on its next turn.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::denylist::blocked_fragment;
use crate::core::truncate::tail_lossy;
use crate::io::config::RunnerConfig;
use crate::io::git::Git;
use crate::io::interrupt::Interrupt;
use crate::io::process::{ProcessEnd, run_command_with_timeout};

/// Exit code for a command rejected by the denylist.
pub const EXIT_BLOCKED: i32 = 126;
/// Exit code for a command killed at its deadline.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code for a command that could not be started.
pub const EXIT_SPAWN_FAILED: i32 = 127;
/// Exit code for a command stopped by a human interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

pub const NO_COMMAND: &str = "[no command]";
pub const BLOCKED: &str = "[blocked by denylist]";
pub const TIMED_OUT: &str = "[command timeout]";
pub const INTERRUPTED: &str = "[command interrupted]";

/// Outcome of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Combined stdout + stderr, trailing window only.
    pub output: String,
}

impl ExecutionResult {
    fn marker(exit_code: i32, marker: &str) -> Self {
        Self {
            exit_code,
            output: marker.to_string(),
        }
    }

    pub fn was_interrupted(&self) -> bool {
        self.exit_code == EXIT_INTERRUPTED && self.output == INTERRUPTED
    }
}

/// Execution result plus the repository snapshot taken right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub result: ExecutionResult,
    pub snapshot: String,
}

impl CommandReport {
    /// Text fed back to the model and written to the audit log.
    pub fn render(&self) -> String {
        format!(
            "[exit_code]\n{}\n{}{}",
            self.result.exit_code, self.result.output, self.snapshot
        )
    }
}

/// Runs commands through `sh -c` in the workspace.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    task_pathspec: String,
    interrupt: Interrupt,
}

impl ShellExecutor {
    pub fn new(config: &RunnerConfig, workdir: &Path, interrupt: Interrupt) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            timeout: config.cmd_timeout(),
            output_limit_bytes: config.output_limit_bytes,
            task_pathspec: config.task_pathspec(),
            interrupt,
        }
    }

    /// Run `command` and attach a repository snapshot.
    pub fn run(&self, command: &str) -> CommandReport {
        let result = self.execute(command);
        CommandReport {
            result,
            snapshot: self.snapshot(),
        }
    }

    /// Run `command` without a snapshot.
    #[instrument(skip_all, fields(cmd = %command))]
    pub fn execute(&self, command: &str) -> ExecutionResult {
        let command = command.trim();
        if command.is_empty() {
            return ExecutionResult::marker(0, NO_COMMAND);
        }
        if let Some(fragment) = blocked_fragment(command) {
            warn!(fragment, "command blocked by denylist");
            return ExecutionResult::marker(EXIT_BLOCKED, BLOCKED);
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        let output = match run_command_with_timeout(
            cmd,
            self.timeout,
            self.output_limit_bytes,
            &self.interrupt,
        ) {
            Ok(output) => output,
            Err(e) => {
                warn!(err = %e, "command could not be run");
                return ExecutionResult {
                    exit_code: EXIT_SPAWN_FAILED,
                    output: format!("[spawn failed: {e:#}]"),
                };
            }
        };

        match output.end {
            ProcessEnd::Exited(code) => {
                info!(exit_code = code, "command exited");
                ExecutionResult {
                    exit_code: code,
                    output: tail_lossy(&output.combined(), self.output_limit_bytes),
                }
            }
            ProcessEnd::TimedOut => ExecutionResult::marker(EXIT_TIMEOUT, TIMED_OUT),
            ProcessEnd::Interrupted => {
                // Consumed here; the caller sees it through the result.
                self.interrupt.take();
                ExecutionResult::marker(EXIT_INTERRUPTED, INTERRUPTED)
            }
        }
    }

    pub fn snapshot(&self) -> String {
        Git::new(&self.workdir).snapshot(&self.task_pathspec, self.output_limit_bytes)
    }
}
