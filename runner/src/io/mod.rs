//! Side-effecting adapters: processes, git, files, terminal, network.

pub mod audit_log;
pub mod config;
pub mod console;
pub mod git;
pub mod interrupt;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod shell;
pub mod task_doc;
