//! CLI tests for the `vibe-runner` binary.
//!
//! Spawns the binary in a scratch directory and checks exit codes and the
//! files a run leaves behind.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use httpmock::prelude::*;
use serde_json::json;
use vibe_runner::exit_codes;

fn runner(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vibe-runner"));
    cmd.current_dir(dir)
        .stdin(Stdio::null())
        .env_remove("API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("MODEL")
        .env_remove("BASE_URL")
        .env_remove("MAX_STEPS")
        .env_remove("CMD_TIMEOUT")
        .env("PROVIDER", "openai");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("spawn vibe-runner")
}

#[test]
fn missing_api_key_is_fatal_before_any_file_is_written() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = run(runner(temp.path()).arg("add a README"));

    assert_eq!(out.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&out.stderr).contains("API_KEY/OPENAI_API_KEY not set"));
    assert!(!temp.path().join("logs").exists());
    assert!(!temp.path().join("TASK.md").exists());
}

#[test]
fn invalid_step_budget_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = run(runner(temp.path())
        .env("API_KEY", "sk-test")
        .args(["--max-steps", "0", "goal"]));

    assert_eq!(out.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&out.stderr).contains("max_steps"));
}

#[test]
fn closed_stdin_at_goal_prompt_quits() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = run(runner(temp.path()).env("API_KEY", "sk-test"));
    assert_eq!(out.status.code(), Some(exit_codes::QUIT));
}

#[test]
fn planning_run_stops_at_step_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer sk-test");
        then.status(200).json_body(json!({
            "choices": [{"message": {"role": "assistant", "content": json!({
                "phase": "plan",
                "decision": "direct_execute",
                "cmd": "",
                "task_md_patch": "# Task Log\n- [ ] planned\n"
            }).to_string()}}]
        }));
    });
    fs::write(
        temp.path().join(".vibe-runner.toml"),
        format!("base_url = \"{}/v1\"\n", server.base_url()),
    )
    .expect("write config");

    let out = run(runner(temp.path())
        .env("API_KEY", "sk-test")
        .args(["--max-steps", "1", "plan", "only"]));

    mock.assert_calls(1);
    assert_eq!(out.status.code(), Some(exit_codes::MAX_STEPS));
    assert_eq!(
        fs::read_to_string(temp.path().join("TASK.md")).expect("TASK.md"),
        "# Task Log\n- [ ] planned\n"
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("== step 1 plan =="));
    assert!(stdout.trim_end().ends_with("MAX_STEPS exceeded"));

    let logs: Vec<_> = fs::read_dir(temp.path().join("logs"))
        .expect("logs dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(logs.len(), 1);
    let audit = fs::read_to_string(&logs[0]).expect("audit");
    assert!(audit.contains("goal=plan only\n"));
    assert!(audit.ends_with("status=MAX_STEPS exceeded\n"));
}
