//! Supervised agent runner CLI.
//!
//! Runs one supervised session in the current directory: the model proposes
//! steps, the runner executes them, and the human confirms the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::debug;

use vibe_runner::exit_codes;
use vibe_runner::io::config::{DEFAULT_CONFIG_FILE, RunnerConfig, resolve_config};
use vibe_runner::io::console::{Console, Line, StdConsole};
use vibe_runner::io::interrupt::Interrupt;
use vibe_runner::io::llm::OpenAiCompatClient;
use vibe_runner::logging;
use vibe_runner::orchestrator::{Orchestrator, RunOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "vibe-runner",
    version,
    about = "Supervised agent runner: model-proposed shell steps behind human console gates"
)]
struct Cli {
    /// Task goal. Prompted for interactively when omitted.
    goal: Vec<String>,

    /// Config file (TOML). A missing file means defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the step budget.
    #[arg(long)]
    max_steps: Option<u32>,

    /// Project instruction file shown to the model.
    #[arg(long)]
    instructions: Option<PathBuf>,
}

impl Cli {
    fn goal(&self) -> Option<String> {
        let goal = self.goal.join(" ");
        let goal = goal.trim();
        (!goal.is_empty()).then(|| goal.to_string())
    }

    fn apply(&self, config: &mut RunnerConfig) {
        if let Some(max_steps) = self.max_steps {
            config.max_steps = max_steps;
        }
        if let Some(path) = &self.instructions {
            config.instructions_path = path.clone();
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workdir = std::env::current_dir().context("resolve working directory")?;

    let mut config = resolve_config(&workdir.join(&cli.config))?;
    cli.apply(&mut config);
    config.validate()?;
    debug!(?config, "resolved config");

    let llm = OpenAiCompatClient::from_config(&config)?;

    let interrupt = Interrupt::new();
    interrupt.listen_for_ctrl_c()?;
    let mut console = StdConsole::new(interrupt.clone())?;

    let goal = match cli.goal() {
        Some(goal) => goal,
        None => match console.read_line("Goal> ")? {
            Line::Text(goal) if !goal.trim().is_empty() => goal.trim().to_string(),
            Line::Text(_) => bail!("no goal given"),
            Line::Interrupted | Line::Eof => {
                console.say(RunOutcome::Quit.summary());
                return Ok(exit_codes::QUIT);
            }
        },
    };

    let mut orchestrator = Orchestrator::start(
        &config,
        &workdir,
        &goal,
        Arc::new(llm),
        &mut console,
        interrupt,
    )?;
    let outcome = orchestrator.run()?;
    drop(orchestrator);

    console.say(outcome.summary());
    Ok(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_words_are_joined() {
        let cli = Cli::parse_from(["vibe-runner", "fix", "the", "tests"]);
        assert_eq!(cli.goal().as_deref(), Some("fix the tests"));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn missing_goal_is_none() {
        let cli = Cli::parse_from(["vibe-runner"]);
        assert_eq!(cli.goal(), None);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "vibe-runner",
            "--max-steps",
            "4",
            "--instructions",
            "docs/AGENTS.md",
            "goal",
        ]);
        let mut config = RunnerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.max_steps, 4);
        assert_eq!(config.instructions_path, PathBuf::from("docs/AGENTS.md"));
    }
}
