//! Message texts sent to the model, rendered from minijinja templates.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const KICKOFF_TEMPLATE: &str = include_str!("prompts/kickoff.md");
const STEP_RESULT_TEMPLATE: &str = include_str!("prompts/step_result.md");
const HUMAN_ANSWER_TEMPLATE: &str = include_str!("prompts/human_answer.md");

/// Inputs for the first user message of a run.
#[derive(Debug, Clone)]
pub struct Kickoff<'a> {
    pub goal: &'a str,
    pub workdir: &'a Path,
    pub instructions: &'a str,
    pub task_doc: &'a str,
}

/// Renders every model-facing message.
pub struct Prompts {
    env: Environment<'static>,
    task_name: String,
    instructions_name: String,
}

impl Prompts {
    /// `task_path` and `instructions_path` only contribute their file names.
    pub fn new(task_path: &Path, instructions_path: &Path) -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("kickoff", KICKOFF_TEMPLATE)
            .expect("kickoff template should be valid");
        env.add_template("step_result", STEP_RESULT_TEMPLATE)
            .expect("step_result template should be valid");
        env.add_template("human_answer", HUMAN_ANSWER_TEMPLATE)
            .expect("human_answer template should be valid");
        Self {
            env,
            task_name: file_name(task_path),
            instructions_name: file_name(instructions_path),
        }
    }

    pub fn system(&self) -> Result<String> {
        Ok(self.env.get_template("system")?.render(context! {
            task_name => &self.task_name,
            instructions_name => &self.instructions_name,
        })?)
    }

    pub fn kickoff(&self, input: &Kickoff<'_>) -> Result<String> {
        Ok(self.env.get_template("kickoff")?.render(context! {
            goal => input.goal,
            workdir => input.workdir.display().to_string(),
            instructions_name => &self.instructions_name,
            instructions => input.instructions,
            task_name => &self.task_name,
            task_doc => input.task_doc,
        })?)
    }

    /// Command result fed back after an executed or planned step.
    pub fn step_result(&self, output: &str, task_doc: &str) -> Result<String> {
        Ok(self.env.get_template("step_result")?.render(context! {
            output => output,
            task_name => &self.task_name,
            task_doc => task_doc,
        })?)
    }

    pub fn human_answer(&self, answer: &str, task_doc: &str) -> Result<String> {
        Ok(self.env.get_template("human_answer")?.render(context! {
            answer => answer,
            task_name => &self.task_name,
            task_doc => task_doc,
        })?)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
