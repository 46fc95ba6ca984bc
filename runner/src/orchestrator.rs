//! The step loop: ask the model for a decision, check it against the phase
//! rules, carry it out, and hand control to the human where required.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::decision::{Decision, FatalDecisionError, parse_decision};
use crate::core::gate::{Checkpoint, GateKind, GateOutcome};
use crate::core::history::ConversationHistory;
use crate::core::rules::{Correction, RunPhase, StepAction, Verdict, evaluate};
use crate::core::truncate::tail_chars;
use crate::exit_codes;
use crate::gate::{GateContext, run_gate};
use crate::io::audit_log::{AuditLog, RunHeader};
use crate::io::config::RunnerConfig;
use crate::io::console::{Console, Line};
use crate::io::interrupt::Interrupt;
use crate::io::llm::LlmClient;
use crate::io::prompt::{Kickoff, Prompts};
use crate::io::shell::{CommandReport, ExecutionResult, ShellExecutor};
use crate::io::task_doc::{TaskDocument, initial_task_document, read_instructions};

/// Output recorded for an accepted plan step.
pub const PLANNING: &str = "[planning]";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The human confirmed completion.
    Done,
    Quit,
    MaxStepsExceeded,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Done => exit_codes::DONE,
            RunOutcome::Quit => exit_codes::QUIT,
            RunOutcome::MaxStepsExceeded => exit_codes::MAX_STEPS,
        }
    }

    /// Final console line.
    pub fn summary(self) -> &'static str {
        match self {
            RunOutcome::Done => "DONE (user confirmed)",
            RunOutcome::Quit => "QUIT",
            RunOutcome::MaxStepsExceeded => "MAX_STEPS exceeded",
        }
    }
}

/// Whether the loop keeps going after a step.
enum Flow {
    Continue,
    Stop(RunOutcome),
}

enum ModelReply {
    Decision(Value),
    Interrupted,
}

/// One supervised run. Owns the history, the audit log and the task document
/// for its whole lifetime.
pub struct Orchestrator<'a, C: Console + ?Sized> {
    config: &'a RunnerConfig,
    llm: Arc<dyn LlmClient>,
    console: &'a mut C,
    interrupt: Interrupt,
    shell: ShellExecutor,
    audit: AuditLog,
    task_doc: TaskDocument,
    prompts: Prompts,
    history: ConversationHistory,
}

impl<'a, C: Console + ?Sized> Orchestrator<'a, C> {
    /// Prepare a run in `workdir`: audit log, initial task document, and the
    /// seeded history (system prompt plus kickoff message).
    pub fn start(
        config: &'a RunnerConfig,
        workdir: &Path,
        goal: &str,
        llm: Arc<dyn LlmClient>,
        console: &'a mut C,
        interrupt: Interrupt,
    ) -> Result<Self> {
        let audit = AuditLog::create(
            &workdir.join(&config.log_dir),
            &RunHeader {
                started_at: Local::now(),
                provider: config.provider.as_str(),
                model: config.model(),
                goal,
            },
        )?;
        console.say(&format!("log file: {}", audit.path().display()));

        let task_doc = TaskDocument::new(workdir.join(&config.task_path));
        task_doc.write(&initial_task_document(goal))?;
        let instructions = read_instructions(&workdir.join(&config.instructions_path))?;

        let prompts = Prompts::new(&config.task_path, &config.instructions_path);
        let mut history = ConversationHistory::new();
        history.push_system(prompts.system()?);
        history.push_user(prompts.kickoff(&Kickoff {
            goal,
            workdir,
            instructions: &instructions,
            task_doc: &task_doc.read()?,
        })?);

        let shell = ShellExecutor::new(config, workdir, interrupt.clone());
        Ok(Self {
            config,
            llm,
            console,
            interrupt,
            shell,
            audit,
            task_doc,
            prompts,
            history,
        })
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn audit_path(&self) -> &Path {
        self.audit.path()
    }

    /// Drive the loop until a terminal outcome or a fatal error.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let mut step = 1u32;
        let mut retries = 0u32;
        while step <= self.config.max_steps {
            let raw = match self.request_decision() {
                Ok(ModelReply::Decision(raw)) => raw,
                Ok(ModelReply::Interrupted) => {
                    self.console.say("\n[interrupted] model call discarded");
                    if self.open_gate(GateKind::Control)?.should_quit() {
                        return Ok(RunOutcome::Quit);
                    }
                    continue;
                }
                Err(err) => {
                    self.audit.line(&format!("error={err:#}"))?;
                    return Err(err);
                }
            };

            self.audit.step(step, &raw.to_string())?;
            let decision = parse_decision(step, &raw).map_err(|e| self.fatal(e))?;
            let action = match evaluate(step, &decision).map_err(|e| self.fatal(e))? {
                Verdict::Accept(action) => action,
                Verdict::Correct(correction) => {
                    retries += 1;
                    if retries > self.config.max_soft_retries {
                        return Err(self
                            .fatal(FatalDecisionError::new(
                                step,
                                format!(
                                    "gave up after {} corrective retries: {}",
                                    self.config.max_soft_retries, correction.warning
                                ),
                            ))
                            .into());
                    }
                    self.request_correction(&decision, &correction)?;
                    continue;
                }
            };
            retries = 0;

            if let Flow::Stop(outcome) = self.apply(step, &decision, action)? {
                return Ok(outcome);
            }
            step += 1;
        }

        self.audit.line("status=MAX_STEPS exceeded")?;
        Ok(RunOutcome::MaxStepsExceeded)
    }

    /// Call the model on a worker thread so Ctrl-C can abandon the call.
    #[instrument(skip_all, fields(messages = self.history.len()))]
    fn request_decision(&self) -> Result<ModelReply> {
        let llm = Arc::clone(&self.llm);
        let history = self.history.clone();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("model-request".to_string())
            .spawn(move || {
                // Dropped when the call was abandoned.
                let _ = tx.send(llm.next_decision(&history));
            })
            .context("spawn model request")?;

        loop {
            if self.interrupt.take() {
                warn!("model call interrupted");
                return Ok(ModelReply::Interrupted);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(reply) => return reply.map(ModelReply::Decision),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("model request ended without a reply")
                }
            }
        }
    }

    fn fatal(&mut self, err: FatalDecisionError) -> FatalDecisionError {
        if let Err(log_err) = self.audit.line(&format!("error={}", err.reason)) {
            warn!(err = %log_err, "failed to record fatal error");
        }
        err
    }

    fn request_correction(&mut self, decision: &Decision, correction: &Correction) -> Result<()> {
        self.audit.line(&format!("warning={}", correction.warning))?;
        self.console
            .say(&format!("warning: {}, retrying...", correction.warning));
        self.history.push_assistant(decision.to_json());
        self.history.push_user(correction.message.clone());
        Ok(())
    }

    fn apply(&mut self, step: u32, decision: &Decision, action: StepAction) -> Result<Flow> {
        // Persisted before anything else happens for an accepted step.
        self.task_doc.write(&decision.task_md_patch)?;
        debug!(step, phase = %decision.phase, "decision accepted");

        match action {
            StepAction::Plan => {
                let report = CommandReport {
                    result: ExecutionResult {
                        exit_code: 0,
                        output: PLANNING.to_string(),
                    },
                    snapshot: self.shell.snapshot(),
                };
                self.record_step(step, decision, &report)?;
                Ok(Flow::Continue)
            }
            StepAction::AskUser { questions } => self.ask_user(decision, &questions),
            StepAction::Chat { message } => {
                self.history.push_assistant(decision.to_json());
                if !message.is_empty() {
                    self.console.say(&format!("\nAgent: {message}"));
                    self.audit.line(&format!("chat=say {message}"))?;
                }
                Ok(match self.open_gate(GateKind::Chat)? {
                    GateOutcome::Quit => Flow::Stop(RunOutcome::Quit),
                    GateOutcome::Resume | GateOutcome::Done => Flow::Continue,
                })
            }
            StepAction::Done => {
                self.audit.line("phase=done")?;
                self.history.push_assistant(decision.to_json());
                self.checkpoint(Checkpoint::Done)
            }
            StepAction::Run { phase, cmd } => {
                info!(step, phase = %phase.phase(), cmd = %cmd, "executing");
                let report = self.shell.run(&cmd);
                self.record_step(step, decision, &report)?;

                if report.result.was_interrupted() {
                    self.console.say("\n[interrupted] command stopped");
                    if self.open_gate(GateKind::Control)?.should_quit() {
                        return Ok(Flow::Stop(RunOutcome::Quit));
                    }
                    return Ok(Flow::Continue);
                }
                if phase == RunPhase::Verify && report.result.exit_code == 0 {
                    return self.checkpoint(Checkpoint::Verify);
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Audit, summarize and feed back one executed (or planned) step.
    fn record_step(&mut self, step: u32, decision: &Decision, report: &CommandReport) -> Result<()> {
        let rendered = report.render();
        let cmd = decision.command();
        self.audit.line(&format!(
            "phase={}\ncmd={cmd}\nexit_code={}\noutput:\n{rendered}",
            decision.phase, report.result.exit_code
        ))?;
        self.console.say(&format!(
            "\n== step {step} {} ==\ncmd: {}\n{}",
            decision.phase,
            if cmd.is_empty() { "(none)" } else { cmd },
            tail_chars(&rendered, self.config.preview_chars)
        ));
        let task_doc = self.task_doc.read()?;
        self.history.push_assistant(decision.to_json());
        self.history
            .push_user(self.prompts.step_result(&rendered, &task_doc)?);
        Ok(())
    }

    fn ask_user(&mut self, decision: &Decision, questions: &[String]) -> Result<Flow> {
        self.console.say("\nAgent asks for clarification:");
        for question in questions {
            self.console.say(&format!("- {question}"));
        }
        let answer = match self.console.read_line("you> ")? {
            Line::Text(answer) => answer.trim().to_string(),
            Line::Interrupted | Line::Eof => {
                debug!("clarification aborted");
                return Ok(match self.open_gate(GateKind::Control)? {
                    GateOutcome::Quit => Flow::Stop(RunOutcome::Quit),
                    GateOutcome::Resume | GateOutcome::Done => Flow::Continue,
                });
            }
        };
        self.audit.line(&format!("human_answer={answer}"))?;
        if matches!(answer.to_lowercase().as_str(), "quit" | "q" | "exit") {
            return Ok(Flow::Stop(RunOutcome::Quit));
        }
        let task_doc = self.task_doc.read()?;
        self.history.push_assistant(decision.to_json());
        self.history
            .push_user(self.prompts.human_answer(&answer, &task_doc)?);
        Ok(Flow::Continue)
    }

    fn checkpoint(&mut self, checkpoint: Checkpoint) -> Result<Flow> {
        Ok(match self.open_gate(GateKind::PostVerify(checkpoint))? {
            GateOutcome::Done => Flow::Stop(RunOutcome::Done),
            GateOutcome::Quit => Flow::Stop(RunOutcome::Quit),
            GateOutcome::Resume => Flow::Continue,
        })
    }

    fn open_gate(&mut self, kind: GateKind) -> Result<GateOutcome> {
        let mut ctx = GateContext {
            console: &mut *self.console,
            shell: &self.shell,
            audit: &mut self.audit,
            preview_chars: self.config.preview_chars,
        };
        run_gate(kind, &mut self.history, &mut ctx)
    }
}
