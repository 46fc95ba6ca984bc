//! Console gate definitions: which commands each gate accepts and how a raw
//! input line maps onto them.
//!
//! The three gates share one state machine (see [`crate::gate`]); they differ
//! only in the table returned by [`GateKind::spec`].

use std::fmt;

/// Why a post-verify gate was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// A verify command exited 0.
    Verify,
    /// The model declared the task done.
    Done,
}

impl Checkpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::Verify => "verify",
            Checkpoint::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// Opened on interrupt or aborted input.
    Control,
    /// Human-verified milestone.
    PostVerify(Checkpoint),
    /// Conversation without execution.
    Chat,
}

/// Static description of a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSpec {
    /// Key used in audit log lines.
    pub name: &'static str,
    pub prompt: &'static str,
    pub banner: String,
    /// Printed when a blank line is entered.
    pub hint: &'static str,
    /// Printed when Ctrl-C arrives while the gate waits for input.
    pub paused_notice: &'static str,
    pub allows_run: bool,
    pub allows_done: bool,
}

impl GateKind {
    pub fn spec(self) -> GateSpec {
        match self {
            GateKind::Control => GateSpec {
                name: "control",
                prompt: "control> ",
                banner: "[paused] commands: resume | feedback <text> | run <bash> | quit\n         bare text => feedback + resume".to_string(),
                hint: "empty input ignored; use resume/feedback/run/quit",
                paused_notice: "still paused",
                allows_run: true,
                allows_done: false,
            },
            GateKind::PostVerify(checkpoint) => {
                let headline = match checkpoint {
                    Checkpoint::Verify => "[verify passed]",
                    Checkpoint::Done => "[agent says done]",
                };
                GateSpec {
                    name: match checkpoint {
                        Checkpoint::Verify => "post_verify",
                        Checkpoint::Done => "post_done",
                    },
                    prompt: "post-verify> ",
                    banner: format!(
                        "{headline} commands: done | resume | feedback <text> | run <bash> | quit\n             bare text => feedback + resume"
                    ),
                    hint: "empty input ignored; use done/resume/feedback/run/quit",
                    paused_notice: "still waiting for done/resume",
                    allows_run: true,
                    allows_done: true,
                }
            }
            GateKind::Chat => GateSpec {
                name: "chat",
                prompt: "chat> ",
                banner: "[chat] commands: resume | feedback <text> | quit\n       bare text => feedback + resume".to_string(),
                hint: "empty input ignored; use resume/feedback/quit",
                paused_notice: "still in chat",
                allows_run: false,
                allows_done: false,
            },
        }
    }

    /// Map one input line onto a gate command.
    pub fn parse(self, raw: &str) -> GateCommand {
        let line = raw.trim();
        if line.is_empty() {
            return GateCommand::Blank;
        }
        let spec = self.spec();
        match line {
            "resume" | "r" => return GateCommand::Resume,
            "quit" | "q" | "exit" => return GateCommand::Quit,
            "done" | "d" if spec.allows_done => return GateCommand::Done,
            // Chat has no done transition; ending the conversation means leaving.
            "done" if self == GateKind::Chat => return GateCommand::Quit,
            _ => {}
        }
        if let Some(text) = strip_verb(line, "feedback") {
            return match text {
                "" => GateCommand::Usage("feedback needs text: feedback <text>"),
                text => GateCommand::Feedback(text.to_string()),
            };
        }
        if spec.allows_run
            && let Some(cmd) = strip_verb(line, "run")
        {
            return match cmd {
                "" => GateCommand::Usage("run needs a command: run <bash>"),
                cmd => GateCommand::Run(cmd.to_string()),
            };
        }
        GateCommand::FreeText(line.to_string())
    }
}

/// `verb` alone yields `Some("")`; `verb <rest>` yields the trimmed rest.
fn strip_verb<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(verb)?;
    if rest.is_empty() {
        return Some("");
    }
    if rest.starts_with(char::is_whitespace) {
        return Some(rest.trim());
    }
    None
}

/// A parsed gate input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCommand {
    Blank,
    Resume,
    Quit,
    Done,
    Feedback(String),
    Run(String),
    /// Unrecognized text: feedback followed by resume.
    FreeText(String),
    /// Recognized verb with a missing argument.
    Usage(&'static str),
}

/// Result of leaving a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Resume,
    Quit,
    /// Only reachable from a post-verify gate.
    Done,
}

impl GateOutcome {
    pub fn should_quit(self) -> bool {
        self == GateOutcome::Quit
    }
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateOutcome::Resume => "resume",
            GateOutcome::Quit => "quit",
            GateOutcome::Done => "done",
        })
    }
}

/// `y`/`yes`, case-insensitive. Everything else cancels.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
