//! The interactive console gate shared by the control, post-verify and chat
//! consoles.
//!
//! A gate blocks on human input until a leaving command (resume, quit, done)
//! is accepted. Feedback and manual commands append to the history and keep
//! the gate open.

use anyhow::Result;
use tracing::debug;

use crate::core::gate::{GateCommand, GateKind, GateOutcome, GateSpec, is_affirmative};
use crate::core::history::ConversationHistory;
use crate::core::truncate::tail_chars;
use crate::io::audit_log::AuditLog;
use crate::io::console::{Console, Line};
use crate::io::shell::ShellExecutor;

/// Appended to history when the human resumes from a post-verify gate.
pub const RESUME_AFTER_VERIFY: &str =
    "Human chose resume. Continue improving; do not finalize yet.";

/// Resources a gate needs besides the history.
pub struct GateContext<'a, C: Console + ?Sized> {
    pub console: &'a mut C,
    pub shell: &'a ShellExecutor,
    pub audit: &'a mut AuditLog,
    pub preview_chars: usize,
}

enum Confirmation {
    Yes,
    No,
    /// Input closed while asking.
    Closed,
}

/// Run `kind` until the human leaves it.
pub fn run_gate<C: Console + ?Sized>(
    kind: GateKind,
    history: &mut ConversationHistory,
    ctx: &mut GateContext<'_, C>,
) -> Result<GateOutcome> {
    let spec = kind.spec();
    ctx.console.say("");
    ctx.console.say(&spec.banner);

    loop {
        let raw = match ctx.console.read_line(spec.prompt)? {
            Line::Text(raw) => raw,
            Line::Interrupted => {
                ctx.console.say(spec.paused_notice);
                continue;
            }
            Line::Eof => {
                debug!(gate = spec.name, "input closed inside gate");
                return leave(GateOutcome::Quit, &spec, ctx);
            }
        };

        match kind.parse(&raw) {
            GateCommand::Blank => ctx.console.say(spec.hint),
            GateCommand::Usage(usage) => ctx.console.say(usage),
            GateCommand::Resume => {
                push_resume_notice(kind, history);
                return leave(GateOutcome::Resume, &spec, ctx);
            }
            GateCommand::Quit => match confirm(ctx, "confirm quit? [y/N] ")? {
                Confirmation::Yes | Confirmation::Closed => {
                    return leave(GateOutcome::Quit, &spec, ctx);
                }
                Confirmation::No => ctx.console.say("action=cancel_quit"),
            },
            GateCommand::Done => match confirm(ctx, "confirm done? [y/N] ")? {
                Confirmation::Yes => return leave(GateOutcome::Done, &spec, ctx),
                Confirmation::Closed => return leave(GateOutcome::Quit, &spec, ctx),
                Confirmation::No => ctx.console.say("action=cancel_done"),
            },
            GateCommand::Feedback(text) => {
                send_feedback(&text, history, &spec, ctx)?;
            }
            GateCommand::Run(cmd) => {
                let rendered = ctx.shell.run(&cmd).render();
                ctx.audit.line(&format!(
                    "{}=run cmd={cmd}\noutput:\n{rendered}",
                    spec.name
                ))?;
                ctx.console.say(tail_chars(&rendered, ctx.preview_chars));
                history.push_user(format!("human_manual_command: {cmd}\noutput:\n{rendered}"));
                ctx.console.say("action=run_sent");
            }
            GateCommand::FreeText(text) => {
                send_feedback(&text, history, &spec, ctx)?;
                push_resume_notice(kind, history);
                ctx.audit
                    .line(&format!("{}=resume_after_bare_text", spec.name))?;
                ctx.console.say("action=resume");
                return Ok(GateOutcome::Resume);
            }
        }
    }
}

fn push_resume_notice(kind: GateKind, history: &mut ConversationHistory) {
    if let GateKind::PostVerify(_) = kind {
        history.push_user(RESUME_AFTER_VERIFY);
    }
}

fn send_feedback<C: Console + ?Sized>(
    text: &str,
    history: &mut ConversationHistory,
    spec: &GateSpec,
    ctx: &mut GateContext<'_, C>,
) -> Result<()> {
    ctx.audit.line(&format!("{}=feedback {text}", spec.name))?;
    history.push_feedback(text);
    ctx.console.say("action=feedback_sent");
    Ok(())
}

fn confirm<C: Console + ?Sized>(
    ctx: &mut GateContext<'_, C>,
    prompt: &str,
) -> Result<Confirmation> {
    Ok(match ctx.console.read_line(prompt)? {
        Line::Text(answer) if is_affirmative(&answer) => Confirmation::Yes,
        Line::Text(_) | Line::Interrupted => Confirmation::No,
        Line::Eof => Confirmation::Closed,
    })
}

fn leave<C: Console + ?Sized>(
    outcome: GateOutcome,
    spec: &GateSpec,
    ctx: &mut GateContext<'_, C>,
) -> Result<GateOutcome> {
    ctx.audit.line(&format!("{}={outcome}", spec.name))?;
    ctx.console.say(&format!("action={outcome}"));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate::Checkpoint;
    use crate::core::history::Role;
    use crate::io::config::RunnerConfig;
    use crate::io::interrupt::Interrupt;
    use crate::test_support::{ScriptedConsole, test_audit_log};
    use std::fs;

    struct Fixture {
        _temp: tempfile::TempDir,
        shell: ShellExecutor,
        audit: AuditLog,
        console: ScriptedConsole,
    }

    impl Fixture {
        fn new(lines: Vec<Line>) -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let shell = ShellExecutor::new(&RunnerConfig::default(), temp.path(), Interrupt::new());
            let audit = test_audit_log(temp.path());
            Self {
                _temp: temp,
                shell,
                audit,
                console: ScriptedConsole::new(lines),
            }
        }

        fn run(&mut self, kind: GateKind, history: &mut ConversationHistory) -> GateOutcome {
            let mut ctx = GateContext {
                console: &mut self.console,
                shell: &self.shell,
                audit: &mut self.audit,
                preview_chars: 1200,
            };
            run_gate(kind, history, &mut ctx).expect("gate")
        }

        fn audit_text(&self) -> String {
            fs::read_to_string(self.audit.path()).expect("read audit")
        }
    }

    fn text(line: &str) -> Line {
        Line::Text(line.to_string())
    }

    #[test]
    fn quit_requires_affirmative_confirmation() {
        let mut fx = Fixture::new(vec![text("quit"), text("n"), text("q"), text("YES")]);
        let mut history = ConversationHistory::new();

        let outcome = fx.run(GateKind::Control, &mut history);

        assert_eq!(outcome, GateOutcome::Quit);
        assert!(history.is_empty());
        assert!(fx.console.output().contains(&"action=cancel_quit".to_string()));
        let audit = fx.audit_text();
        assert_eq!(audit.matches("control=quit").count(), 1);
    }

    #[test]
    fn cancelled_done_has_no_side_effect() {
        let mut fx = Fixture::new(vec![text("done"), text(""), text("resume")]);
        let mut history = ConversationHistory::new();

        let outcome = fx.run(GateKind::PostVerify(Checkpoint::Done), &mut history);

        assert_eq!(outcome, GateOutcome::Resume);
        assert!(fx.console.output().contains(&"action=cancel_done".to_string()));
        assert!(!fx.audit_text().contains("post_done=done"));
        assert_eq!(
            history.last().map(|m| m.content.as_str()),
            Some(RESUME_AFTER_VERIFY)
        );
    }

    #[test]
    fn confirmed_done_ends_post_verify() {
        let mut fx = Fixture::new(vec![text("d"), text("y")]);
        let mut history = ConversationHistory::new();
        let outcome = fx.run(GateKind::PostVerify(Checkpoint::Verify), &mut history);
        assert_eq!(outcome, GateOutcome::Done);
        assert!(fx.audit_text().contains("post_verify=done\n"));
    }

    #[test]
    fn bare_text_is_feedback_then_resume() {
        for kind in [
            GateKind::Control,
            GateKind::PostVerify(Checkpoint::Verify),
            GateKind::PostVerify(Checkpoint::Done),
            GateKind::Chat,
        ] {
            let mut bare = Fixture::new(vec![text("try the other test runner")]);
            let mut bare_history = ConversationHistory::new();
            let bare_outcome = bare.run(kind, &mut bare_history);

            let mut explicit = Fixture::new(vec![
                text("feedback try the other test runner"),
                text("resume"),
            ]);
            let mut explicit_history = ConversationHistory::new();
            let explicit_outcome = explicit.run(kind, &mut explicit_history);

            assert_eq!(bare_outcome, GateOutcome::Resume, "{kind:?}");
            assert_eq!(explicit_outcome, GateOutcome::Resume, "{kind:?}");
            assert_eq!(bare_history, explicit_history, "{kind:?}");
            assert_eq!(
                bare_history.messages()[0].content,
                "Human feedback: try the other test runner"
            );
        }
    }

    #[test]
    fn bare_text_after_verify_asks_model_to_keep_going() {
        let mut fx = Fixture::new(vec![text("looks off")]);
        let mut history = ConversationHistory::new();
        fx.run(GateKind::PostVerify(Checkpoint::Verify), &mut history);

        let contents: Vec<&str> = history.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Human feedback: looks off", RESUME_AFTER_VERIFY]);
    }

    #[test]
    fn feedback_stays_in_gate() {
        let mut fx = Fixture::new(vec![
            text("feedback first"),
            text("   "),
            text("feedback second"),
            text("r"),
        ]);
        let mut history = ConversationHistory::new();
        let outcome = fx.run(GateKind::Chat, &mut history);

        assert_eq!(outcome, GateOutcome::Resume);
        assert_eq!(history.len(), 2);
        assert!(
            fx.console
                .output()
                .contains(&"empty input ignored; use resume/feedback/quit".to_string())
        );
        assert!(fx.audit_text().contains("chat=feedback first\nchat=feedback second\nchat=resume\n"));
    }

    #[test]
    fn run_appends_manual_command_output() {
        let mut fx = Fixture::new(vec![text("run echo manual"), text("resume")]);
        let mut history = ConversationHistory::new();
        fx.run(GateKind::Control, &mut history);

        let first = &history.messages()[0];
        assert_eq!(first.role, Role::User);
        assert!(
            first
                .content
                .starts_with("human_manual_command: echo manual\noutput:\n[exit_code]\n0\nmanual\n")
        );
        assert!(fx.audit_text().contains("control=run cmd=echo manual\noutput:\n"));
        assert!(fx.console.output().contains(&"action=run_sent".to_string()));
    }

    #[test]
    fn run_is_plain_text_in_chat() {
        let mut fx = Fixture::new(vec![text("run rm nothing")]);
        let mut history = ConversationHistory::new();
        let outcome = fx.run(GateKind::Chat, &mut history);
        assert_eq!(outcome, GateOutcome::Resume);
        assert_eq!(
            history.last().map(|m| m.content.as_str()),
            Some("Human feedback: run rm nothing")
        );
    }

    #[test]
    fn interrupt_keeps_gate_open() {
        let mut fx = Fixture::new(vec![Line::Interrupted, text("resume")]);
        let mut history = ConversationHistory::new();
        let outcome = fx.run(GateKind::Control, &mut history);
        assert_eq!(outcome, GateOutcome::Resume);
        assert!(fx.console.output().contains(&"still paused".to_string()));
    }

    #[test]
    fn closed_input_quits() {
        let mut fx = Fixture::new(vec![]);
        let mut history = ConversationHistory::new();
        assert_eq!(fx.run(GateKind::Control, &mut history), GateOutcome::Quit);

        let mut fx = Fixture::new(vec![text("done")]);
        assert_eq!(
            fx.run(GateKind::PostVerify(Checkpoint::Done), &mut history),
            GateOutcome::Quit
        );
    }
}
