//! Phase rules applied to every parsed decision before any side effect.
//!
//! The outcome is one of three things: a typed [`StepAction`] the
//! orchestrator may carry out, a [`Correction`] to feed back to the model
//! while re-attempting the same step, or a fatal error.

use crate::core::decision::{Decision, DecisionKind, FatalDecisionError, Phase};

/// Clarification request used when an `ask_user` decision carries no questions.
pub const DEFAULT_QUESTION: &str = "Need more information. Please clarify.";

/// At most this many questions are shown to the human.
pub const MAX_QUESTIONS: usize = 3;

/// Command-running phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Act,
    Verify,
}

impl RunPhase {
    pub fn phase(self) -> Phase {
        match self {
            RunPhase::Act => Phase::Act,
            RunPhase::Verify => Phase::Verify,
        }
    }
}

/// What an accepted decision asks the orchestrator to do, keyed by phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Record the plan; nothing is executed.
    Plan,
    /// Stop and ask the human the given questions.
    AskUser { questions: Vec<String> },
    /// Show `message` and hand control to the chat console.
    Chat { message: String },
    /// The model believes the task is finished; the human must confirm.
    Done,
    /// Run `cmd` in the workspace.
    Run { phase: RunPhase, cmd: String },
}

/// Soft violation: the step is rejected and re-attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// Short line for the audit log and console.
    pub warning: String,
    /// Message appended to history for the model.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(StepAction),
    Correct(Correction),
}

/// Apply the phase rules, in order, to a parsed decision for `step`.
pub fn evaluate(step: u32, decision: &Decision) -> Result<Verdict, FatalDecisionError> {
    if step == 1 && decision.phase != Phase::Plan {
        return Err(FatalDecisionError::new(
            step,
            format!("step 1 must be phase=plan, got phase={}", decision.phase),
        ));
    }
    if step == 1 && decision.has_command() {
        return Err(FatalDecisionError::new(
            step,
            "step 1 must have an empty cmd",
        ));
    }

    if decision.phase == Phase::Plan && decision.has_command() {
        return Ok(Verdict::Correct(Correction {
            warning: "invalid plan cmd; requested retry".to_string(),
            message: "Invalid output: phase=plan must have empty cmd. Please emit a valid next JSON step.".to_string(),
        }));
    }

    let run_phase = match decision.phase {
        Phase::Act => Some(RunPhase::Act),
        Phase::Verify => Some(RunPhase::Verify),
        _ => None,
    };
    if let Some(run_phase) = run_phase
        && decision.decision == DecisionKind::DirectExecute
        && !decision.has_command()
    {
        let phase = run_phase.phase();
        return Ok(Verdict::Correct(Correction {
            warning: format!("missing cmd in {phase}; requested retry"),
            message: format!(
                "Invalid output: phase={phase} requires non-empty cmd unless decision=ask_user/chat/done. Re-emit valid JSON."
            ),
        }));
    }

    if decision.decision == DecisionKind::AskUser {
        return Ok(Verdict::Accept(StepAction::AskUser {
            questions: questions_for(decision),
        }));
    }

    let action = match (decision.phase, run_phase) {
        (Phase::Chat, _) => StepAction::Chat {
            message: chat_message(decision),
        },
        (Phase::Done, _) => StepAction::Done,
        (_, Some(phase)) => StepAction::Run {
            phase,
            cmd: decision.command().to_string(),
        },
        _ => StepAction::Plan,
    };
    Ok(Verdict::Accept(action))
}

fn questions_for(decision: &Decision) -> Vec<String> {
    let mut questions: Vec<String> = decision
        .questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();
    if questions.is_empty() {
        let fallback = decision
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_QUESTION);
        questions.push(fallback.to_string());
    }
    questions.truncate(MAX_QUESTIONS);
    questions
}

fn chat_message(decision: &Decision) -> String {
    let say = decision.say.as_deref().map(str::trim).unwrap_or("");
    if !say.is_empty() {
        return say.to_string();
    }
    decision
        .notes
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(phase: Phase, kind: DecisionKind, cmd: &str) -> Decision {
        Decision {
            phase,
            decision: kind,
            cmd: cmd.to_string(),
            task_md_patch: "# Task\n".to_string(),
            questions: Vec::new(),
            say: None,
            goal: None,
            checklist: Vec::new(),
            memory_add: Vec::new(),
            notes: None,
        }
    }

    #[test]
    fn first_step_must_plan() {
        for phase in [Phase::Act, Phase::Verify, Phase::Chat, Phase::Done] {
            let err = evaluate(1, &decision(phase, DecisionKind::DirectExecute, "ls")).unwrap_err();
            assert!(err.reason.contains("phase=plan"), "{}", err.reason);
        }
    }

    #[test]
    fn first_step_plan_with_command_is_fatal() {
        let err = evaluate(1, &decision(Phase::Plan, DecisionKind::DirectExecute, "ls"))
            .unwrap_err();
        assert!(err.reason.contains("empty cmd"));
    }

    #[test]
    fn first_step_plan_is_accepted() {
        let verdict = evaluate(1, &decision(Phase::Plan, DecisionKind::DirectExecute, ""))
            .expect("verdict");
        assert_eq!(verdict, Verdict::Accept(StepAction::Plan));
    }

    #[test]
    fn later_plan_with_command_is_corrected() {
        let verdict = evaluate(4, &decision(Phase::Plan, DecisionKind::DirectExecute, "ls"))
            .expect("verdict");
        let Verdict::Correct(correction) = verdict else {
            panic!("expected correction, got {verdict:?}");
        };
        assert!(correction.message.contains("phase=plan must have empty cmd"));
    }

    #[test]
    fn act_and_verify_without_command_are_corrected() {
        for phase in [Phase::Act, Phase::Verify] {
            let verdict =
                evaluate(2, &decision(phase, DecisionKind::DirectExecute, "   ")).expect("verdict");
            let Verdict::Correct(correction) = verdict else {
                panic!("expected correction for {phase}");
            };
            assert!(correction.warning.contains(phase.as_str()));
        }
    }

    #[test]
    fn ask_user_without_command_is_accepted_in_act() {
        let verdict =
            evaluate(2, &decision(Phase::Act, DecisionKind::AskUser, "")).expect("verdict");
        assert_eq!(
            verdict,
            Verdict::Accept(StepAction::AskUser {
                questions: vec![DEFAULT_QUESTION.to_string()]
            })
        );
    }

    #[test]
    fn ask_user_prefers_notes_then_caps_questions() {
        let mut d = decision(Phase::Plan, DecisionKind::AskUser, "");
        d.notes = Some("which runtime?".to_string());
        assert_eq!(
            evaluate(2, &d).expect("verdict"),
            Verdict::Accept(StepAction::AskUser {
                questions: vec!["which runtime?".to_string()]
            })
        );

        d.questions = (1..=5).map(|i| format!("q{i}")).collect();
        let Verdict::Accept(StepAction::AskUser { questions }) = evaluate(2, &d).expect("verdict")
        else {
            panic!("expected ask_user");
        };
        assert_eq!(questions, vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn ask_user_takes_precedence_over_chat_and_done() {
        for phase in [Phase::Chat, Phase::Done] {
            let verdict =
                evaluate(3, &decision(phase, DecisionKind::AskUser, "")).expect("verdict");
            assert!(matches!(verdict, Verdict::Accept(StepAction::AskUser { .. })));
        }
    }

    #[test]
    fn chat_falls_back_to_notes() {
        let mut d = decision(Phase::Chat, DecisionKind::DirectExecute, "");
        d.notes = Some("here is why".to_string());
        assert_eq!(
            evaluate(2, &d).expect("verdict"),
            Verdict::Accept(StepAction::Chat {
                message: "here is why".to_string()
            })
        );
        d.say = Some(" hello ".to_string());
        assert_eq!(
            evaluate(2, &d).expect("verdict"),
            Verdict::Accept(StepAction::Chat {
                message: "hello".to_string()
            })
        );
    }

    #[test]
    fn done_is_accepted_even_with_command() {
        let verdict = evaluate(5, &decision(Phase::Done, DecisionKind::DirectExecute, "ls"))
            .expect("verdict");
        assert_eq!(verdict, Verdict::Accept(StepAction::Done));
    }

    #[test]
    fn verify_with_command_runs() {
        let verdict = evaluate(
            3,
            &decision(Phase::Verify, DecisionKind::DirectExecute, " ./test.sh "),
        )
        .expect("verdict");
        assert_eq!(
            verdict,
            Verdict::Accept(StepAction::Run {
                phase: RunPhase::Verify,
                cmd: "./test.sh".to_string()
            })
        );
    }
}
