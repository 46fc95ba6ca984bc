//! Supervised agent runner.
//!
//! A language model proposes one step at a time (plan, act, verify, chat,
//! done); the runner validates each proposal, runs shell commands in the
//! workspace, and stops at console gates where a human can steer, run their
//! own commands, or end the run.
//!
//! - **[`core`]**: Pure logic (decision schema, phase rules, denylist, gate
//!   tables). No I/O.
//! - **[`io`]**: Side effects (processes, git, files, terminal, HTTP).
//!
//! [`orchestrator`] drives the step loop; [`gate`] runs the interactive
//! consoles.

pub mod core;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
