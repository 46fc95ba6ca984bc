//! Stable process exit codes for `vibe-runner`.

/// The human confirmed the task as done.
pub const DONE: i32 = 0;
/// Fatal error: protocol violation, model failure, missing credentials, local I/O.
pub const FATAL: i32 = 1;
/// The human quit the run.
pub const QUIT: i32 = 2;
/// The step budget ran out.
pub const MAX_STEPS: i32 = 3;
