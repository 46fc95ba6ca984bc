//! Deterministic, pure logic shared by the runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod decision;
pub mod denylist;
pub mod gate;
pub mod history;
pub mod rules;
pub mod truncate;
