//! Fixed denylist of destructive command patterns.
//!
//! The denylist is advisory. It catches the obvious spellings the model tends
//! to produce (`rm -rf`, `curl ...`) and nothing else: quoting, absolute
//! paths, split flags, or an interpreter one-liner walk straight past it. It
//! is not a sandbox.

use std::sync::LazyLock;

use regex::Regex;

/// Case-sensitive, word-boundary anchored.
pub const DENY_PATTERN: &str =
    r"\b(rm\s+-rf|mkfs|dd\s+if=|shutdown|reboot|curl|wget|nc\b|ssh\b)";

static DENY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DENY_PATTERN).expect("deny pattern should compile"));

/// Return the first denylisted fragment found in `cmd`, if any.
pub fn blocked_fragment(cmd: &str) -> Option<&str> {
    DENY_RE.find(cmd).map(|m| m.as_str())
}
