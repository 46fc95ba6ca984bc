//! Human-facing terminal I/O.
//!
//! Everything the supervisor sees or types goes through [`Console`], so the
//! orchestrator and gates can be driven by a scripted console in tests.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::io::interrupt::Interrupt;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One read from the human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A line with its trailing newline removed.
    Text(String),
    /// Ctrl-C arrived while waiting.
    Interrupted,
    /// Input is closed.
    Eof,
}

pub trait Console {
    /// Print a message line.
    fn say(&mut self, text: &str);

    /// Show `prompt` and wait for one line.
    fn read_line(&mut self, prompt: &str) -> Result<Line>;
}

/// Console on the process's stdin/stdout.
///
/// Stdin is read on a helper thread so a Ctrl-C is noticed while the human is
/// still typing. A line typed after an interrupt is kept for the next prompt.
pub struct StdConsole {
    lines: Receiver<io::Result<String>>,
    interrupt: Interrupt,
}

impl StdConsole {
    pub fn new(interrupt: Interrupt) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                let mut handle = stdin.lock();
                loop {
                    let mut buf = String::new();
                    let read = handle.read_line(&mut buf).map(|n| (n, buf));
                    let done = matches!(read, Ok((0, _)) | Err(_));
                    if tx.send(read.map(|(_, buf)| buf)).is_err() || done {
                        break;
                    }
                }
            })
            .context("spawn stdin reader")?;
        Ok(Self {
            lines: rx,
            interrupt,
        })
    }
}

impl Console for StdConsole {
    fn say(&mut self, text: &str) {
        println!("{text}");
    }

    fn read_line(&mut self, prompt: &str) -> Result<Line> {
        print!("{prompt}");
        io::stdout().flush().context("flush stdout")?;
        loop {
            if self.interrupt.take() {
                println!();
                return Ok(Line::Interrupted);
            }
            match self.lines.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(buf)) if buf.is_empty() => return Ok(Line::Eof),
                Ok(Ok(buf)) => return Ok(Line::Text(strip_newline(buf))),
                Ok(Err(e)) => return Err(e).context("read stdin"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(Line::Eof),
            }
        }
    }
}

fn strip_newline(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_unix_and_windows_line_endings() {
        assert_eq!(strip_newline("resume\n".to_string()), "resume");
        assert_eq!(strip_newline("resume\r\n".to_string()), "resume");
        assert_eq!(strip_newline("  spaced  ".to_string()), "  spaced  ");
    }
}
