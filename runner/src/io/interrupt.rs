//! Human interrupt (Ctrl-C) observed as a shared flag.
//!
//! The runner itself stays on one thread. A listener thread owns a small
//! current-thread tokio runtime that waits for SIGINT and raises the flag; the
//! runner polls it at its blocking points (model call, child process wait,
//! line input) and hands control to the control gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Consume a pending interrupt. Returns whether one was pending.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Install the Ctrl-C listener. Once installed, SIGINT no longer terminates
    /// the process; it only raises this flag.
    pub fn listen_for_ctrl_c(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .context("build signal runtime")?;
        let interrupt = self.clone();
        thread::Builder::new()
            .name("interrupt-listener".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        match tokio::signal::ctrl_c().await {
                            Ok(()) => {
                                debug!("interrupt received");
                                interrupt.trigger();
                            }
                            Err(err) => {
                                warn!(err = %err, "ctrl-c listener stopped");
                                break;
                            }
                        }
                    }
                });
            })
            .context("spawn interrupt listener")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_pending_interrupt() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.take());
        interrupt.trigger();
        assert!(interrupt.is_set());
        assert!(interrupt.take());
        assert!(!interrupt.is_set());
    }

    #[test]
    fn clones_share_state() {
        let interrupt = Interrupt::new();
        let other = interrupt.clone();
        other.trigger();
        assert!(interrupt.take());
    }
}
