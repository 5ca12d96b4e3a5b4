//! Cancellation: a shared flag polled by the runner and the copier, plus
//! SIGINT/SIGTERM registration for the CLI.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// Cloning yields another handle to the same flag. `Ordering::Relaxed` is
/// enough: the flag is only polled between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// The underlying flag, for signal registration.
    #[cfg(feature = "cli")]
    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Routes SIGINT and SIGTERM into a [`CancelToken`].
#[cfg(feature = "cli")]
pub struct SignalHandler {
    token: CancelToken,
}

#[cfg(feature = "cli")]
impl SignalHandler {
    /// Register OS signal hooks onto a fresh token.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    pub fn install() -> Self {
        let handler = Self {
            token: CancelToken::new(),
        };
        handler.register_signals();
        handler
    }

    /// Token that flips when a signal arrives.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    fn register_signals(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        if let Err(e) = signal_hook::flag::register(SIGTERM, self.token.flag()) {
            eprintln!("[DBK-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, self.token.flag()) {
            eprintln!("[DBK-SIGNAL] failed to register SIGINT: {e}");
        }
    }
}
