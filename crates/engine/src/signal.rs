//! Interrupt handling for the executor.
//!
//! Handlers only flip process-wide atomics, keeping them async-signal
//! safe. The handlers are installed *without* `SA_RESTART` so that the
//! flow pump's blocking `splice` returns `EINTR` and re-checks the cancel
//! flag instead of resuming the syscall.
//!
//! The first `SIGINT`/`SIGTERM` requests a graceful stop: no further
//! plans are started and the in-flight flow is drained. A second signal
//! requests an immediate abort, which callers may translate into a hard
//! exit.

#![allow(unsafe_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static ABORT: AtomicBool = AtomicBool::new(false);
static SIGNALED_ONCE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signum: libc::c_int) {
    if SIGNALED_ONCE.swap(true, Ordering::SeqCst) {
        ABORT.store(true, Ordering::SeqCst);
    } else {
        SHUTDOWN.store(true, Ordering::SeqCst);
    }
}

/// Installs the `SIGINT` and `SIGTERM` handlers.
///
/// # Errors
///
/// Returns the OS error when `sigaction` fails, which indicates a serious
/// system problem.
pub fn install() -> io::Result<()> {
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only touches atomics and sigaction is given
        // a zeroed, fully initialised struct.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// The flag the executor and the flow pump poll for cancellation.
#[must_use]
pub fn cancel_flag() -> &'static AtomicBool {
    &SHUTDOWN
}

/// Whether a graceful stop has been requested.
#[must_use]
pub fn is_cancelled() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Whether a second signal asked for an immediate abort. Callers should
/// stop without draining or rendering any further work.
#[must_use]
pub fn is_abort_requested() -> bool {
    ABORT.load(Ordering::SeqCst)
}

/// Clears all flags. Test support only.
#[cfg(test)]
fn reset_for_testing() {
    SHUTDOWN.store(false, Ordering::SeqCst);
    ABORT.store(false, Ordering::SeqCst);
    SIGNALED_ONCE.store(false, Ordering::SeqCst);
}
