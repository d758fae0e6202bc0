//! SIGINT handling for long-running captures.
//!
//! The handler only sets a process-wide flag. Callers poll [`interrupted`]
//! and tear down their own resources before exiting with [`EXIT_INTERRUPTED`].

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

pub const EXIT_INTERRUPTED: i32 = 130;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler. Returns false if the OS refused it.
pub fn install() -> bool {
    let handler = on_sigint as extern "C" fn(libc::c_int);
    let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        warn!("cannot install SIGINT handler");
        return false;
    }
    true
}

/// True once Ctrl-C has been pressed since [`install`].
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_sigint_sets_flag() {
        assert!(install());
        unsafe {
            libc::raise(libc::SIGINT);
        }
        assert!(interrupted());
    }
}
