//! Ctrl-C / SIGTERM handling. The handler only sets a flag; the scheduler
//! notices it between ticks.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_signal(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Register SIGINT and SIGTERM handlers. No-op on other platforms.
pub fn install() {
    #[cfg(unix)]
    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    log::debug!("[SCHEDULER] Signal handlers installed");
}

pub fn flag() -> &'static AtomicBool {
    &SHUTDOWN
}

pub fn requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Ask the run loop to stop, as a signal would.
pub fn request() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
