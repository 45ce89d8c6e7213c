//! Process-wide stop flag shared by the engine thread and the link loop.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static QUIT: AtomicBool = AtomicBool::new(false);
static EXIT_CODE: AtomicI32 = AtomicI32::new(0);

pub fn should_quit() -> bool {
    QUIT.load(Ordering::SeqCst)
}

/// Loop predicate for [`crate::bus::BusEngine::run`].
pub fn keep_running() -> bool {
    !should_quit()
}

pub fn request_quit() {
    QUIT.store(true, Ordering::SeqCst);
}

pub fn exit_code() -> i32 {
    EXIT_CODE.load(Ordering::SeqCst)
}

/// Stops both loops; the first non-zero code wins.
pub fn fail(code: i32) {
    if code != 0 {
        let _ = EXIT_CODE.compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst);
    }
    request_quit();
}

#[cfg(unix)]
pub fn install() {
    use std::os::raw::c_int;
    const SIGINT: c_int = 2;
    const SIGTERM: c_int = 15;

    extern "C" fn on_signal(_sig: c_int) {
        // Async-signal context: flag only.
        QUIT.store(true, Ordering::SeqCst);
    }

    extern "C" {
        fn signal(sig: c_int, handler: extern "C" fn(c_int)) -> usize;
    }

    unsafe {
        let _ = signal(SIGINT, on_signal);
        let _ = signal(SIGTERM, on_signal);
    }
    log::debug!("SIGINT/SIGTERM handlers installed");
}

#[cfg(not(unix))]
pub fn install() {
    log::debug!("no signal handlers on this platform; stop with the host");
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test touches the globals so the harness' threads can't race it.
    #[test]
    fn test_fail_keeps_first_code_and_stops() {
        assert!(keep_running());
        fail(0);
        assert!(should_quit());
        assert_eq!(exit_code(), 0);
        fail(3);
        fail(4);
        assert_eq!(exit_code(), 3);
    }
}
