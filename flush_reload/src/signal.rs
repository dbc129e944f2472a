use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_stop_signal(_: c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Clears the stop flag and makes SIGINT and SIGTERM raise it.
pub fn install_stop_handler() -> nix::Result<&'static AtomicBool> {
    STOP_REQUESTED.store(false, Ordering::SeqCst);
    let action = SigAction::new(
        SigHandler::Handler(on_stop_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // The handler only stores to an atomic.
        unsafe { sigaction(signal, &action)? };
    }
    log::debug!("SIGINT and SIGTERM now request a stop");
    Ok(&STOP_REQUESTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;

    #[test]
    fn sigterm_requests_a_stop() {
        let stop = install_stop_handler().unwrap();
        assert!(!stop.load(Ordering::SeqCst));
        raise(Signal::SIGTERM).unwrap();
        assert!(stop.load(Ordering::SeqCst));
    }
}
