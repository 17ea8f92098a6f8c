//! Fatal-signal handling.

use libc::c_int;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::LayerError;

/// Signals that turn into a fault event.
pub const FATAL_SIGNALS: [Signal; 7] = [
    Signal::SIGABRT,
    Signal::SIGSEGV,
    Signal::SIGINT,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGFPE,
    Signal::SIGILL,
];

/// Current disposition of a signal, as read back from the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler,
}

/// Route every fatal signal to `handler`.
///
/// Installation continues past a failing signal; all failures are returned.
pub fn install(handler: extern "C" fn(c_int)) -> Result<(), Vec<LayerError>> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let errors: Vec<LayerError> = FATAL_SIGNALS
        .iter()
        .filter_map(|&sig| {
            // SAFETY: the handler is an `extern "C"` function that never returns
            // into interrupted code.
            unsafe { signal::sigaction(sig, &action) }
                .err()
                .map(|source| LayerError::Signal {
                    signal: sig,
                    source,
                })
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Install the layer's own fault handler.
pub fn install_fatal_handler() {
    if let Err(errors) = install(handle_fatal_signal) {
        for e in errors {
            dcc_debug!("{}", e);
        }
    }
}

/// Ignore every fatal signal so fault handling cannot be re-entered.
pub fn silence_fatal() {
    for sig in FATAL_SIGNALS {
        // SAFETY: SIG_IGN installs no code.
        let _ = unsafe { signal::signal(sig, SigHandler::SigIgn) };
    }
}

/// Restore the default action for `sig`.
pub fn restore_default(sig: Signal) {
    // SAFETY: SIG_DFL installs no code.
    let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
}

/// Read the current disposition without changing it.
pub fn disposition(sig: Signal) -> Option<Disposition> {
    let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
    // SAFETY: a null new action only queries.
    let rc = unsafe { libc::sigaction(sig as c_int, std::ptr::null(), &mut old) };
    if rc != 0 {
        return None;
    }
    Some(match old.sa_sigaction {
        libc::SIG_DFL => Disposition::Default,
        libc::SIG_IGN => Disposition::Ignore,
        _ => Disposition::Handler,
    })
}

extern "C" fn handle_fatal_signal(signum: c_int) {
    let mut host = crate::dispatch::LiveHost::from_baked();
    crate::fault::on_signal(&mut host, signum)
}
