//! Termination escalator: the process must die, preferably quietly.
//!
//! SIGPIPE comes first because shells do not print a message for it. Each
//! later rung only runs if the previous one did not take effect.

use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;

use crate::signals;

/// One step of the termination ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    /// Restore default SIGPIPE, send it to self
    BrokenPipe,
    /// Restore default SIGINT, send it to self
    Interrupt,
    /// SIGKILL to self
    Kill,
    /// `_exit(1)`
    Exit,
}

pub const LADDER: [Rung; 4] = [Rung::BrokenPipe, Rung::Interrupt, Rung::Kill, Rung::Exit];

impl Rung {
    /// Signal this rung raises, if any.
    pub fn signal(self) -> Option<Signal> {
        match self {
            Rung::BrokenPipe => Some(Signal::SIGPIPE),
            Rung::Interrupt => Some(Signal::SIGINT),
            Rung::Kill => Some(Signal::SIGKILL),
            Rung::Exit => None,
        }
    }

    fn restores_default(self) -> bool {
        matches!(self, Rung::BrokenPipe | Rung::Interrupt)
    }
}

/// Walk the ladder until the process is gone.
pub fn terminate() -> ! {
    let me = getpid();
    for rung in LADDER {
        dcc_debug!("terminating: {:?}", rung);
        match rung.signal() {
            Some(sig) => {
                if rung.restores_default() {
                    signals::restore_default(sig);
                }
                let _ = kill(me, sig);
            }
            None => break,
        }
    }
    unsafe { libc::_exit(1) }
}
