//! Explain-error dispatch: hand the faulting process to the diagnostic tool,
//! then make sure it dies.
//!
//! Every side effect goes through [`FaultHost`] so the fault logic can be
//! driven by a recording host in tests.

use dcc_config::LayerConfig;
#[cfg(target_os = "linux")]
use nix::errno::Errno;

use crate::relay::{EnvRelay, Relay};
use crate::sanitizer::{RuntimeSanitizer, SanitizerApi};
use crate::{config, escalate, signals, tool};

/// Everything a fault path is allowed to touch.
pub trait FaultHost {
    type Relay: Relay;
    type Sanitizer: SanitizerApi;

    fn relay(&mut self) -> &mut Self::Relay;
    fn sanitizer(&self) -> &Self::Sanitizer;

    /// Set every fatal signal to ignore.
    fn silence_fatal_signals(&mut self);
    /// Close descriptors so an exhausted process can still start the tool.
    fn release_descriptors(&mut self);
    /// Let the tool's debugger attach to this process.
    fn allow_debugger_attach(&mut self);
    /// Run the tool and wait for it. Failures are swallowed.
    fn launch_tool(&mut self);
    fn terminate(&mut self) -> !;
}

/// Dispatch once and never return.
pub fn explain_error<H: FaultHost>(host: &mut H) -> ! {
    host.release_descriptors();
    host.allow_debugger_attach();
    host.launch_tool();
    host.terminate()
}

/// The real process: environment relay, linked sanitizer runtime, real tool.
pub struct LiveHost<'a> {
    config: &'a LayerConfig,
    payload: &'a [u8],
    relay: EnvRelay,
    sanitizer: RuntimeSanitizer,
}

impl<'a> LiveHost<'a> {
    pub fn new(config: &'a LayerConfig, payload: &'a [u8]) -> Self {
        Self {
            config,
            payload,
            relay: EnvRelay,
            sanitizer: RuntimeSanitizer,
        }
    }
}

impl LiveHost<'static> {
    /// Host over the process-wide configuration and embedded archive.
    pub fn from_baked() -> Self {
        Self::new(config::get(), config::payload())
    }
}

/// Let any process ptrace this one (Yama). Process-wide, and stays in
/// effect for the rest of the process. `EINVAL` means Yama is not loaded.
#[cfg(target_os = "linux")]
pub fn allow_any_ptracer() -> nix::Result<()> {
    let unused: libc::c_ulong = 0;
    let rc = unsafe {
        libc::prctl(
            libc::PR_SET_PTRACER,
            libc::PR_SET_PTRACER_ANY,
            unused,
            unused,
            unused,
        )
    };
    Errno::result(rc).map(drop)
}

impl FaultHost for LiveHost<'_> {
    type Relay = EnvRelay;
    type Sanitizer = RuntimeSanitizer;

    fn relay(&mut self) -> &mut EnvRelay {
        &mut self.relay
    }

    fn sanitizer(&self) -> &RuntimeSanitizer {
        &self.sanitizer
    }

    fn silence_fatal_signals(&mut self) {
        signals::silence_fatal();
    }

    fn release_descriptors(&mut self) {
        let range = &self.config.dispatch;
        for fd in range.close_fds_from..range.close_fds_to {
            let _ = nix::unistd::close(fd);
        }
    }

    fn allow_debugger_attach(&mut self) {
        #[cfg(target_os = "linux")]
        if self.config.dispatch.allow_any_ptracer {
            if let Err(e) = allow_any_ptracer() {
                dcc_debug!("prctl(PR_SET_PTRACER) failed: {}", e);
            }
        }
    }

    fn launch_tool(&mut self) {
        match tool::run_explainer(&self.config.tool, self.payload) {
            Ok(status) => dcc_debug!("tool finished: {}", status),
            Err(e) => dcc_debug!("tool launch failed: {}", e),
        }
    }

    fn terminate(&mut self) -> ! {
        escalate::terminate()
    }
}
