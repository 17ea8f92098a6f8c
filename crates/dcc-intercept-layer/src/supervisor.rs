//! Dynamic-instrumentation supervisor.
//!
//! Valgrind cannot be linked in, so a program built for it relaunches itself
//! under Valgrind. `DCC_VALGRIND_RUNNING` in the environment marks the
//! relaunched child. Valgrind writes its errors into a pipe whose other end is
//! read by the diagnostic tool's watcher.

use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;

use dcc_config::{LayerConfig, Sanitizer};
use libc::c_char;
use nix::errno::Errno;

use crate::error::{LayerError, Result};
use crate::relay::{DiagKey, Relay};
use crate::tool;

/// How user code runs, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// An in-process sanitizer watches the program
    Native(Sanitizer),
    /// The program relaunches under Valgrind
    Supervised,
}

impl ExecutionMode {
    pub fn from_config(config: &LayerConfig) -> Self {
        if config.sanitizer.is_dynamic_instrumentation() {
            ExecutionMode::Supervised
        } else {
            ExecutionMode::Native(config.sanitizer)
        }
    }
}

/// Which side of the relaunch this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionRole {
    Supervisor,
    SupervisedChild,
}

impl SupervisionRole {
    /// Presence of the marker is what counts, not its value.
    pub fn detect(marker: Option<&OsStr>) -> Self {
        match marker {
            Some(_) => SupervisionRole::SupervisedChild,
            None => SupervisionRole::Supervisor,
        }
    }

    pub fn from_env() -> Self {
        Self::detect(std::env::var_os(DiagKey::ValgrindRunning.as_str()).as_deref())
    }
}

/// Valgrind command line for the relaunch, ready for `execvp`.
#[derive(Debug)]
pub struct RelaunchPlan {
    argv: Vec<CString>,
    // Points into `argv`; the CString buffers do not move with the Vec.
    ptrs: Vec<*const c_char>,
}

impl RelaunchPlan {
    /// Valgrind's fixed options (logging to `log_fd`), then the program's own arguments.
    pub fn new(config: &LayerConfig, log_fd: RawFd, args: &[OsString]) -> Result<Self> {
        let mut argv = Vec::with_capacity(args.len() + 11);
        for option in config.valgrind_command(log_fd) {
            argv.push(CString::new(option)?);
        }
        for arg in args {
            argv.push(CString::new(arg.as_bytes())?);
        }
        let ptrs = argv
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        Ok(Self { argv, ptrs })
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// NULL-terminated pointer array
    pub fn argv_ptrs(&self) -> &[*const c_char] {
        &self.ptrs
    }

    /// Replace this process with Valgrind. Only returns on failure.
    pub fn exec(&self) -> std::result::Result<Infallible, Errno> {
        dcc_debug!("running {:?}", self.argv);
        // SAFETY: `ptrs` is NULL-terminated and every entry points into `argv`.
        unsafe { libc::execvp(self.argv[0].as_ptr(), self.ptrs.as_ptr()) };
        Err(Errno::last())
    }
}

/// Why user main runs in this process instead of under Valgrind.
#[derive(Debug)]
pub enum DirectRun {
    /// Already running under Valgrind
    SupervisedChild,
    /// The error watcher could not be started
    ReceiverUnavailable(LayerError),
    /// Valgrind could not be executed
    RelaunchFailed(LayerError),
}

/// Relaunch under Valgrind, or say why user main should run directly.
///
/// Returns only when no relaunch happened.
pub fn supervise<R: Relay>(
    role: SupervisionRole,
    config: &LayerConfig,
    payload: &[u8],
    args: &[OsString],
    relay: &mut R,
) -> DirectRun {
    if role == SupervisionRole::SupervisedChild {
        return DirectRun::SupervisedChild;
    }

    let mut receiver = match tool::open_receiver(&config.tool, payload) {
        Ok(receiver) => receiver,
        Err(e) => return DirectRun::ReceiverUnavailable(e),
    };

    relay.publish(DiagKey::ValgrindRunning, "1");

    let failure = match RelaunchPlan::new(config, receiver.fd, args) {
        Ok(plan) => match plan.exec() {
            Ok(never) => match never {},
            Err(errno) => LayerError::Sys(errno),
        },
        Err(e) => e,
    };
    // Nobody will write to the watcher now; let it see EOF and reap it so it
    // does not linger as a zombie beside user main.
    let _ = nix::unistd::close(receiver.fd);
    if let Err(e) = receiver.child.wait() {
        dcc_debug!("watcher wait failed: {}", e);
    }
    DirectRun::RelaunchFailed(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DiagnosticRecord;
    use dcc_config::testing::TestEnvironment;
    use dcc_config::{EmbeddedTool, ToolConfig};
    use std::path::PathBuf;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_execution_mode() {
        let mut config = LayerConfig::default();
        assert_eq!(
            ExecutionMode::from_config(&config),
            ExecutionMode::Native(Sanitizer::Address)
        );
        config.sanitizer = Sanitizer::Valgrind;
        assert_eq!(ExecutionMode::from_config(&config), ExecutionMode::Supervised);
    }

    #[test]
    fn test_role_detection() {
        assert_eq!(SupervisionRole::detect(None), SupervisionRole::Supervisor);
        assert_eq!(
            SupervisionRole::detect(Some(OsStr::new("1"))),
            SupervisionRole::SupervisedChild
        );
        assert_eq!(
            SupervisionRole::detect(Some(OsStr::new(""))),
            SupervisionRole::SupervisedChild
        );
    }

    #[test]
    fn test_relaunch_argv_order() {
        let config = LayerConfig::default();
        let plan = RelaunchPlan::new(&config, 7, &args(&["./prog", "a", "b c"])).unwrap();
        let argv: Vec<&str> = plan.argv().iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            argv,
            vec![
                "/usr/bin/valgrind",
                "--log-fd=7",
                "-q",
                "--vgdb=yes",
                "--leak-check=no",
                "--suppressions=/dev/null",
                "--max-stackframe=16000000",
                "--partial-loads-ok=no",
                "--malloc-fill=0xbe",
                "--free-fill=0xbe",
                "--vgdb-error=1",
                "./prog",
                "a",
                "b c",
            ]
        );
        let ptrs = plan.argv_ptrs();
        assert_eq!(ptrs.len(), argv.len() + 1);
        assert!(ptrs[ptrs.len() - 1].is_null());
        assert!(ptrs[..ptrs.len() - 1].iter().all(|p| !p.is_null()));
    }

    #[test]
    fn test_relaunch_rejects_nul_argument() {
        let bad = vec![OsString::from("a\0b")];
        assert!(matches!(
            RelaunchPlan::new(&LayerConfig::default(), 3, &bad),
            Err(LayerError::Nul(_))
        ));
    }

    #[test]
    fn test_supervised_child_does_not_relaunch() {
        let mut record = DiagnosticRecord::new();
        let outcome = supervise(
            SupervisionRole::SupervisedChild,
            &LayerConfig::default(),
            &[],
            &args(&["./prog"]),
            &mut record,
        );
        assert!(matches!(outcome, DirectRun::SupervisedChild));
        assert!(record.is_empty());
    }

    #[test]
    fn test_receiver_failure_runs_directly() {
        let config = LayerConfig {
            sanitizer: Sanitizer::Valgrind,
            tool: ToolConfig::Embedded(EmbeddedTool {
                interpreter: "/nonexistent/python3".to_string(),
                ..EmbeddedTool::default()
            }),
            ..LayerConfig::default()
        };
        let mut record = DiagnosticRecord::new();
        let outcome = supervise(
            SupervisionRole::Supervisor,
            &config,
            b"archive",
            &args(&["./prog"]),
            &mut record,
        );
        assert!(matches!(outcome, DirectRun::ReceiverUnavailable(_)));
        assert!(!record.contains(DiagKey::ValgrindRunning));
    }

    #[test]
    fn test_missing_valgrind_runs_directly() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.layer_config();
        config.sanitizer = Sanitizer::Valgrind;
        config.valgrind.binary = PathBuf::from("/nonexistent/valgrind");
        let mut record = DiagnosticRecord::new();
        let outcome = supervise(
            SupervisionRole::Supervisor,
            &config,
            &[],
            &args(&["./prog"]),
            &mut record,
        );
        assert!(matches!(
            outcome,
            DirectRun::RelaunchFailed(LayerError::Sys(Errno::ENOENT))
        ));
        assert_eq!(record.get(DiagKey::ValgrindRunning), Some("1"));
    }
}
