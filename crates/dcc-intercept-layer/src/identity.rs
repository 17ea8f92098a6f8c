use std::ffi::OsStr;
use std::path::PathBuf;

use nix::unistd::{getpid, Pid};

use crate::relay::{DiagKey, Relay};

/// Absolute binary path and pid, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub binary: PathBuf,
    pub pid: Pid,
}

impl ProcessIdentity {
    /// Resolve from `argv[0]`. Falls back to the running executable, then to
    /// an empty path; never fails.
    pub fn resolve(argv0: Option<&OsStr>) -> Self {
        Self {
            binary: resolve_binary(argv0),
            pid: getpid(),
        }
    }

    pub fn publish_binary<R: Relay>(&self, relay: &mut R) {
        relay.publish(DiagKey::Binary, &self.binary.to_string_lossy());
    }

    pub fn publish_pid<R: Relay>(&self, relay: &mut R) {
        relay.publish_fmt(DiagKey::Pid, format_args!("{}", self.pid));
    }
}

fn resolve_binary(argv0: Option<&OsStr>) -> PathBuf {
    argv0
        .filter(|a| !a.is_empty())
        .and_then(|a| std::fs::canonicalize(a).ok())
        .or_else(|| std::env::current_exe().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DiagnosticRecord;

    #[test]
    fn test_resolve_absolute_argv0() {
        let id = ProcessIdentity::resolve(Some(OsStr::new("/bin/sh")));
        assert!(id.binary.is_absolute());
        assert_eq!(id.pid, getpid());
    }

    #[test]
    fn test_unresolvable_argv0_falls_back() {
        let id = ProcessIdentity::resolve(Some(OsStr::new("/definitely/not/here/prog")));
        assert_eq!(id.binary, std::env::current_exe().unwrap());

        let id = ProcessIdentity::resolve(None);
        assert_eq!(id.binary, std::env::current_exe().unwrap());
    }

    #[test]
    fn test_publish_identity() {
        let id = ProcessIdentity {
            binary: PathBuf::from("/home/student/a.out"),
            pid: Pid::from_raw(4242),
        };
        let mut record = DiagnosticRecord::new();
        id.publish_binary(&mut record);
        id.publish_pid(&mut record);
        assert_eq!(record.get(DiagKey::Binary), Some("/home/student/a.out"));
        assert_eq!(record.get(DiagKey::Pid), Some("4242"));
    }
}
