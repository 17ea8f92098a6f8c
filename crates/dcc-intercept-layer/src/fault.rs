//! Fault interception points.
//!
//! Each entry silences the fatal signals, publishes what it knows about the
//! fault and dispatches exactly once. The first fault to arrive wins: once the
//! signals are ignored a second fault cannot start another dispatch.

use libc::c_int;

use crate::dispatch::{explain_error, FaultHost};
use crate::relay::{DiagKey, Relay};
use crate::sanitizer::{SanitizerApi, UbReport};

/// The sanitizer detected a memory-safety error.
pub fn on_memory_error<H: FaultHost>(host: &mut H) -> ! {
    host.silence_fatal_signals();
    let report = host.sanitizer().memory_report().unwrap_or_default();
    host.relay().publish(DiagKey::AsanError, &report);
    explain_error(host)
}

/// The sanitizer detected undefined behavior.
pub fn on_undefined_behavior<H: FaultHost>(host: &mut H) -> ! {
    host.silence_fatal_signals();
    let report = host.sanitizer().ub_report();
    publish_ub_report(host.relay(), report.as_ref());
    explain_error(host)
}

/// Something asked for a backtrace, which only happens on the way down.
pub fn on_backtrace<H: FaultHost>(host: &mut H) -> ! {
    host.silence_fatal_signals();
    explain_error(host)
}

/// A fatal signal arrived.
pub fn on_signal<H: FaultHost>(host: &mut H, signum: c_int) -> ! {
    host.silence_fatal_signals();
    host.relay()
        .publish_fmt(DiagKey::Signal, format_args!("{}", signum));
    explain_error(host)
}

/// Without a report all six fields are still published, empty.
fn publish_ub_report<R: Relay>(relay: &mut R, report: Option<&UbReport>) {
    let Some(r) = report else {
        for key in DiagKey::UBSAN {
            relay.publish(key, "");
        }
        return;
    };
    relay.publish(DiagKey::UbsanKind, &r.kind);
    relay.publish(DiagKey::UbsanMessage, &r.message);
    relay.publish(DiagKey::UbsanFilename, &r.filename);
    relay.publish_fmt(DiagKey::UbsanLine, format_args!("{}", r.line));
    relay.publish_fmt(DiagKey::UbsanColumn, format_args!("{}", r.column));
    relay.publish(DiagKey::UbsanMemoryAddr, &r.memory_addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DiagnosticRecord;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Silence,
        Publish,
        Release,
        AllowAttach,
        Launch,
        Terminate,
    }

    /// Panic payload standing in for process death.
    struct Terminated;

    #[derive(Default)]
    struct FakeSanitizer {
        memory: Option<String>,
        ub: Option<UbReport>,
    }

    impl SanitizerApi for FakeSanitizer {
        fn memory_report(&self) -> Option<String> {
            self.memory.clone()
        }

        fn ub_report(&self) -> Option<UbReport> {
            self.ub.clone()
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        record: DiagnosticRecord,
        sanitizer: FakeSanitizer,
        steps: Vec<Step>,
    }

    impl FaultHost for RecordingHost {
        type Relay = DiagnosticRecord;
        type Sanitizer = FakeSanitizer;

        fn relay(&mut self) -> &mut DiagnosticRecord {
            self.steps.push(Step::Publish);
            &mut self.record
        }

        fn sanitizer(&self) -> &FakeSanitizer {
            &self.sanitizer
        }

        fn silence_fatal_signals(&mut self) {
            self.steps.push(Step::Silence);
        }

        fn release_descriptors(&mut self) {
            self.steps.push(Step::Release);
        }

        fn allow_debugger_attach(&mut self) {
            self.steps.push(Step::AllowAttach);
        }

        fn launch_tool(&mut self) {
            self.steps.push(Step::Launch);
        }

        fn terminate(&mut self) -> ! {
            self.steps.push(Step::Terminate);
            std::panic::panic_any(Terminated)
        }
    }

    /// Run a fault path to its (simulated) death.
    fn run_fault(host: &mut RecordingHost, fault: impl FnOnce(&mut RecordingHost)) {
        let result = catch_unwind(AssertUnwindSafe(|| fault(host)));
        let payload = result.err().expect("fault path returned");
        assert!(payload.is::<Terminated>());
    }

    fn assert_single_dispatch(steps: &[Step]) {
        assert_eq!(steps.first(), Some(&Step::Silence));
        assert_eq!(
            &steps[steps.len() - 4..],
            &[Step::Release, Step::AllowAttach, Step::Launch, Step::Terminate]
        );
        assert_eq!(steps.iter().filter(|s| **s == Step::Launch).count(), 1);
        assert_eq!(steps.iter().filter(|s| **s == Step::Silence).count(), 1);
    }

    #[test]
    fn test_signal_publishes_number() {
        let mut host = RecordingHost::default();
        run_fault(&mut host, |h| on_signal(h, 11));
        assert_eq!(host.record.get(DiagKey::Signal), Some("11"));
        assert_eq!(host.record.len(), 1);
        assert_single_dispatch(&host.steps);
    }

    #[test]
    fn test_ub_report_fields() {
        let mut host = RecordingHost {
            sanitizer: FakeSanitizer {
                ub: Some(UbReport {
                    kind: "X".to_string(),
                    message: "Y".to_string(),
                    filename: "f.c".to_string(),
                    line: 10,
                    column: 3,
                    memory_addr: "0x10".to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        run_fault(&mut host, |h| on_undefined_behavior(h));
        let r = &host.record;
        assert_eq!(r.get(DiagKey::UbsanKind), Some("X"));
        assert_eq!(r.get(DiagKey::UbsanMessage), Some("Y"));
        assert_eq!(r.get(DiagKey::UbsanFilename), Some("f.c"));
        assert_eq!(r.get(DiagKey::UbsanLine), Some("10"));
        assert_eq!(r.get(DiagKey::UbsanColumn), Some("3"));
        assert_eq!(r.get(DiagKey::UbsanMemoryAddr), Some("0x10"));
        assert_single_dispatch(&host.steps);
    }

    #[test]
    fn test_ub_without_runtime_publishes_empty_fields() {
        let mut host = RecordingHost::default();
        run_fault(&mut host, |h| on_undefined_behavior(h));
        assert_eq!(host.record.len(), 6);
        assert!(DiagKey::UBSAN
            .iter()
            .all(|k| host.record.get(*k) == Some("")));
    }

    #[test]
    fn test_memory_error_report_text() {
        let mut host = RecordingHost {
            sanitizer: FakeSanitizer {
                memory: Some("heap-buffer-overflow".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        run_fault(&mut host, |h| on_memory_error(h));
        assert_eq!(
            host.record.get(DiagKey::AsanError),
            Some("heap-buffer-overflow")
        );
        assert_single_dispatch(&host.steps);
    }

    #[test]
    fn test_memory_error_without_report_is_empty() {
        let mut host = RecordingHost::default();
        run_fault(&mut host, |h| on_memory_error(h));
        assert_eq!(host.record.get(DiagKey::AsanError), Some(""));
    }

    #[test]
    fn test_backtrace_publishes_nothing() {
        let mut host = RecordingHost::default();
        run_fault(&mut host, |h| on_backtrace(h));
        assert!(host.record.is_empty());
        assert_eq!(
            host.steps,
            vec![
                Step::Silence,
                Step::Release,
                Step::AllowAttach,
                Step::Launch,
                Step::Terminate
            ]
        );
    }
}
