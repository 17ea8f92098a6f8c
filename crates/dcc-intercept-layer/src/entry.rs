//! Process entry: the load-time constructor and the wrapper around user main.

use std::ffi::{CStr, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use dcc_config::LayerConfig;
use libc::{c_char, c_int};
use nix::sys::signal::Signal;

use crate::identity::ProcessIdentity;
use crate::relay::{DiagKey, EnvRelay, Relay};
use crate::supervisor::{self, DirectRun, ExecutionMode, SupervisionRole};
use crate::{config, poison, signals};

/// Signature of the program's real `main`.
pub type MainFn = unsafe extern "C" fn(c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;

/// Load-time setup, before user main.
///
/// Without a main wrapper there is no `argv`, so the binary is taken from the
/// running executable and the stack is poisoned here.
pub fn startup(wrapped_main: bool) {
    // SAFETY: runs before user code can modify the environment.
    unsafe { config::init_logger() };
    let config = config::get();
    let mut relay = EnvRelay;
    relay.publish(DiagKey::Sanitizer, config.sanitizer.as_str());
    relay.publish(DiagKey::ToolPath, &config.tool_path_value());

    let identity = ProcessIdentity::resolve(None);
    identity.publish_pid(&mut relay);
    signals::install_fatal_handler();

    if !wrapped_main {
        identity.publish_binary(&mut relay);
        if config.poison_enabled() {
            poison::poison_stack(config.poison.byte);
        }
    }
}

/// Run user main under the layer: publish identity, relaunch under Valgrind
/// when supervised, otherwise run it here.
///
/// # Safety
/// `argv` must hold `argc` valid C strings, as passed to `main`.
pub unsafe fn run_main(
    argc: c_int,
    argv: *mut *mut c_char,
    envp: *mut *mut c_char,
    real_main: MainFn,
) -> c_int {
    let args = collect_args(argc, argv);
    let config = config::get();
    let mut relay = EnvRelay;
    ProcessIdentity::resolve(args.first().map(OsString::as_os_str)).publish_binary(&mut relay);

    if ExecutionMode::from_config(config) == ExecutionMode::Supervised {
        let role = SupervisionRole::from_env();
        match supervisor::supervise(role, config, config::payload(), &args, &mut relay) {
            DirectRun::SupervisedChild => prepare_supervised_child(),
            DirectRun::ReceiverUnavailable(e) | DirectRun::RelaunchFailed(e) => {
                dcc_debug!("running without valgrind: {}", e);
            }
        }
    }
    enter_main(config, argc, argv, envp, real_main)
}

/// Copy `argv` out of C memory. A NULL entry ends the list early.
///
/// # Safety
/// `argv` must hold `argc` pointers, each NULL or a valid C string.
pub unsafe fn collect_args(argc: c_int, argv: *const *mut c_char) -> Vec<OsString> {
    if argv.is_null() {
        return Vec::new();
    }
    let count = usize::try_from(argc).unwrap_or(0);
    (0..count)
        .map(|i| *argv.add(i))
        .take_while(|p| !p.is_null())
        .map(|p| OsStr::from_bytes(CStr::from_ptr(p).to_bytes()).to_os_string())
        .collect()
}

/// Valgrind interleaves its reports with program output; keep the order.
fn prepare_supervised_child() {
    unbuffer_stdout();
    signals::restore_default(Signal::SIGPIPE);
}

#[cfg(target_os = "linux")]
fn unbuffer_stdout() {
    extern "C" {
        static mut stdout: *mut libc::FILE;
    }
    // SAFETY: nothing has been written to stdout yet.
    unsafe { libc::setvbuf(stdout, std::ptr::null_mut(), libc::_IONBF, 0) };
}

#[cfg(target_os = "macos")]
fn unbuffer_stdout() {
    extern "C" {
        static mut __stdoutp: *mut libc::FILE;
    }
    // SAFETY: nothing has been written to stdout yet.
    unsafe { libc::setvbuf(__stdoutp, std::ptr::null_mut(), libc::_IONBF, 0) };
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn unbuffer_stdout() {}

/// Separate frame so user main reuses the poisoned stack.
#[inline(never)]
unsafe fn enter_main(
    config: &LayerConfig,
    argc: c_int,
    argv: *mut *mut c_char,
    envp: *mut *mut c_char,
    real_main: MainFn,
) -> c_int {
    if config.poison_enabled() {
        poison::poison_stack(config.poison.byte);
    }
    real_main(argc, argv, envp)
}
