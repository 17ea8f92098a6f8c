//! Exported symbols: the hooks the sanitizer runtimes, the unwinder and the
//! linker look for, plus the load-time constructor.

use libc::{c_char, c_int, c_void};

use crate::dispatch::LiveHost;
use crate::{config, entry, fault};

#[no_mangle]
pub extern "C" fn __asan_on_error() {
    fault::on_memory_error(&mut LiveHost::from_baked())
}

#[no_mangle]
pub extern "C" fn __ubsan_on_report() {
    fault::on_undefined_behavior(&mut LiveHost::from_baked())
}

/// Only reached when something is unwinding out of a failure.
#[no_mangle]
pub extern "C" fn _Unwind_Backtrace(_trace: *mut c_void, _arg: *mut c_void) -> c_int {
    fault::on_backtrace(&mut LiveHost::from_baked())
}

#[no_mangle]
pub extern "C" fn __asan_default_options() -> *const c_char {
    config::ASAN_DEFAULT_OPTIONS.as_ptr().cast()
}

#[no_mangle]
pub extern "C" fn __msan_default_options() -> *const c_char {
    config::MSAN_DEFAULT_OPTIONS.as_ptr().cast()
}

#[no_mangle]
pub extern "C" fn __ubsan_default_options() -> *const c_char {
    config::UBSAN_DEFAULT_OPTIONS.as_ptr().cast()
}

#[cfg(all(feature = "wrap-main", feature = "ifdef-main"))]
compile_error!("features `wrap-main` and `ifdef-main` both replace main; enable one");

#[cfg(any(feature = "wrap-main", feature = "ifdef-main"))]
extern "C" {
    fn __real_main(argc: c_int, argv: *mut *mut c_char, envp: *mut *mut c_char) -> c_int;
}

/// Replaces `main` when the program is linked with `-Wl,--wrap=main`.
#[cfg(feature = "wrap-main")]
#[no_mangle]
pub unsafe extern "C" fn __wrap_main(
    argc: c_int,
    argv: *mut *mut c_char,
    envp: *mut *mut c_char,
) -> c_int {
    entry::run_main(argc, argv, envp, __real_main)
}

/// Is `main` when the program was compiled with `-Dmain=__real_main`.
#[cfg(feature = "ifdef-main")]
#[no_mangle]
pub unsafe extern "C" fn main(
    argc: c_int,
    argv: *mut *mut c_char,
    envp: *mut *mut c_char,
) -> c_int {
    entry::run_main(argc, argv, envp, __real_main)
}

/// Called when the program is loaded
#[used]
#[cfg(not(test))]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        entry::startup(cfg!(any(feature = "wrap-main", feature = "ifdef-main")));
    }
    init
};
