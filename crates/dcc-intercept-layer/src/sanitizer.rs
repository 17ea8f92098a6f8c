//! Access to the sanitizer runtime's report API.
//!
//! The report functions only exist when the program was linked with a
//! sanitizer runtime that provides them, so they are looked up with `dlsym`
//! at fault time. A symbol that does not resolve is a missing capability, not
//! an error.

use libc::{c_char, c_int, c_uint, c_void};
use std::ffi::CStr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lazily resolved sanitizer runtime function
pub struct RuntimeSymbol {
    ptr: AtomicPtr<c_void>,
    name: &'static CStr,
}

impl RuntimeSymbol {
    pub const fn new(name: &'static CStr) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    pub fn name(&self) -> &'static CStr {
        self.name
    }

    /// Address of the symbol, or null when the runtime does not provide it.
    pub unsafe fn get(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = libc::dlsym(libc::RTLD_DEFAULT, self.name.as_ptr());
        self.ptr.store(f, Ordering::Release);
        f
    }
}

pub static ASAN_REPORT_PRESENT: RuntimeSymbol = RuntimeSymbol::new(c"__asan_report_present");
pub static ASAN_GET_REPORT_DESCRIPTION: RuntimeSymbol =
    RuntimeSymbol::new(c"__asan_get_report_description");
pub static UBSAN_GET_CURRENT_REPORT_DATA: RuntimeSymbol =
    RuntimeSymbol::new(c"__ubsan_get_current_report_data");

type AsanReportPresentFn = unsafe extern "C" fn() -> c_int;
type AsanGetReportDescriptionFn = unsafe extern "C" fn() -> *const c_char;
type UbsanGetCurrentReportDataFn = unsafe extern "C" fn(
    *mut *const c_char,
    *mut *const c_char,
    *mut *const c_char,
    *mut c_uint,
    *mut c_uint,
    *mut *mut c_char,
);

/// Structured undefined-behavior report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UbReport {
    pub kind: String,
    pub message: String,
    pub filename: String,
    pub line: u32,
    pub column: u32,
    /// Faulting address formatted as `0x..`, empty when the runtime gave none
    pub memory_addr: String,
}

/// What the in-process sanitizer can tell us about the current error.
pub trait SanitizerApi {
    /// Human-readable memory-safety report, if the runtime has one.
    fn memory_report(&self) -> Option<String>;

    /// Structured undefined-behavior report, if the runtime supports it.
    fn ub_report(&self) -> Option<UbReport>;
}

/// The sanitizer runtime linked into this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeSanitizer;

impl SanitizerApi for RuntimeSanitizer {
    fn memory_report(&self) -> Option<String> {
        unsafe {
            let present = ASAN_REPORT_PRESENT.get();
            let describe = ASAN_GET_REPORT_DESCRIPTION.get();
            if present.is_null() || describe.is_null() {
                return None;
            }
            let present = std::mem::transmute::<*mut c_void, AsanReportPresentFn>(present);
            let describe = std::mem::transmute::<*mut c_void, AsanGetReportDescriptionFn>(describe);
            if present() == 0 {
                return None;
            }
            Some(lossy(describe()))
        }
    }

    fn ub_report(&self) -> Option<UbReport> {
        unsafe {
            let f = UBSAN_GET_CURRENT_REPORT_DATA.get();
            if f.is_null() {
                return None;
            }
            let f = std::mem::transmute::<*mut c_void, UbsanGetCurrentReportDataFn>(f);
            let mut kind: *const c_char = std::ptr::null();
            let mut message: *const c_char = std::ptr::null();
            let mut filename: *const c_char = std::ptr::null();
            let mut line: c_uint = 0;
            let mut column: c_uint = 0;
            let mut addr: *mut c_char = std::ptr::null_mut();
            f(
                &mut kind,
                &mut message,
                &mut filename,
                &mut line,
                &mut column,
                &mut addr,
            );
            Some(UbReport {
                kind: lossy(kind),
                message: lossy(message),
                filename: lossy(filename),
                line,
                column,
                memory_addr: format_addr(addr as usize),
            })
        }
    }
}

/// Copy a runtime-owned C string; null reads as empty.
unsafe fn lossy(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        CStr::from_ptr(p).to_string_lossy().into_owned()
    }
}

/// The runtime hands the address back as a pointer value, not a string.
fn format_addr(addr: usize) -> String {
    if addr == 0 {
        String::new()
    } else {
        format!("{:#x}", addr)
    }
}
