//! Zero-allocation stderr tracing.
//!
//! Fault paths run inside signal handlers and sanitizer callbacks, so log
//! lines are formatted into a stack buffer and written with a single raw
//! `write(2)`. `dcc_debug!` only prints when `DCC_DEBUG` was set at startup;
//! `dcc_warn!` always prints.

use std::ffi::CStr;
use std::fmt;

#[macro_export]
macro_rules! dcc_log_at_level {
    ($always:expr, $tag:expr, $($arg:tt)*) => {
        if $always
            || $crate::config::DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed)
        {
            $crate::macros::log_line($tag, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! dcc_debug { ($($arg:tt)*) => { $crate::dcc_log_at_level!(false, "DEBUG", $($arg)*) }; }
#[macro_export]
macro_rules! dcc_warn { ($($arg:tt)*) => { $crate::dcc_log_at_level!(true, "WARN", $($arg)*) }; }

#[doc(hidden)]
pub fn log_line(tag: &str, args: fmt::Arguments<'_>) {
    use std::fmt::Write;
    let mut buf = [0u8; 512];
    let mut writer = StackWriter::new(&mut buf);
    let pid = unsafe { libc::getpid() };
    let _ = write!(writer, "[dcc][{}][{}] ", pid, tag);
    let _ = writer.write_fmt(args);
    let _ = writeln!(writer);
    write_stderr(writer.as_str());
}

/// Raw write to fd 2, bypassing Rust's stderr lock.
pub fn write_stderr(msg: &str) {
    unsafe { libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len()) };
}

/// `fmt::Write` over a fixed buffer. Output that does not fit is truncated at
/// a character boundary.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    cap: usize,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let cap = buf.len();
        Self { buf, pos: 0, cap }
    }

    /// Writer that keeps the last byte free for a NUL terminator, see [`Self::as_c_str`].
    pub fn for_c_string(buf: &'a mut [u8]) -> Self {
        let cap = buf.len().saturating_sub(1);
        Self { buf, pos: 0, cap }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.pos]).unwrap_or("")
    }

    /// Terminate the contents and view them as a C string. Content after an
    /// embedded NUL is dropped.
    pub fn as_c_str(&mut self) -> &CStr {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = 0;
        }
        CStr::from_bytes_until_nul(&self.buf[..]).unwrap_or(c"")
    }
}

impl<'a> std::fmt::Write for StackWriter<'a> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let remaining = self.cap - self.pos;
        let mut to_copy = std::cmp::min(s.len(), remaining);
        while !s.is_char_boundary(to_copy) {
            to_copy -= 1;
        }
        self.buf[self.pos..self.pos + to_copy].copy_from_slice(&s.as_bytes()[..to_copy]);
        self.pos += to_copy;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    #[test]
    fn test_stack_writer_truncates() {
        let mut buf = [0u8; 8];
        let mut w = StackWriter::new(&mut buf);
        write!(w, "signal={}", 11).unwrap();
        assert_eq!(w.as_str(), "signal=1");
    }

    #[test]
    fn test_stack_writer_keeps_utf8_valid() {
        let mut buf = [0u8; 4];
        let mut w = StackWriter::new(&mut buf);
        w.write_str("ab→").unwrap();
        assert_eq!(w.as_str(), "ab");
    }

    #[test]
    fn test_c_string_writer_reserves_terminator() {
        let mut buf = [0xffu8; 6];
        let mut w = StackWriter::for_c_string(&mut buf);
        w.write_str("abcdefgh").unwrap();
        assert_eq!(w.as_c_str().to_bytes(), b"abcde");
    }

    #[test]
    fn test_c_string_writer_stops_at_embedded_nul() {
        let mut buf = [0u8; 16];
        let mut w = StackWriter::for_c_string(&mut buf);
        w.write_str("ab\0cd").unwrap();
        assert_eq!(w.as_c_str().to_bytes(), b"ab");
    }
}
