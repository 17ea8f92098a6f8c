//! Stack poisoning.
//!
//! Fills a large region of stack with a sentinel byte so that later reads of
//! uninitialized locals surface as `0xbebebebe` instead of leftover data.
//! Conflicts with the sanitizer's use-after-return detection; callers check
//! `LayerConfig::poison_enabled` first.

use std::mem::MaybeUninit;

pub const POISON_REGION_BYTES: usize = 4_096_000;

/// Poison the stack below the caller's frame.
///
/// Must stay out of line: the region has to live in a frame the next call
/// from the caller will reuse.
#[inline(never)]
#[allow(clippy::large_stack_arrays, clippy::large_stack_frames)]
pub fn poison_stack(byte: u8) {
    let mut region = MaybeUninit::<[u8; POISON_REGION_BYTES]>::uninit();
    let start = region.as_mut_ptr().cast::<u8>();
    // SAFETY: `start` points at POISON_REGION_BYTES writable bytes owned by this frame.
    unsafe { fill_region(start, POISON_REGION_BYTES, byte) };
    std::hint::black_box(&region);
    dcc_debug!(
        "initialized {:p} to {:p}",
        start,
        start.wrapping_add(POISON_REGION_BYTES)
    );
}

/// Out-of-line fill; the `black_box` keeps the stores from being treated as dead.
///
/// # Safety
/// `start` must be valid for `len` byte writes.
#[inline(never)]
pub unsafe fn fill_region(start: *mut u8, len: usize, byte: u8) {
    std::ptr::write_bytes(start, byte, len);
    std::hint::black_box(start);
}
