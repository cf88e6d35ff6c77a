//! UTF-16 string helpers for Windows API calls.

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use windows::core::PCWSTR;

/// Null-terminated UTF-16 copy of `s`. Embedded nulls are kept, so a
/// null-separated list stays intact.
#[inline]
pub(super) fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

#[inline]
pub(super) fn to_wide_opt(s: Option<&str>) -> Option<Vec<u16>> {
    s.map(to_wide)
}

/// Borrow an optional wide buffer as a possibly-null `PCWSTR`.
#[inline]
pub(super) fn pcwstr(buf: &Option<Vec<u16>>) -> PCWSTR {
    match buf {
        Some(b) => PCWSTR(b.as_ptr()),
        None => PCWSTR::null(),
    }
}

/// Decode a UTF-16 buffer up to its first null.
pub(super) fn from_wide(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}
