//! libsqlite3 bindings.
//!
//! The raw API comes from `libsqlite3-sys` (bundled amalgamation); this
//! module adds the few safe helpers the driver needs on top of it.

pub use libsqlite3_sys::*;

use std::ffi::{CStr, c_int};

// `libsqlite3-sys`'s pre-generated bundled bindings omit this symbol even
// though the bundled amalgamation defines it.
unsafe extern "C" {
    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// SQLite library version as a number (`3XXYYZZ`).
pub fn version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { sqlite3_libversion_number() }
}

/// English description of a result code.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a pointer to a static string
    unsafe {
        let ptr = sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Last error message recorded on `db`.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn last_error_message(db: *mut sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg is never null for a valid db
    unsafe {
        let ptr = sqlite3_errmsg(db);
        if ptr.is_null() {
            return error_string(sqlite3_errcode(db)).to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(version().starts_with('3'));
        assert!(version_number() >= 3_000_000);
    }

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert_eq!(error_string(SQLITE_BUSY), "database is locked");
        assert_eq!(error_string(SQLITE_CONSTRAINT), "constraint failed");
    }
}
