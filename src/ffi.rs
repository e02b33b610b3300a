//! Darwin symbols the probes need that `libc` does not bind.
//!
//! All of them live in libSystem, which every Darwin process links.

use std::os::raw::{c_char, c_int, c_void};

extern "C" {
    /// Number of images dyld currently has mapped.
    /// May change between calls as images load and unload.
    pub fn _dyld_image_count() -> u32;

    /// Path of image `image_index`, or null when the index is out of range.
    pub fn _dyld_get_image_name(image_index: u32) -> *const c_char;

    /// Fills `buffer` with the pids of all processes and returns how many
    /// were written. With a null buffer, returns the current count.
    pub fn proc_listallpids(buffer: *mut c_void, buffersize: c_int) -> c_int;

    /// Writes the short name of `pid` into `buffer`. Returns the length,
    /// or 0 on failure.
    pub fn proc_name(pid: c_int, buffer: *mut c_void, buffersize: u32) -> c_int;
}
