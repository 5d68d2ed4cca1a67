//! Reading argument buffers out of a notifying process.
//!
//! Pointers in a [`Request`](super::Request)'s arguments refer to the caller's
//! address space. These helpers read them through `/proc/<pid>/mem`, which
//! works for any descendant of the supervisor.
//!
//! The caller can rewrite its memory (from another thread) at any time, and the
//! call may be interrupted mid-read. After reading, check
//! [`Listener::id_valid`](super::Listener::id_valid) before trusting the data.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Upper bound on a single read.
pub const MAX_READ: usize = 4096;

/// Read up to `len` bytes at `addr` in the memory of `pid`.
///
/// Returns fewer bytes than requested only if the mapping ends first.
pub fn read_child_bytes(pid: u32, addr: u64, len: usize) -> io::Result<Vec<u8>> {
    if len > MAX_READ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("read of {len} bytes exceeds {MAX_READ}"),
        ));
    }

    let mem_path = format!("/proc/{pid}/mem");
    let mut file = File::open(&mem_path)?;
    file.seek(SeekFrom::Start(addr))?;

    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if filled > 0 => {
                tracing::trace!(pid, addr, filled, error = %e, "short read from child memory");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Read a null-terminated string at `addr` in the memory of `pid`.
pub fn read_child_string(pid: u32, addr: u64) -> io::Result<String> {
    let mut buf = read_child_bytes(pid, addr, MAX_READ)?;

    // Find null terminator
    if let Some(nul_pos) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul_pos);
    }

    String::from_utf8(buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid UTF-8 in string"))
}
