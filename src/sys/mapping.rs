//! Shared file-backed memory mappings.
//!
//! Every property area is a `MAP_SHARED` mapping of a regular file. The
//! writer process creates files read-write and labels them; every other
//! process maps them read-only for the lifetime of the process (or until
//! an access reset drops the handle).

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use crate::errors::InitError;

/// RAII handle to one shared mapping.
pub(crate) struct MapHandle {
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
}

// The mapping is shared memory by design; all concurrent access goes
// through atomics and raw copies governed by the seqlock protocol.
unsafe impl Send for MapHandle {}
unsafe impl Sync for MapHandle {}

impl MapHandle {
    /// Create (or truncate) `path` at `size` bytes, label it with
    /// `context` if given, and map it read-write.
    ///
    /// Returns the handle and whether the labeling step failed. Label
    /// failure is reported, not fatal; the caller decides what to do
    /// with it.
    pub(crate) fn create_rw(
        path: &Path,
        size: usize,
        context: Option<&str>,
    ) -> Result<(Self, bool), InitError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size as u64)?;

        let fsetxattr_failed = match context {
            Some(context) => !label_file(&file, context),
            None => false,
        };

        let handle = Self::map(&file, size, true)?;
        Ok((handle, fsetxattr_failed))
    }

    /// Map an existing area file read-only.
    pub(crate) fn open_ro(path: &Path) -> Result<Self, InitError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        Self::map(&file, len, false)
    }

    /// Map an existing area file read-write (writer process only).
    pub(crate) fn open_rw(path: &Path) -> Result<Self, InitError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        Self::map(&file, len, true)
    }

    fn map(file: &File, len: usize, writable: bool) -> Result<Self, InitError> {
        if len == 0 {
            return Err(InitError::InvalidArea("empty backing file"));
        }

        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(InitError::Io(std::io::Error::last_os_error()));
        }

        // mmap never returns null on success.
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or(InitError::InvalidArea("null mapping"))?;
        Ok(Self { ptr, len, writable })
    }

    /// Base address of the mapping.
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Whether stores through this mapping are permitted.
    #[inline]
    pub(crate) fn writable(&self) -> bool {
        self.writable
    }
}

impl Drop for MapHandle {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// Apply the security context label to a freshly created area file.
///
/// Returns `false` on failure. Unprivileged processes (and filesystems
/// without xattr support) routinely fail here; creation still proceeds.
#[cfg(target_os = "linux")]
fn label_file(file: &File, context: &str) -> bool {
    const SELINUX_XATTR: &[u8] = b"security.selinux\0";
    let rc = unsafe {
        libc::fsetxattr(
            file.as_raw_fd(),
            SELINUX_XATTR.as_ptr() as *const libc::c_char,
            context.as_ptr() as *const libc::c_void,
            context.len(),
            0,
        )
    };
    rc == 0
}

#[cfg(not(target_os = "linux"))]
fn label_file(_file: &File, _context: &str) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("area");

        let (rw, _labeled) = MapHandle::create_rw(&path, 4096, None).unwrap();
        assert!(rw.writable());
        assert_eq!(rw.len(), 4096);
        unsafe {
            *rw.as_ptr() = 0xAB;
        }
        drop(rw);

        let ro = MapHandle::open_ro(&path).unwrap();
        assert!(!ro.writable());
        assert_eq!(unsafe { *ro.as_ptr() }, 0xAB);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MapHandle::open_ro(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_open_empty_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();
        assert!(matches!(
            MapHandle::open_ro(&path),
            Err(InitError::InvalidArea(_))
        ));
    }
}
