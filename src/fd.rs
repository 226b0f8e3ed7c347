//! Virtual file-descriptor table: small guest-visible integers mapped onto
//! real host descriptors, gated by host-supplied filter callbacks.

use crate::error::Errno;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

const FIRST_VFD: i32 = 3;

pub type OpenFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;
pub type IoctlFilter = Box<dyn Fn(u64) -> bool + Send + Sync>;
pub type StatFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;
pub type WritePermit = Box<dyn Fn(i32) -> bool + Send + Sync>;

/// Virtual-fd ↔ real-fd translation table, with host policy applied before
/// any real syscall touches the filesystem.
pub struct FileDescriptors {
    table: HashMap<i32, RawFd>,
    next_vfd: i32,
    pub permit_filesystem: bool,
    filter_open: Option<OpenFilter>,
    filter_ioctl: Option<IoctlFilter>,
    filter_stat: Option<StatFilter>,
    permit_write: Option<WritePermit>,
}

impl Default for FileDescriptors {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FileDescriptors {
    pub fn new(permit_filesystem: bool) -> Self {
        Self {
            table: HashMap::new(),
            next_vfd: FIRST_VFD,
            permit_filesystem,
            filter_open: None,
            filter_ioctl: None,
            filter_stat: None,
            permit_write: None,
        }
    }

    pub fn set_filter_open(&mut self, f: OpenFilter) {
        self.filter_open = Some(f);
    }
    pub fn set_filter_ioctl(&mut self, f: IoctlFilter) {
        self.filter_ioctl = Some(f);
    }
    pub fn set_filter_stat(&mut self, f: StatFilter) {
        self.filter_stat = Some(f);
    }
    pub fn set_permit_write(&mut self, f: WritePermit) {
        self.permit_write = Some(f);
    }

    pub fn allows_open(&self, path: &str) -> bool {
        self.filter_open.as_ref().map_or(true, |f| f(path))
    }
    pub fn allows_ioctl(&self, request: u64) -> bool {
        self.filter_ioctl.as_ref().map_or(true, |f| f(request))
    }
    pub fn allows_stat(&self, path: &str) -> bool {
        self.filter_stat.as_ref().map_or(true, |f| f(path))
    }

    /// vfd 1 and 2 (stdout/stderr) are always writable; any higher vfd is
    /// gated by the host's `permit_write` callback (defaults to allow).
    pub fn allows_write(&self, vfd: i32) -> bool {
        if vfd == 1 || vfd == 2 {
            return true;
        }
        self.permit_write.as_ref().map_or(true, |f| f(vfd))
    }

    /// Record `real_fd`, assigning it the next sequential vfd (starting
    /// from 3; 0/1/2 are reserved for stdio and never allocated here).
    pub fn insert(&mut self, real_fd: RawFd) -> i32 {
        let vfd = self.next_vfd;
        self.next_vfd += 1;
        self.table.insert(vfd, real_fd);
        vfd
    }

    /// Translate a guest vfd to its real host fd. 0/1/2 pass through
    /// unchanged (stdio is never virtualized).
    pub fn translate(&self, vfd: i32) -> Result<RawFd, Errno> {
        if (0..3).contains(&vfd) {
            return Ok(vfd as RawFd);
        }
        self.table.get(&vfd).copied().ok_or(Errno::EBADF)
    }

    /// Close a vfd: 0/1/2 are silently accepted without touching the real
    /// descriptor table (the guest doesn't own stdio). Any other vfd is
    /// erased and its real fd closed.
    pub fn close(&mut self, vfd: i32) -> Result<(), Errno> {
        if (0..3).contains(&vfd) {
            return Ok(());
        }
        let real = self.table.remove(&vfd).ok_or(Errno::EBADF)?;
        unsafe {
            libc::close(real);
        }
        Ok(())
    }

    pub fn is_open(&self, vfd: i32) -> bool {
        (0..3).contains(&vfd) || self.table.contains_key(&vfd)
    }
}

impl Drop for FileDescriptors {
    fn drop(&mut self) {
        for (_, real) in self.table.drain() {
            unsafe {
                libc::close(real);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_fds_get_sequential_vfds_starting_at_three() {
        let mut fds = FileDescriptors::new(true);
        assert_eq!(fds.insert(100), 3);
        assert_eq!(fds.insert(101), 4);
    }

    #[test]
    fn stdio_vfds_translate_to_themselves_and_cannot_be_closed() {
        let mut fds = FileDescriptors::new(true);
        assert_eq!(fds.translate(0).unwrap(), 0);
        assert_eq!(fds.translate(1).unwrap(), 1);
        assert!(fds.close(1).is_ok());
        assert!(fds.is_open(1));
    }

    #[test]
    fn closing_an_unknown_vfd_is_ebadf() {
        let mut fds = FileDescriptors::new(true);
        assert_eq!(fds.close(99), Err(Errno::EBADF));
    }

    #[test]
    fn close_removes_vfd_from_translation_table() {
        let mut fds = FileDescriptors::new(true);
        let vfd = fds.insert(100);
        assert!(fds.is_open(vfd));
        fds.close(vfd).unwrap();
        assert!(!fds.is_open(vfd));
    }

    #[test]
    fn filter_open_gates_allows_open() {
        let mut fds = FileDescriptors::new(true);
        fds.set_filter_open(Box::new(|p| p.starts_with("/etc")));
        assert!(fds.allows_open("/etc/hostname"));
        assert!(!fds.allows_open("/root/secret"));
    }

    #[test]
    fn write_is_always_allowed_on_stdout_and_stderr() {
        let fds = FileDescriptors::new(true);
        assert!(fds.allows_write(1));
        assert!(fds.allows_write(2));
    }
}
