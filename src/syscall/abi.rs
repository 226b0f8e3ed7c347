//! Guest-visible structure layouts, little-endian and packed exactly as the
//! RISC-V Linux ABI defines them.

/// `struct stat` translated to the RISC-V Linux layout (128 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RiscvStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub pad0: u64,
    pub size: i64,
    pub blksize: i32,
    pub pad1: i32,
    pub blocks: i64,
    pub atime_sec: i64,
    pub atime_nsec: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: u64,
    pub ctime_sec: i64,
    pub ctime_nsec: u64,
    pub pad2: u64,
}

const _: () = assert!(std::mem::size_of::<RiscvStat>() == 128);

impl From<libc::stat> for RiscvStat {
    fn from(st: libc::stat) -> Self {
        Self {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u32,
            uid: st.st_uid as u32,
            gid: st.st_gid as u32,
            rdev: st.st_rdev as u64,
            pad0: 0,
            size: st.st_size as i64,
            blksize: st.st_blksize as i32,
            pad1: 0,
            blocks: st.st_blocks as i64,
            atime_sec: st.st_atime as i64,
            atime_nsec: st.st_atime_nsec as u64,
            mtime_sec: st.st_mtime as i64,
            mtime_nsec: st.st_mtime_nsec as u64,
            ctime_sec: st.st_ctime as i64,
            ctime_nsec: st.st_ctime_nsec as u64,
            pad2: 0,
        }
    }
}

/// `rt_sigaction`'s third argument shape, addr-width fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelSigaction {
    pub sa_handler: u64,
    pub sa_flags: u64,
    pub sa_mask: u64,
}

/// One `struct iovec` as laid out in guest memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestIovec {
    pub iov_base: u64,
    pub iov_len: u64,
}

/// Native (RV64) 16-byte `timespec`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TimespecNative {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

/// RV32 `timespec`: two 32-bit fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TimespecCompat32 {
    pub tv_sec: i32,
    pub tv_nsec: i32,
}

/// `clock_gettime64`'s result shape regardless of guest width.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeGettime64 {
    pub tv_sec: i64,
    pub tv_msec: i64,
}

/// Guest `timeval` for `gettimeofday`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestTimeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

/// `sigaltstack`'s `stack_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestStackT {
    pub ss_sp: u64,
    pub ss_flags: u32,
    pub ss_size: u64,
}

/// `struct utsname`: six 65-byte fixed fields.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Utsname {
    pub sysname: [u8; 65],
    pub nodename: [u8; 65],
    pub release: [u8; 65],
    pub version: [u8; 65],
    pub machine: [u8; 65],
    pub domainname: [u8; 65],
}

impl Default for Utsname {
    fn default() -> Self {
        Self {
            sysname: [0; 65],
            nodename: [0; 65],
            release: [0; 65],
            version: [0; 65],
            machine: [0; 65],
            domainname: [0; 65],
        }
    }
}

pub fn fill_field(field: &mut [u8; 65], text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(64);
    field[..n].copy_from_slice(&bytes[..n]);
    field[n..].fill(0);
}
