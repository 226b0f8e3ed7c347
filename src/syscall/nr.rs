//! RISC-V Linux syscall numbers handled by [`super::dispatch`].

pub const EPOLL_CREATE1: u64 = 20;
pub const EPOLL_CTL: u64 = 21;
pub const EPOLL_PWAIT: u64 = 22;
pub const DUP: u64 = 23;
pub const FCNTL: u64 = 25;
pub const IOCTL: u64 = 29;
pub const FACCESSAT: u64 = 48;
pub const OPENAT: u64 = 56;
pub const CLOSE: u64 = 57;
pub const PIPE2: u64 = 59;
pub const LSEEK: u64 = 62;
pub const READ: u64 = 63;
pub const WRITE: u64 = 64;
pub const READV: u64 = 65;
pub const WRITEV: u64 = 66;
pub const PSELECT6: u64 = 72;
pub const PPOLL: u64 = 73;
pub const READLINKAT: u64 = 78;
pub const FSTATAT: u64 = 79;
pub const FSTAT: u64 = 80;
pub const EXIT: u64 = 93;
pub const EXIT_GROUP: u64 = 94;
pub const NANOSLEEP: u64 = 101;
pub const CLOCK_GETTIME: u64 = 113;
pub const CLOCK_NANOSLEEP: u64 = 115;
pub const SCHED_GETAFFINITY: u64 = 123;
pub const KILL: u64 = 129;
pub const TGKILL: u64 = 131;
pub const SIGALTSTACK: u64 = 132;
pub const RT_SIGACTION: u64 = 134;
pub const RT_SIGPROCMASK: u64 = 135;
pub const UNAME: u64 = 160;
pub const GETTIMEOFDAY: u64 = 169;
pub const GETPID: u64 = 172;
pub const GETUID: u64 = 174;
pub const GETEUID: u64 = 175;
pub const GETGID: u64 = 176;
pub const GETEGID: u64 = 177;
pub const BRK: u64 = 214;
pub const MSYNC: u64 = 227;
pub const GETRANDOM: u64 = 278;
pub const STATX: u64 = 291;
pub const CLOCK_GETTIME64: u64 = 403;

pub const EBREAK: u64 = 17;
