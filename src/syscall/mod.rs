//! Linux syscall emulation: dispatch by RISC-V syscall number (`a7`), with
//! arguments in `a0..a5` and the result written back to `a0`.

pub mod abi;
pub mod nr;

use crate::error::{Errno, MachineError, Result};
use crate::memory::GuestSpan;
use crate::{Machine, Width};
use abi::*;
use std::io::Write as _;
use std::os::unix::io::RawFd;

const MAX_READ: usize = 16 << 20;
const MAX_GATHER_SPANS: usize = 256;
const MAX_READLINK: usize = 16 << 10;
const MAX_GETRANDOM: usize = 256;
const MAX_IOVECS_READV: usize = 128;
const MAX_IOVECS_WRITEV: usize = 256;

/// Run the syscall named by `machine.cpu.a(7)`, writing its result to `a0`.
/// Returns `Err` only for conditions fatal to the run (an explicit `ebreak`
/// trap, or a guest-memory fault); every other failure is folded into `a0`
/// as a negative errno and this returns `Ok(())`.
pub fn dispatch(machine: &mut Machine) -> Result<()> {
    let number = machine.cpu.a(7);
    log::trace!("ecall a7={number}");
    let result = match number {
        nr::EBREAK => return Err(MachineError::UnhandledSyscall("EBREAK instruction")),
        nr::EPOLL_CREATE1 | nr::EPOLL_CTL | nr::EPOLL_PWAIT => Err(Errno::ENOSYS),
        nr::PSELECT6 => Err(Errno::ENOSYS),
        nr::PPOLL => Err(Errno::ENOSYS),
        nr::DUP => sys_dup(machine),
        nr::FCNTL => sys_fcntl(machine),
        nr::IOCTL => sys_ioctl(machine),
        nr::FACCESSAT => sys_faccessat(machine),
        nr::OPENAT => sys_openat(machine),
        nr::CLOSE => sys_close(machine),
        nr::PIPE2 => sys_pipe2(machine)?,
        nr::LSEEK => sys_lseek(machine),
        nr::READ => sys_read(machine)?,
        nr::WRITE => sys_write(machine)?,
        nr::READV => sys_readv(machine)?,
        nr::WRITEV => sys_writev(machine)?,
        nr::READLINKAT => sys_readlinkat(machine)?,
        nr::FSTATAT => sys_fstatat(machine)?,
        nr::FSTAT => sys_fstat(machine)?,
        nr::EXIT | nr::EXIT_GROUP => {
            machine.stop();
            Ok(machine.cpu.a(0) as i64)
        }
        nr::NANOSLEEP => sys_nanosleep(machine)?,
        nr::CLOCK_GETTIME => sys_clock_gettime(machine)?,
        nr::CLOCK_NANOSLEEP => sys_clock_nanosleep(machine)?,
        nr::SCHED_GETAFFINITY => Err(Errno::ENOSYS),
        nr::KILL | nr::TGKILL => sys_kill(machine)?,
        nr::SIGALTSTACK => sys_sigaltstack(machine)?,
        nr::RT_SIGACTION => sys_rt_sigaction(machine)?,
        nr::RT_SIGPROCMASK => sys_rt_sigprocmask(machine)?,
        nr::UNAME => sys_uname(machine)?,
        nr::GETTIMEOFDAY => sys_gettimeofday(machine)?,
        nr::GETPID | nr::GETUID | nr::GETEUID | nr::GETGID | nr::GETEGID => Ok(0),
        nr::BRK => Ok(sys_brk(machine) as i64),
        nr::MSYNC => Ok(0),
        nr::GETRANDOM => sys_getrandom(machine)?,
        nr::STATX => sys_statx(machine)?,
        nr::CLOCK_GETTIME64 => sys_clock_gettime64(machine)?,
        _ => Err(Errno::ENOSYS),
    };

    let a0 = match result {
        Ok(value) => value,
        Err(errno) => errno.as_a0(),
    };
    machine.cpu.set_a0(a0);
    Ok(())
}

fn errno_result(rc: libc::c_long) -> std::result::Result<i64, Errno> {
    if rc < 0 {
        Err(Errno::from_last_os_error())
    } else {
        Ok(rc as i64)
    }
}

fn read_path(machine: &mut Machine, addr: u64) -> Result<String> {
    machine.memory.memstring(addr)
}

fn sys_dup(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let vfd = machine.cpu.a(0) as i32;
    let real = machine.fds.translate(vfd)?;
    let new_real = unsafe { libc::dup(real) };
    if new_real < 0 {
        return Err(Errno::from_last_os_error());
    }
    Ok(machine.fds.insert(new_real) as i64)
}

fn sys_fcntl(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let vfd = machine.cpu.a(0) as i32;
    let cmd = machine.cpu.a(1) as libc::c_int;
    let arg = machine.cpu.a(2);
    let real = machine.fds.translate(vfd)?;
    let rc = unsafe { libc::fcntl(real, cmd, arg) };
    errno_result(rc as libc::c_long)
}

fn sys_ioctl(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let vfd = machine.cpu.a(0) as i32;
    let request = machine.cpu.a(1);
    if !machine.fds.allows_ioctl(request) {
        log::warn!("ioctl request {request:#x} denied by filter");
        return Err(Errno::EPERM);
    }
    let real = machine.fds.translate(vfd)?;
    let arg = machine.cpu.a(2);
    let rc = unsafe { libc::ioctl(real, request as _, arg) };
    errno_result(rc as libc::c_long)
}

fn sys_faccessat(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let path = read_path(machine, machine.cpu.a(1)).map_err(|_| Errno::EFAULT)?;
    let mode = machine.cpu.a(2) as libc::c_int;
    let flags = machine.cpu.a(3) as libc::c_int;
    let cpath = std::ffi::CString::new(path).map_err(|_| Errno::EINVAL)?;
    let rc = unsafe { libc::faccessat(libc::AT_FDCWD, cpath.as_ptr(), mode, flags) };
    errno_result(rc as libc::c_long)
}

fn sys_openat(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let path = read_path(machine, machine.cpu.a(1)).map_err(|_| Errno::EFAULT)?;
    if !machine.fds.allows_open(&path) {
        log::warn!("open of {path:?} denied by filter");
        return Err(Errno::EPERM);
    }
    let flags = machine.cpu.a(2) as libc::c_int;
    let mode = machine.cpu.a(3) as libc::mode_t;
    let cpath = std::ffi::CString::new(path).map_err(|_| Errno::EINVAL)?;
    let real = unsafe { libc::openat(libc::AT_FDCWD, cpath.as_ptr(), flags, mode) };
    if real < 0 {
        return Err(Errno::from_last_os_error());
    }
    Ok(machine.fds.insert(real) as i64)
}

fn sys_close(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let vfd = machine.cpu.a(0) as i32;
    machine.fds.close(vfd)?;
    Ok(0)
}

fn sys_pipe2(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let addr = machine.cpu.a(0);
    let flags = machine.cpu.a(1) as libc::c_int;
    let mut raw: [libc::c_int; 2] = [0; 2];
    let rc = unsafe { libc::pipe2(raw.as_mut_ptr(), flags) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    let vfds = [machine.fds.insert(raw[0]), machine.fds.insert(raw[1])];
    machine.memory.copy_to_guest(addr, &vfds)?;
    Ok(Ok(0))
}

fn sys_lseek(machine: &mut Machine) -> std::result::Result<i64, Errno> {
    let vfd = machine.cpu.a(0) as i32;
    let offset = machine.cpu.a(1) as libc::off_t;
    let whence = machine.cpu.a(2) as libc::c_int;
    let real = machine.fds.translate(vfd)?;
    let rc = unsafe { libc::lseek(real, offset, whence) };
    errno_result(rc as libc::c_long)
}

fn sys_read(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let vfd = machine.cpu.a(0) as i32;
    let buf_addr = machine.cpu.a(1);
    let count = (machine.cpu.a(2) as usize).min(MAX_READ);

    if vfd == 0 {
        let mut buf = vec![0u8; count];
        let n = match machine.stdin_read(&mut buf) {
            Ok(n) => n,
            Err(e) => return Ok(Err(Errno(-(e.raw_os_error().unwrap_or(libc::EIO)) as i64))),
        };
        machine.memory.memcpy(buf_addr, &buf[..n])?;
        return Ok(Ok(n as i64));
    }

    let real = match machine.fds.translate(vfd) {
        Ok(r) => r,
        Err(e) => return Ok(Err(e)),
    };
    let mut spans = Vec::new();
    machine.memory.gather_buffers_from_range(&mut spans, buf_addr, count, true, MAX_GATHER_SPANS)?;
    let mut iov = to_iovec(&spans);
    let rc = unsafe { libc::readv(real, iov.as_mut_ptr(), iov.len() as libc::c_int) };
    Ok(errno_result(rc as libc::c_long))
}

fn sys_write(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let vfd = machine.cpu.a(0) as i32;
    let buf_addr = machine.cpu.a(1);
    let count = machine.cpu.a(2) as usize;

    let mut spans = Vec::new();
    machine.memory.gather_buffers_from_range(&mut spans, buf_addr, count, false, MAX_GATHER_SPANS)?;

    if vfd == 1 || vfd == 2 {
        let mut total = 0usize;
        let mut stream: Box<dyn std::io::Write> =
            if vfd == 1 { Box::new(std::io::stdout()) } else { Box::new(std::io::stderr()) };
        for span in &spans {
            let bytes = unsafe { std::slice::from_raw_parts(span.ptr, span.len) };
            let _ = stream.write_all(bytes);
            total += span.len;
        }
        return Ok(Ok(total as i64));
    }

    if !machine.fds.allows_write(vfd) {
        return Ok(Err(Errno::EBADF));
    }
    let real = match machine.fds.translate(vfd) {
        Ok(r) => r,
        Err(e) => return Ok(Err(e)),
    };
    let iov = to_iovec(&spans);
    let rc = unsafe { libc::writev(real, iov.as_ptr(), iov.len() as libc::c_int) };
    Ok(errno_result(rc as libc::c_long))
}

fn to_iovec(spans: &[GuestSpan]) -> Vec<libc::iovec> {
    spans
        .iter()
        .map(|s| libc::iovec { iov_base: s.ptr as *mut libc::c_void, iov_len: s.len })
        .collect()
}

fn sys_readv(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let vfd = machine.cpu.a(0) as i32;
    let iov_addr = machine.cpu.a(1);
    let count = (machine.cpu.a(2) as usize).clamp(1, MAX_IOVECS_READV);

    let real = match machine.fds.translate(vfd) {
        Ok(r) => r,
        Err(e) => return Ok(Err(e)),
    };

    let mut all_spans = Vec::new();
    for i in 0..count {
        let guest_iov: GuestIovec = machine.memory.copy_from_guest(iov_addr + (i * 16) as u64)?;
        let mut spans = Vec::new();
        machine.memory.gather_buffers_from_range(
            &mut spans,
            guest_iov.iov_base,
            guest_iov.iov_len as usize,
            true,
            MAX_GATHER_SPANS,
        )?;
        all_spans.extend(spans);
    }
    let mut iov = to_iovec(&all_spans);
    let rc = unsafe { libc::readv(real, iov.as_mut_ptr(), iov.len() as libc::c_int) };
    Ok(errno_result(rc as libc::c_long))
}

fn sys_writev(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let vfd = machine.cpu.a(0) as i32;
    let iov_addr = machine.cpu.a(1);
    let count = (machine.cpu.a(2) as usize).min(MAX_IOVECS_WRITEV);

    if vfd == 1 || vfd == 2 {
        let mut total = 0usize;
        let mut stream: Box<dyn std::io::Write> =
            if vfd == 1 { Box::new(std::io::stdout()) } else { Box::new(std::io::stderr()) };
        for i in 0..count {
            let guest_iov: GuestIovec = machine.memory.copy_from_guest(iov_addr + (i * 16) as u64)?;
            let mut spans = Vec::new();
            machine.memory.gather_buffers_from_range(
                &mut spans,
                guest_iov.iov_base,
                guest_iov.iov_len as usize,
                false,
                MAX_GATHER_SPANS,
            )?;
            for span in &spans {
                let bytes = unsafe { std::slice::from_raw_parts(span.ptr, span.len) };
                let _ = stream.write_all(bytes);
                total += span.len;
            }
        }
        return Ok(Ok(total as i64));
    }

    let real = match machine.fds.translate(vfd) {
        Ok(r) => r,
        Err(e) => return Ok(Err(e)),
    };
    let mut total = 0i64;
    for i in 0..count {
        let guest_iov: GuestIovec = machine.memory.copy_from_guest(iov_addr + (i * 16) as u64)?;
        let mut spans = Vec::new();
        machine.memory.gather_buffers_from_range(
            &mut spans,
            guest_iov.iov_base,
            guest_iov.iov_len as usize,
            false,
            MAX_GATHER_SPANS,
        )?;
        let iov = to_iovec(&spans);
        let rc = unsafe { libc::writev(real, iov.as_ptr(), iov.len() as libc::c_int) };
        match errno_result(rc as libc::c_long) {
            Ok(n) => total += n,
            Err(e) => return Ok(if total > 0 { Ok(total) } else { Err(e) }),
        }
    }
    Ok(Ok(total))
}

fn sys_readlinkat(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let path = match read_path(machine, machine.cpu.a(1)) {
        Ok(p) => p,
        Err(_) => return Ok(Err(Errno::EFAULT)),
    };
    if !machine.fds.allows_stat(&path) {
        return Ok(Err(Errno::EPERM));
    }
    let buf_addr = machine.cpu.a(2);
    let bufsize = (machine.cpu.a(3) as usize).min(MAX_READLINK);
    let cpath = match std::ffi::CString::new(path) {
        Ok(c) => c,
        Err(_) => return Ok(Err(Errno::EINVAL)),
    };
    let mut buf = vec![0u8; bufsize];
    let rc = unsafe {
        libc::readlinkat(
            libc::AT_FDCWD,
            cpath.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_char,
            bufsize,
        )
    };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    machine.memory.memcpy(buf_addr, &buf[..rc as usize])?;
    Ok(Ok(rc as i64))
}

fn sys_fstatat(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let vfd = machine.cpu.a(0) as i32;
    let path = match read_path(machine, machine.cpu.a(1)) {
        Ok(p) => p,
        Err(_) => return Ok(Err(Errno::EFAULT)),
    };
    let stat_addr = machine.cpu.a(2);
    let flags = machine.cpu.a(3) as libc::c_int;
    let real = match machine.fds.translate(vfd) {
        Ok(r) => r,
        Err(e) => return Ok(Err(e)),
    };
    let cpath = match std::ffi::CString::new(path) {
        Ok(c) => c,
        Err(_) => return Ok(Err(Errno::EINVAL)),
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstatat(real, cpath.as_ptr(), &mut st, flags) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    machine.memory.copy_to_guest(stat_addr, &RiscvStat::from(st))?;
    Ok(Ok(0))
}

fn sys_fstat(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let vfd = machine.cpu.a(0) as i32;
    let stat_addr = machine.cpu.a(1);
    let real = match machine.fds.translate(vfd) {
        Ok(r) => r,
        Err(e) => return Ok(Err(e)),
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(real, &mut st) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    machine.memory.copy_to_guest(stat_addr, &RiscvStat::from(st))?;
    Ok(Ok(0))
}

/// Read a guest `timespec`, honoring the RV32/RV64 layout split (same rule
/// [`sys_clock_gettime`] applies on the way out).
fn read_guest_timespec(machine: &mut Machine, addr: u64) -> Result<libc::timespec> {
    if machine.width == Width::Rv32 {
        let compat: TimespecCompat32 = machine.memory.copy_from_guest(addr)?;
        Ok(libc::timespec { tv_sec: compat.tv_sec as i64, tv_nsec: compat.tv_nsec as i64 })
    } else {
        let native: TimespecNative = machine.memory.copy_from_guest(addr)?;
        Ok(libc::timespec { tv_sec: native.tv_sec, tv_nsec: native.tv_nsec })
    }
}

fn write_guest_timespec(machine: &mut Machine, addr: u64, ts: libc::timespec) -> Result<()> {
    if machine.width == Width::Rv32 {
        let compat = TimespecCompat32 { tv_sec: ts.tv_sec as i32, tv_nsec: ts.tv_nsec as i32 };
        machine.memory.copy_to_guest(addr, &compat)
    } else {
        let native = TimespecNative { tv_sec: ts.tv_sec, tv_nsec: ts.tv_nsec };
        machine.memory.copy_to_guest(addr, &native)
    }
}

fn sys_nanosleep(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let req_addr = machine.cpu.a(0);
    let rem_addr = machine.cpu.a(1);
    let req_c = read_guest_timespec(machine, req_addr)?;
    let mut rem_c = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    let rc = unsafe { libc::nanosleep(&req_c, &mut rem_c) };
    if rc < 0 {
        if rem_addr != 0 {
            write_guest_timespec(machine, rem_addr, rem_c)?;
        }
        return Ok(Err(Errno::from_last_os_error()));
    }
    Ok(Ok(0))
}

fn sys_clock_gettime(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let clk_id = machine.cpu.a(0) as libc::clockid_t;
    let ts_addr = machine.cpu.a(1);
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::clock_gettime(clk_id, &mut ts) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    write_guest_timespec(machine, ts_addr, ts)?;
    Ok(Ok(0))
}

fn sys_clock_gettime64(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let clk_id = machine.cpu.a(0) as libc::clockid_t;
    let ts_addr = machine.cpu.a(1);
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::clock_gettime(clk_id, &mut ts) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    let out = TimeGettime64 { tv_sec: ts.tv_sec, tv_msec: ts.tv_nsec / 1_000_000 };
    machine.memory.copy_to_guest(ts_addr, &out)?;
    Ok(Ok(0))
}

fn sys_clock_nanosleep(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let clk_id = machine.cpu.a(0) as libc::clockid_t;
    let flags = machine.cpu.a(1) as libc::c_int;
    let req_addr = machine.cpu.a(2);
    let rem_addr = machine.cpu.a(3);
    let req_c = read_guest_timespec(machine, req_addr)?;
    let mut rem_c = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    let rc = unsafe { libc::clock_nanosleep(clk_id, flags, &req_c, &mut rem_c) };
    if rc != 0 {
        if rem_addr != 0 {
            write_guest_timespec(machine, rem_addr, rem_c)?;
        }
        return Ok(Err(Errno(-(rc as i64))));
    }
    Ok(Ok(0))
}

fn sys_kill(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let signo = machine.cpu.a(1) as u32;
    if signo == 0 {
        return Ok(Ok(0));
    }
    let action = machine.signals.action(signo);
    if action.map_or(true, |a| a.is_unset()) {
        return Ok(Ok(0));
    }
    machine.signals.raise(signo);
    // A blocked signal stays pending until the guest unblocks it (e.g. via
    // rt_sigprocmask); it is not delivered here.
    if machine.signals.is_blocked(signo) {
        return Ok(Ok(0));
    }
    if let Some((pc, sp)) = machine.signals.enter(signo, machine.cpu.pc, machine.cpu.reg(2)) {
        machine.cpu.pc = pc;
        machine.cpu.set_reg(2, sp);
    }
    Ok(Ok(0))
}

fn sys_sigaltstack(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let new_addr = machine.cpu.a(0);
    let old_addr = machine.cpu.a(1);

    let new_stack = if new_addr != 0 {
        let s: GuestStackT = machine.memory.copy_from_guest(new_addr)?;
        Some(crate::signals::AltStack { ss_sp: s.ss_sp, ss_flags: s.ss_flags, ss_size: s.ss_size })
    } else {
        None
    };

    let old = if let Some(s) = new_stack {
        machine.signals.set_altstack(s)
    } else {
        machine.signals.altstack()
    };

    if old_addr != 0 {
        let out = GuestStackT { ss_sp: old.ss_sp, ss_flags: old.ss_flags, ss_size: old.ss_size };
        machine.memory.copy_to_guest(old_addr, &out)?;
    }
    Ok(Ok(0))
}

fn sys_rt_sigaction(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let signo = machine.cpu.a(0) as u32;
    let new_addr = machine.cpu.a(1);
    let old_addr = machine.cpu.a(2);

    if signo == 0 {
        return Ok(Ok(0));
    }

    let old = if new_addr != 0 {
        let raw: KernelSigaction = machine.memory.copy_from_guest(new_addr)?;
        let action = crate::signals::SigAction::from_guest(raw.sa_handler, raw.sa_flags, raw.sa_mask);
        match machine.signals.set_action(signo, action) {
            Some(old) => old,
            None => return Ok(Err(Errno::EINVAL)),
        }
    } else {
        match machine.signals.action(signo) {
            Some(old) => old,
            None => return Ok(Err(Errno::EINVAL)),
        }
    };

    if old_addr != 0 {
        let out = KernelSigaction {
            sa_handler: old.handler,
            sa_flags: old.flags,
            sa_mask: old.mask,
        };
        machine.memory.copy_to_guest(old_addr, &out)?;
    }
    Ok(Ok(0))
}

fn sys_rt_sigprocmask(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let how = machine.cpu.a(0) as i32;
    let set_addr = machine.cpu.a(1);
    let oldset_addr = machine.cpu.a(2);

    let old = if set_addr != 0 {
        let set: u64 = machine.memory.copy_from_guest(set_addr)?;
        match machine.signals.set_blocked(how, set) {
            Some(old) => old,
            None => return Ok(Err(Errno::EINVAL)),
        }
    } else {
        machine.signals.blocked_mask()
    };

    if oldset_addr != 0 {
        machine.memory.copy_to_guest(oldset_addr, &old)?;
    }
    Ok(Ok(0))
}

fn sys_uname(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let addr = machine.cpu.a(0);
    let mut uts = Utsname::default();
    fill_field(&mut uts.sysname, "Linux");
    fill_field(&mut uts.nodename, "rv-machine");
    fill_field(&mut uts.release, "6.1.0");
    fill_field(&mut uts.version, "#1");
    fill_field(&mut uts.machine, machine.width.machine_name());
    fill_field(&mut uts.domainname, "(none)");
    machine.memory.copy_to_guest(addr, &uts)?;
    Ok(Ok(0))
}

fn sys_gettimeofday(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let addr = machine.cpu.a(0);
    let mut tv: libc::timeval = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    let out = GuestTimeval { tv_sec: tv.tv_sec as i64, tv_usec: tv.tv_usec as i64 };
    machine.memory.copy_to_guest(addr, &out)?;
    Ok(Ok(0))
}

fn sys_brk(machine: &mut Machine) -> u64 {
    let requested = machine.cpu.a(0);
    let (lo, hi) = machine.brk_bounds();
    requested.clamp(lo, hi)
}

fn sys_getrandom(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let addr = machine.cpu.a(0);
    let len = machine.cpu.a(1) as usize;
    if len > MAX_GETRANDOM {
        return Ok(Err(Errno(-(libc::EINVAL as i64))));
    }
    let mut buf = vec![0u8; len];
    if getrandom::getrandom(&mut buf).is_err() {
        return Ok(Err(Errno(-(libc::EIO as i64))));
    }
    machine.memory.memcpy(addr, &buf)?;
    Ok(Ok(len as i64))
}

fn sys_statx(machine: &mut Machine) -> Result<std::result::Result<i64, Errno>> {
    let dirfd_vfd = machine.cpu.a(0) as i32;
    let path = match read_path(machine, machine.cpu.a(1)) {
        Ok(p) => p,
        Err(_) => return Ok(Err(Errno::EFAULT)),
    };
    if !machine.fds.allows_stat(&path) {
        return Ok(Err(Errno::EPERM));
    }
    let flags = machine.cpu.a(2) as libc::c_int;
    let mask = machine.cpu.a(3) as libc::c_uint;
    let out_addr = machine.cpu.a(4);
    let real_dirfd: RawFd = if dirfd_vfd == libc::AT_FDCWD {
        libc::AT_FDCWD
    } else {
        match machine.fds.translate(dirfd_vfd) {
            Ok(r) => r,
            Err(e) => return Ok(Err(e)),
        }
    };
    let cpath = match std::ffi::CString::new(path) {
        Ok(c) => c,
        Err(_) => return Ok(Err(Errno::EINVAL)),
    };
    let mut stx: libc::statx = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statx(real_dirfd, cpath.as_ptr(), flags, mask, &mut stx) };
    if rc < 0 {
        return Ok(Err(Errno::from_last_os_error()));
    }
    let bytes = unsafe {
        std::slice::from_raw_parts(&stx as *const libc::statx as *const u8, std::mem::size_of::<libc::statx>())
    };
    machine.memory.memcpy(out_addr, bytes)?;
    Ok(Ok(0))
}
