//! End-to-end scenarios driven purely through the public `Machine` API:
//! register setup, an `ecall`, and a check of the resulting guest state.

use rv_machine::syscall::abi::{GuestIovec, KernelSigaction};
use rv_machine::syscall::nr;
use rv_machine::{Machine, MachineConfig, Width};
use std::io::Write as _;

fn machine(config: MachineConfig) -> Machine {
    let mut m = Machine::new(Width::Rv64, config);
    m.memory.heap_address = 0x8000_0000;
    m
}

fn do_ecall(m: &mut Machine, nr: u64) {
    m.cpu.set_reg(17, nr);
    m.ecall().unwrap();
}

#[test]
fn hello_via_writev_returns_total_byte_count() {
    let mut m = machine(MachineConfig::new());

    let buf_addr = 0x1000u64;
    m.memory.memcpy(buf_addr, b"hello\n").unwrap();

    let iov_addr = 0x2000u64;
    let iovecs = [
        GuestIovec { iov_base: buf_addr, iov_len: 5 },
        GuestIovec { iov_base: buf_addr + 5, iov_len: 1 },
    ];
    for (i, iov) in iovecs.iter().enumerate() {
        m.memory.copy_to_guest(iov_addr + (i * 16) as u64, iov).unwrap();
    }

    m.cpu.set_reg(10, 1); // vfd 1 = stdout
    m.cpu.set_reg(11, iov_addr);
    m.cpu.set_reg(12, 2);
    do_ecall(&mut m, nr::WRITEV);

    assert_eq!(m.cpu.reg(10) as i64, 6);
}

#[test]
fn openat_then_read_then_close_round_trips_a_real_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"guest-visible-contents").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let mut m = machine(MachineConfig::new().permit_filesystem(true));

    let path_addr = 0x1000u64;
    m.memory.memcpy(path_addr, path.as_bytes()).unwrap();
    m.memory.memcpy(path_addr + path.len() as u64, &[0u8]).unwrap();

    m.cpu.set_reg(10, libc::AT_FDCWD as u64);
    m.cpu.set_reg(11, path_addr);
    m.cpu.set_reg(12, libc::O_RDONLY as u64);
    m.cpu.set_reg(13, 0);
    do_ecall(&mut m, nr::OPENAT);
    let vfd = m.cpu.reg(10) as i32;
    assert!(vfd >= 3);
    assert!(m.fds.is_open(vfd));

    let read_buf_addr = 0x3000u64;
    m.cpu.set_reg(10, vfd as u64);
    m.cpu.set_reg(11, read_buf_addr);
    m.cpu.set_reg(12, 64);
    do_ecall(&mut m, nr::READ);
    let n = m.cpu.reg(10) as usize;
    assert_eq!(n, b"guest-visible-contents".len());

    let mut back = vec![0u8; n];
    m.memory.copy_from_guest_raw(read_buf_addr, &mut back).unwrap();
    assert_eq!(&back, b"guest-visible-contents");

    m.cpu.set_reg(10, vfd as u64);
    do_ecall(&mut m, nr::CLOSE);
    assert_eq!(m.cpu.reg(10), 0);
    assert!(!m.fds.is_open(vfd));
}

#[test]
fn getrandom_enforces_the_256_byte_ceiling() {
    let mut m = machine(MachineConfig::new());

    m.cpu.set_reg(10, 0x4000);
    m.cpu.set_reg(11, 512);
    m.cpu.set_reg(12, 0);
    do_ecall(&mut m, nr::GETRANDOM);
    assert_eq!(m.cpu.reg(10) as i64, -(libc::EINVAL as i64));

    m.cpu.set_reg(10, 0x5000);
    m.cpu.set_reg(11, 128);
    m.cpu.set_reg(12, 0);
    do_ecall(&mut m, nr::GETRANDOM);
    assert_eq!(m.cpu.reg(10), 128);
}

#[test]
fn brk_clamps_requests_into_the_configured_window() {
    let mut m = machine(MachineConfig::new().brk_max(0x1000000));

    m.cpu.set_reg(10, 0x9000_0000);
    do_ecall(&mut m, nr::BRK);
    assert_eq!(m.cpu.reg(10), 0x8100_0000);

    m.cpu.set_reg(10, 0);
    do_ecall(&mut m, nr::BRK);
    assert_eq!(m.cpu.reg(10), 0x8000_0000);
}

#[test]
fn sigaction_round_trip_through_rt_sigaction() {
    const SIGUSR1: u64 = 10;
    const SA_ONSTACK: u64 = 0x0800_0000;

    let mut m = machine(MachineConfig::new());

    let new_addr = 0x1000u64;
    let action = KernelSigaction { sa_handler: 0x1234, sa_flags: SA_ONSTACK, sa_mask: 0xF };
    m.memory.copy_to_guest(new_addr, &action).unwrap();

    m.cpu.set_reg(10, SIGUSR1);
    m.cpu.set_reg(11, new_addr);
    m.cpu.set_reg(12, 0);
    do_ecall(&mut m, nr::RT_SIGACTION);
    assert_eq!(m.cpu.reg(10), 0);

    let old_addr = 0x2000u64;
    m.cpu.set_reg(10, SIGUSR1);
    m.cpu.set_reg(11, 0);
    m.cpu.set_reg(12, old_addr);
    do_ecall(&mut m, nr::RT_SIGACTION);
    assert_eq!(m.cpu.reg(10), 0);

    let old: KernelSigaction = m.memory.copy_from_guest(old_addr).unwrap();
    assert_eq!(old.sa_handler, 0x1234);
    assert_eq!(old.sa_flags, SA_ONSTACK);
    assert_eq!(old.sa_mask, 0xF);
}

#[test]
fn decoder_cache_survives_a_disk_round_trip_via_tempfile() {
    use rv_machine::decoder::serialize::{deserialize_portable, serialize_portable};
    use rv_machine::decoder::{Cpu, DecodedInsn, DecoderCache, InstructionDecoder};
    use std::io::{Read, Seek, SeekFrom};

    fn even_handler(cpu: &mut Cpu, _instr: u32) {
        cpu.regs[5] += 1;
    }
    fn odd_handler(cpu: &mut Cpu, _instr: u32) {
        cpu.regs[5] += 2;
    }

    struct ParityDecoder;
    impl InstructionDecoder for ParityDecoder {
        fn decode(&self, encoding: u32) -> DecodedInsn {
            if encoding % 2 == 0 {
                DecodedInsn { bytecode: 1, handler: even_handler }
            } else {
                DecodedInsn { bytecode: 2, handler: odd_handler }
            }
        }
    }

    let decoder = ParityDecoder;
    let mut cache = DecoderCache::new(false);
    for i in 0..1024 {
        cache.set_handler(i, i as u32, &decoder);
    }

    let bytes = serialize_portable(&cache);
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&bytes).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut reloaded = Vec::new();
    file.read_to_end(&mut reloaded).unwrap();

    let restored = deserialize_portable(&reloaded, false, &decoder).unwrap();

    let mut cpu_before = Cpu::default();
    let mut cpu_after = Cpu::default();
    for i in 0..1024 {
        let before = cache.get(i);
        let after = restored.get(i);
        assert_eq!(before, after);

        let registry = rv_machine::decoder::handlers::registry();
        let handler = registry.get(after.m_handler);
        handler(&mut cpu_before, before.instr);
        handler(&mut cpu_after, after.instr);
    }
    assert_eq!(cpu_before.regs[5], cpu_after.regs[5]);
}
