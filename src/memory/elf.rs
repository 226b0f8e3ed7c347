//! ELF32/ELF64 RISC-V static executable loader.
//!
//! Parses headers and program headers by hand (no external ELF crate) and
//! writes `PT_LOAD` segments straight into a [`super::Memory`].

use super::page::PageAttributes;
use super::Memory;
use crate::error::{MachineError, Result};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EM_RISCV: u16 = 243;

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

const PT_LOAD: u32 = 1;
const PT_GNU_STACK: u32 = 0x6474_e551;
const PT_GNU_RELRO: u32 = 0x6474_e552;

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;

/// A few header fields read generically regardless of ELF32/ELF64, widened
/// to u64 so the rest of the loader doesn't need two code paths.
struct Header {
    is64: bool,
    e_type: u16,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

struct Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

struct Shdr {
    sh_name: u32,
    sh_type: u32,
    sh_addr: u64,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_entsize: u64,
}

fn u16le(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}
fn u32le(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}
fn u64le(b: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(b[off..off + 8].try_into().unwrap())
}

fn parse_header(data: &[u8]) -> Result<Header> {
    if data.len() < 64 || data[0..4] != ELF_MAGIC {
        return Err(MachineError::InvalidElf("missing ELF magic"));
    }
    let class = data[4];
    if data[5] != ELFDATA2LSB {
        return Err(MachineError::InvalidElf("not little-endian"));
    }
    let is64 = match class {
        ELFCLASS64 => true,
        ELFCLASS32 => false,
        _ => return Err(MachineError::InvalidElf("unknown ELF class")),
    };

    let e_type = u16le(data, 16);
    let e_machine = u16le(data, 18);
    if e_machine != EM_RISCV {
        return Err(MachineError::InvalidElf("not EM_RISCV"));
    }

    let h = if is64 {
        Header {
            is64,
            e_type,
            e_entry: u64le(data, 24),
            e_phoff: u64le(data, 32),
            e_shoff: u64le(data, 40),
            e_phentsize: u16le(data, 54),
            e_phnum: u16le(data, 56),
            e_shentsize: u16le(data, 58),
            e_shnum: u16le(data, 60),
            e_shstrndx: u16le(data, 62),
        }
    } else {
        Header {
            is64,
            e_type,
            e_entry: u32le(data, 24) as u64,
            e_phoff: u32le(data, 28) as u64,
            e_shoff: u32le(data, 32) as u64,
            e_phentsize: u16le(data, 42),
            e_phnum: u16le(data, 44),
            e_shentsize: u16le(data, 46),
            e_shnum: u16le(data, 48),
            e_shstrndx: u16le(data, 50),
        }
    };

    if h.e_type != ET_EXEC && h.e_type != ET_DYN {
        return Err(MachineError::InvalidElf("not an executable or PIE"));
    }
    Ok(h)
}

fn parse_phdr(data: &[u8], h: &Header, idx: usize) -> Result<Phdr> {
    let off = h.e_phoff as usize + idx * h.e_phentsize as usize;
    if h.is64 {
        if off + 56 > data.len() {
            return Err(MachineError::InvalidElf("program header truncated"));
        }
        Ok(Phdr {
            p_type: u32le(data, off),
            p_flags: u32le(data, off + 4),
            p_offset: u64le(data, off + 8),
            p_vaddr: u64le(data, off + 16),
            p_filesz: u64le(data, off + 32),
            p_memsz: u64le(data, off + 40),
        })
    } else {
        if off + 32 > data.len() {
            return Err(MachineError::InvalidElf("program header truncated"));
        }
        Ok(Phdr {
            p_type: u32le(data, off),
            p_offset: u32le(data, off + 4) as u64,
            p_vaddr: u32le(data, off + 8) as u64,
            p_filesz: u32le(data, off + 16) as u64,
            p_memsz: u32le(data, off + 20) as u64,
            p_flags: u32le(data, off + 24),
        })
    }
}

fn parse_shdr(data: &[u8], h: &Header, idx: usize) -> Result<Shdr> {
    let off = h.e_shoff as usize + idx * h.e_shentsize as usize;
    if h.is64 {
        if off + 64 > data.len() {
            return Err(MachineError::InvalidElf("section header truncated"));
        }
        Ok(Shdr {
            sh_name: u32le(data, off),
            sh_type: u32le(data, off + 4),
            sh_addr: u64le(data, off + 16),
            sh_offset: u64le(data, off + 24),
            sh_size: u64le(data, off + 32),
            sh_link: u32le(data, off + 40),
            sh_entsize: u64le(data, off + 56),
        })
    } else {
        if off + 40 > data.len() {
            return Err(MachineError::InvalidElf("section header truncated"));
        }
        Ok(Shdr {
            sh_name: u32le(data, off),
            sh_type: u32le(data, off + 4),
            sh_addr: u32le(data, off + 12) as u64,
            sh_offset: u32le(data, off + 16) as u64,
            sh_size: u32le(data, off + 20) as u64,
            sh_link: u32le(data, off + 24),
            sh_entsize: u32le(data, off + 36) as u64,
        })
    }
}

fn cstr_at(strtab: &[u8], off: usize) -> &str {
    let end = strtab[off..].iter().position(|&b| b == 0).map(|n| off + n).unwrap_or(strtab.len());
    std::str::from_utf8(&strtab[off..end]).unwrap_or("")
}

/// Parses program headers out of `data` and maps every `PT_LOAD` segment
/// into `memory`, sets `start_address`/`stack_address`/`elf_end_vaddr`, and
/// resolves `exit_address` from the `_exit` symbol if present.
pub fn binary_loader(memory: &mut Memory, data: &[u8]) -> Result<()> {
    let h = parse_header(data)?;
    let mut saw_load = false;

    for i in 0..h.e_phnum as usize {
        let ph = parse_phdr(data, &h, i)?;
        match ph.p_type {
            PT_LOAD => {
                saw_load = true;
                load_segment(memory, data, &ph)?;
                memory.elf_end_vaddr = memory.elf_end_vaddr.max(ph.p_vaddr + ph.p_filesz);
            }
            PT_GNU_STACK => {
                memory.stack_address = ph.p_vaddr;
            }
            PT_GNU_RELRO => {
                // Recognized, not enforced: RELRO hardening has no guest-visible
                // effect for a single-threaded interpreter.
            }
            _ => {}
        }
    }

    if !saw_load {
        return Err(MachineError::InvalidElf("no PT_LOAD segments"));
    }

    memory.start_address = h.e_entry;
    memory.exit_address = resolve_symbol_inner(data, &h, "_exit").map(|s| s.address).unwrap_or(0);
    Ok(())
}

fn load_segment(memory: &mut Memory, data: &[u8], ph: &Phdr) -> Result<()> {
    if ph.p_offset as usize + ph.p_filesz as usize > data.len() {
        return Err(MachineError::InvalidElf("PT_LOAD segment exceeds file size"));
    }
    let attr = PageAttributes::from_elf_flags(ph.p_flags, memory.protect_segments);
    let file_bytes =
        &data[ph.p_offset as usize..ph.p_offset as usize + ph.p_filesz as usize];

    let first_page = Memory::page_no(ph.p_vaddr);
    let last_page = Memory::page_no(ph.p_vaddr + ph.p_memsz.saturating_sub(1).max(0));
    for page_no in first_page..=last_page {
        memory.allocate_page(page_no, attr)?;
    }
    // The remainder up to p_memsz is left zero because allocate_page always
    // zeroes fresh pages.
    memory.memcpy(ph.p_vaddr, file_bytes)?;
    Ok(())
}

/// A resolved ELF symbol, used for backtraces via [`lookup`].
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub name: String,
    pub address: u64,
    pub offset: u64,
}

/// `{name, address, size}` of a section, resolved through `.shstrtab`.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub address: u64,
    pub size: u64,
}

/// Look up a section by name (e.g. `.text`, `.symtab`) via `.shstrtab`.
pub fn section_by_name_pub(data: &[u8], name: &str) -> Option<SectionInfo> {
    let h = parse_header(data).ok()?;
    let (sh, _) = section_by_name(data, &h, name).ok()??;
    Some(SectionInfo { address: sh.sh_addr, size: sh.sh_size })
}

fn section_by_name<'d>(data: &'d [u8], h: &Header, name: &str) -> Result<Option<(Shdr, &'d [u8])>> {
    if h.e_shnum == 0 {
        return Ok(None);
    }
    let shstr_hdr = parse_shdr(data, h, h.e_shstrndx as usize)?;
    let shstrtab = &data[shstr_hdr.sh_offset as usize..(shstr_hdr.sh_offset + shstr_hdr.sh_size) as usize];

    for i in 0..h.e_shnum as usize {
        let sh = parse_shdr(data, h, i)?;
        if cstr_at(shstrtab, sh.sh_name as usize) == name {
            let bytes = &data[sh.sh_offset as usize..(sh.sh_offset + sh.sh_size) as usize];
            return Ok(Some((sh, bytes)));
        }
    }
    Ok(None)
}

struct SymEnt {
    name: u32,
    value: u64,
    size: u64,
}

fn parse_symtab(data: &[u8], h: &Header, sh: &Shdr) -> Vec<SymEnt> {
    let bytes = &data[sh.sh_offset as usize..(sh.sh_offset + sh.sh_size) as usize];
    let entsize = if h.is64 { 24 } else { 16 };
    let mut out = Vec::new();
    let mut off = 0;
    while off + entsize <= bytes.len() {
        let ent = if h.is64 {
            SymEnt {
                name: u32le(bytes, off),
                value: u64le(bytes, off + 8),
                size: u64le(bytes, off + 16),
            }
        } else {
            SymEnt {
                name: u32le(bytes, off),
                value: u32le(bytes, off + 4) as u64,
                size: u32le(bytes, off + 8) as u64,
            }
        };
        out.push(ent);
        off += entsize;
        let _ = sh.sh_entsize; // entsize derived from class, not trusted blindly
    }
    out
}

/// Resolve `name` to its address using `.symtab`/`.strtab`, or `None` if the
/// binary carries no symbol table (common for stripped statically-linked
/// binaries) or the symbol is absent.
pub fn resolve_symbol(data: &[u8], name: &str) -> Option<SymbolInfo> {
    let h = parse_header(data).ok()?;
    resolve_symbol_inner(data, &h, name)
}

fn resolve_symbol_inner(data: &[u8], h: &Header, name: &str) -> Option<SymbolInfo> {
    let (symtab_hdr, _) = section_by_name(data, h, ".symtab").ok()??;
    if symtab_hdr.sh_type != SHT_SYMTAB {
        return None;
    }
    let strtab_hdr = parse_shdr(data, h, symtab_hdr.sh_link as usize).ok()?;
    if strtab_hdr.sh_type != SHT_STRTAB {
        return None;
    }
    let strtab = &data[strtab_hdr.sh_offset as usize..(strtab_hdr.sh_offset + strtab_hdr.sh_size) as usize];
    let syms = parse_symtab(data, h, &symtab_hdr);
    syms.into_iter().find_map(|s| {
        let sym_name = cstr_at(strtab, s.name as usize);
        (sym_name == name).then(|| SymbolInfo { name: sym_name.to_string(), address: s.value, offset: 0 })
    })
}

/// Returns the enclosing function symbol for `address`, or the closest
/// preceding symbol, demangling the name where possible (Rust v0/legacy or
/// Itanium C++; falls back to the raw symbol name).
pub fn lookup(data: &[u8], address: u64) -> Option<SymbolInfo> {
    let h = parse_header(data).ok()?;
    let (symtab_hdr, _) = section_by_name(data, &h, ".symtab").ok()??;
    let strtab_hdr = parse_shdr(data, &h, symtab_hdr.sh_link as usize).ok()?;
    let strtab = &data[strtab_hdr.sh_offset as usize..(strtab_hdr.sh_offset + strtab_hdr.sh_size) as usize];
    let syms = parse_symtab(data, &h, &symtab_hdr);

    let mut best: Option<(&SymEnt, u64)> = None;
    for s in &syms {
        if s.value > address {
            continue;
        }
        if address < s.value + s.size.max(1) || s.size == 0 {
            let dist = address - s.value;
            if best.map(|(_, d)| dist < d).unwrap_or(true) {
                best = Some((s, dist));
            }
        }
    }
    best.map(|(s, dist)| {
        let raw = cstr_at(strtab, s.name as usize);
        let demangled = demangle(raw);
        SymbolInfo { name: demangled, address: s.value, offset: dist }
    })
}

fn demangle(raw: &str) -> String {
    let rust = rustc_demangle::try_demangle(raw);
    if let Ok(sym) = rust {
        return sym.to_string();
    }
    cpp_demangle_best_effort(raw).unwrap_or_else(|| raw.to_string())
}

/// A minimal best-effort Itanium demangler covering the common
/// `_ZN...E`-nested-name shape; anything more exotic is left mangled rather
/// than risk a wrong name.
fn cpp_demangle_best_effort(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix("_ZN")?;
    let rest = rest.strip_suffix('E').unwrap_or(rest);
    let mut parts = Vec::new();
    let mut chars = rest.char_indices().peekable();
    let mut pos = 0;
    while pos < rest.len() {
        let digits_start = pos;
        while chars.peek().map(|(_, c)| c.is_ascii_digit()).unwrap_or(false) {
            chars.next();
            pos += 1;
        }
        if pos == digits_start {
            break;
        }
        let len: usize = rest[digits_start..pos].parse().ok()?;
        if pos + len > rest.len() {
            return None;
        }
        parts.push(&rest[pos..pos + len]);
        pos += len;
        for _ in 0..len {
            chars.next();
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("::"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf64(entry: u64, load_vaddr: u64, payload: &[u8]) -> Vec<u8> {
        let phoff = 64u64;
        let phentsize = 56u16;
        let phnum = 1u16;
        let mut buf = vec![0u8; phoff as usize + phentsize as usize];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_RISCV.to_le_bytes());
        buf[24..32].copy_from_slice(&entry.to_le_bytes());
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        buf[54..56].copy_from_slice(&phentsize.to_le_bytes());
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());

        let ph = phoff as usize;
        buf[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        buf[ph + 4..ph + 8].copy_from_slice(&7u32.to_le_bytes()); // RWX
        let data_off = buf.len() as u64;
        buf[ph + 8..ph + 16].copy_from_slice(&data_off.to_le_bytes());
        buf[ph + 16..ph + 24].copy_from_slice(&load_vaddr.to_le_bytes());
        buf[ph + 32..ph + 40].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        buf[ph + 40..ph + 48].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn loads_a_single_load_segment_and_sets_entry() {
        let payload = [0xAAu8; 64];
        let elf = build_minimal_elf64(0x1000_0000, 0x1000_0000, &payload);
        let mut mem = Memory::new(4096, true);
        binary_loader(&mut mem, &elf).unwrap();
        assert_eq!(mem.start_address, 0x1000_0000);
        assert_eq!(mem.elf_end_vaddr, 0x1000_0000 + payload.len() as u64);
        let mut back = [0u8; 64];
        mem.copy_from_guest_raw(0x1000_0000, &mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn rejects_non_riscv_machine() {
        let mut elf = build_minimal_elf64(0, 0x1000, &[1, 2, 3]);
        elf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        let mut mem = Memory::new(4096, true);
        assert!(binary_loader(&mut mem, &elf).is_err());
    }

    #[test]
    fn demangle_falls_back_to_raw_name_when_not_mangled() {
        assert_eq!(demangle("_exit"), "_exit");
    }
}
