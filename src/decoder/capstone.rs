//! Capstone-based decoder backend.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use capstone::{Arch, Capstone, Endian, Mode, NO_EXTRA_MODE};

use super::{Step, StepStream};
use crate::registry::BackendError;
use crate::{Address, Architecture, Disassembler, Insn, InsnStream, MAX_INSTRUCTION_SIZE};

type HandleKey = (Arch, Mode, Endian);

thread_local! {
    // Simple cache for Capstone instances - key is (arch, mode, endian)
    static CS_POOL: RefCell<HashMap<HandleKey, Rc<Capstone>>> =
        RefCell::new(HashMap::new());
}

/// Fetch this thread's Capstone handle for `key`, building it on first use.
fn handle(key: HandleKey) -> Result<Rc<Capstone>, capstone::Error> {
    CS_POOL.with(|cell| {
        let mut map = cell.borrow_mut();
        if let Some(cs) = map.get(&key) {
            return Ok(Rc::clone(cs));
        }
        let (arch, mode, endian) = key;
        let cs = Rc::new(Capstone::new_raw(arch, mode, NO_EXTRA_MODE, Some(endian))?);
        map.insert(key, Rc::clone(&cs));
        Ok(cs)
    })
}

/// Get Arch, Mode, Endian for an architecture with a pattern table
fn arch_mode_endian(arch: Architecture) -> Option<HandleKey> {
    match arch {
        Architecture::X86_32 => Some((Arch::X86, Mode::Mode32, Endian::Little)),
        Architecture::X86_64 => Some((Arch::X86, Mode::Mode64, Endian::Little)),
        _ => None,
    }
}

/// Decoder backed by the Capstone engine.
///
/// The value itself only names an architecture; Capstone handles live in a
/// per-thread pool, so one `CapstoneBackend` can be shared across workers.
#[derive(Debug, Clone, Copy)]
pub struct CapstoneBackend {
    arch: Architecture,
    key: HandleKey,
}

impl CapstoneBackend {
    /// Registry name
    pub const NAME: &'static str = "capstone";

    /// Create a decoder for a specific architecture
    pub fn new(arch: Architecture) -> Result<Self, BackendError> {
        let key = arch_mode_endian(arch).ok_or(BackendError::ArchitectureNotSupported(arch))?;
        if arch.patterns().is_none() {
            return Err(BackendError::ArchitectureNotSupported(arch));
        }

        // Make sure the engine was built with this architecture
        handle(key).map_err(|e| BackendError::Unavailable(format!("capstone: {}", e)))?;

        Ok(Self { arch, key })
    }

    fn step(cs: &Capstone, arch: Architecture, bytes: &[u8], at: Address) -> Step {
        // Only look at a small slice (16 bytes max)
        let slice = &bytes[..bytes.len().min(MAX_INSTRUCTION_SIZE)];

        if let Some(insn) = Self::first_insn(cs, arch, slice, at) {
            return Step::Insn(insn);
        }

        // Tell a cut-off instruction apart from garbage by decoding it padded
        if slice.len() < MAX_INSTRUCTION_SIZE {
            let mut padded = [0u8; MAX_INSTRUCTION_SIZE];
            padded[..slice.len()].copy_from_slice(slice);
            if let Some(insn) = Self::first_insn(cs, arch, &padded, at) {
                if insn.len() > slice.len() {
                    return Step::Truncated;
                }
            }
        }

        Step::Undecodable
    }

    fn first_insn(cs: &Capstone, arch: Architecture, slice: &[u8], at: Address) -> Option<Insn> {
        let disasm_result = cs.disasm_count(slice, at, 1).ok()?;
        let i = disasm_result.iter().next()?;

        // Ensure instruction starts at the address we requested
        if i.address() != at {
            return None;
        }

        Insn::new(
            i.address(),
            i.bytes().to_vec(),
            arch,
            i.mnemonic().unwrap_or(""),
            i.op_str().unwrap_or(""),
        )
        .ok()
    }
}

impl fmt::Display for CapstoneBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneBackend::{}", self.arch)
    }
}

impl Disassembler for CapstoneBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn decode<'a>(&'a self, address: Address, bytes: &'a [u8]) -> InsnStream<'a> {
        let cs = match handle(self.key) {
            Ok(cs) => cs,
            Err(e) => {
                log::warn!("capstone handle for {} unavailable on this thread: {}", self.arch, e);
                return Box::new(std::iter::empty());
            }
        };
        let arch = self.arch;

        Box::new(StepStream::new(bytes, address, arch, move |slice, at| {
            Self::step(&cs, arch, slice, at)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(insns: &[Insn]) -> Vec<String> {
        insns.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_architecture_mapping() {
        let decoder = CapstoneBackend::new(Architecture::X86_64).unwrap();
        assert_eq!(decoder.architecture(), Architecture::X86_64);
        assert_eq!(decoder.name(), "capstone");
    }

    #[test]
    fn test_unclassified_architecture_is_refused() {
        assert!(matches!(
            CapstoneBackend::new(Architecture::Arm),
            Err(BackendError::ArchitectureNotSupported(Architecture::Arm))
        ));
        assert!(matches!(
            CapstoneBackend::new(Architecture::AArch64),
            Err(BackendError::ArchitectureNotSupported(Architecture::AArch64))
        ));
        assert!(CapstoneBackend::new(Architecture::Unknown).is_err());
    }

    #[test]
    fn test_x86_64_decode() {
        let decoder = CapstoneBackend::new(Architecture::X86_64).unwrap();
        let insns = decoder.decode_all(0x401000, &[0x5f, 0xc3]);

        assert_eq!(texts(&insns), vec!["pop rdi", "ret"]);
        assert_eq!(insns[0].address(), 0x401000);
        assert_eq!(insns[1].address(), 0x401001);
        assert!(insns[1].is_return());
    }

    #[test]
    fn test_x86_32_decode() {
        // mov eax, 1; ret
        let bytes = [0xb8, 0x01, 0x00, 0x00, 0x00, 0xc3];
        let decoder = CapstoneBackend::new(Architecture::X86_32).unwrap();

        let insns = decoder.decode_all(0, &bytes);
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[0].mnemonic(), "mov");
        assert_eq!(insns[0].bytes(), &bytes[..5]);
    }

    #[test]
    fn test_bad_byte_becomes_marker() {
        // push es does not exist in 64-bit mode
        let decoder = CapstoneBackend::new(Architecture::X86_64).unwrap();
        let insns = decoder.decode_all(0, &[0x06, 0xc3]);

        assert_eq!(insns.len(), 2);
        assert!(insns[0].is_invalid());
        assert_eq!(insns[0].to_string(), "db 0x06");
        assert!(insns[1].is_return());
    }

    #[test]
    fn test_truncated_tail_is_not_decoded() {
        let decoder = CapstoneBackend::new(Architecture::X86_32).unwrap();
        let insns = decoder.decode_all(0, &[0xc3, 0xb8, 0x01]);
        assert_eq!(texts(&insns), vec!["ret"]);
    }

    #[test]
    fn test_direct_call_text() {
        // call rel32 to 0x1005 + 0x10
        let decoder = CapstoneBackend::new(Architecture::X86_64).unwrap();
        let insns = decoder.decode_all(0x1000, &[0xe8, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(insns.len(), 1);
        assert!(insns[0].is_direct_call());
        assert!(!insns[0].is_call_reg());
    }

    #[test]
    fn test_rip_relative_annotation() {
        let decoder = CapstoneBackend::new(Architecture::X86_64).unwrap();
        let insns = decoder.decode_all(0x400000, &[0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(insns[0].ip_relative_target(), Some(0x400017));
    }
}
