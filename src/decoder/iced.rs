//! iced-x86 decoder backend (x86 only).

use std::fmt;

use iced_x86::{Decoder, DecoderError, DecoderOptions, Formatter, IntelFormatter, MemorySizeOptions};

use super::{Step, StepStream};
use crate::registry::BackendError;
use crate::{Address, Architecture, Disassembler, Insn, InsnStream, MAX_INSTRUCTION_SIZE};

/// Pure-Rust x86 decoder. Stateless; formatters are built per stream.
#[derive(Debug, Clone, Copy)]
pub struct IcedBackend {
    arch: Architecture,
    bitness: u32,
}

impl IcedBackend {
    /// Registry name
    pub const NAME: &'static str = "iced";

    pub fn new(arch: Architecture) -> Result<Self, BackendError> {
        let bitness = match arch {
            Architecture::X86_32 => 32,
            Architecture::X86_64 => 64,
            _ => return Err(BackendError::ArchitectureNotSupported(arch)),
        };
        Ok(Self { arch, bitness })
    }

    /// Intel syntax configured to read like Capstone's output.
    fn formatter() -> IntelFormatter {
        let mut formatter = IntelFormatter::new();
        let options = formatter.options_mut();
        options.set_hex_prefix("0x");
        options.set_hex_suffix("");
        options.set_uppercase_hex(false);
        options.set_space_after_operand_separator(true);
        options.set_space_between_memory_add_operators(true);
        options.set_branch_leading_zeroes(false);
        options.set_rip_relative_addresses(true);
        options.set_memory_size_options(MemorySizeOptions::Always);
        formatter
    }

    fn step(
        &self,
        formatter: &mut IntelFormatter,
        bytes: &[u8],
        at: Address,
    ) -> Step {
        let slice = &bytes[..bytes.len().min(MAX_INSTRUCTION_SIZE)];
        let mut decoder = match Decoder::try_with_ip(self.bitness, slice, at, DecoderOptions::NONE) {
            Ok(decoder) => decoder,
            Err(_) => return Step::Undecodable,
        };

        let instr = decoder.decode();
        if instr.is_invalid() {
            return match decoder.last_error() {
                DecoderError::NoMoreBytes => Step::Truncated,
                _ => Step::Undecodable,
            };
        }

        let mut mnemonic = String::new();
        formatter.format_mnemonic(&instr, &mut mnemonic);
        let mut operands = String::new();
        formatter.format_all_operands(&instr, &mut operands);

        match Insn::new(at, slice[..instr.len()].to_vec(), self.arch, mnemonic, operands) {
            Ok(insn) => Step::Insn(insn),
            Err(_) => Step::Undecodable,
        }
    }
}

impl fmt::Display for IcedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IcedBackend::{}", self.arch)
    }
}

impl Disassembler for IcedBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn decode<'a>(&'a self, address: Address, bytes: &'a [u8]) -> InsnStream<'a> {
        let mut formatter = Self::formatter();
        Box::new(StepStream::new(bytes, address, self.arch, move |slice, at| {
            self.step(&mut formatter, slice, at)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::CapstoneBackend;

    #[test]
    fn test_only_x86_is_supported() {
        assert!(IcedBackend::new(Architecture::X86_32).is_ok());
        assert!(matches!(
            IcedBackend::new(Architecture::AArch64),
            Err(BackendError::ArchitectureNotSupported(_))
        ));
    }

    #[test]
    fn test_decode_matches_capstone_identity() {
        // pop rdi; xor eax, eax; ret
        let bytes = [0x5f, 0x31, 0xc0, 0xc3];
        let iced = IcedBackend::new(Architecture::X86_64).unwrap();
        let capstone = CapstoneBackend::new(Architecture::X86_64).unwrap();

        let a = iced.decode_all(0x1000, &bytes);
        let b = capstone.decode_all(0x1000, &bytes);
        assert_eq!(a, b);
        assert_eq!(a[0].to_string(), "pop rdi");
        assert!(a[2].is_return());
    }

    #[test]
    fn test_memory_operands_carry_size() {
        let iced = IcedBackend::new(Architecture::X86_64).unwrap();

        // adc byte ptr [rax], al
        let adc = iced.decode_all(0x1000, &[0x10, 0x00]);
        assert_eq!(adc[0].to_string(), "adc byte ptr [rax], al");

        // mov rax, qword ptr [rip + 0x10]
        let mov = iced.decode_all(0x400000, &[0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(mov[0].operands(), "rax, qword ptr [rip + 0x10]");
        assert_eq!(mov[0].ip_relative_target(), Some(0x400017));
    }

    #[test]
    fn test_invalid_and_truncated() {
        let iced = IcedBackend::new(Architecture::X86_64).unwrap();
        let insns = iced.decode_all(0, &[0x06, 0xc3, 0x48]);
        assert_eq!(insns.len(), 2);
        assert!(insns[0].is_invalid());
        assert!(insns[1].is_return());
    }

    #[test]
    fn test_direct_call_and_register_call() {
        let iced = IcedBackend::new(Architecture::X86_64).unwrap();
        let call = iced.decode_all(0x1000, &[0xe8, 0x10, 0x00, 0x00, 0x00]);
        assert!(call[0].is_direct_call());

        // call rax
        let call_reg = iced.decode_all(0x1000, &[0xff, 0xd0]);
        assert!(call_reg[0].is_call_reg());
    }
}
