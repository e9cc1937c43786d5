//! A tiny made-up instruction set for deterministic tests.
//!
//! | bytes       | instruction         |
//! |-------------|---------------------|
//! | `c3`        | `ret`               |
//! | `90`        | `nop`               |
//! | `91`        | `inc eax`           |
//! | `92`        | `dec eax`           |
//! | `d0`        | `call rax`          |
//! | `f4`        | `hlt`               |
//! | `b0 xx`     | `mov al, 0xxx`      |
//! | `e8 xx`     | `call 0xxx`         |
//! | `b1 xx yy`  | `mov ax, 0xyyxx`    |
//! | anything    | `db` marker         |
//!
//! Instructions are tagged x86-64 so they classify with the x86 table.

use crate::decoder::{Step, StepStream};
use crate::{Address, Architecture, Disassembler, Insn, InsnStream};

#[derive(Debug, Clone, Copy)]
pub(crate) struct ToyDisassembler {
    name: &'static str,
}

impl ToyDisassembler {
    pub(crate) fn new() -> Self {
        Self::named("toy")
    }

    pub(crate) fn named(name: &'static str) -> Self {
        Self { name }
    }

    fn step(bytes: &[u8], at: Address) -> Step {
        let (len, mnemonic, operands) = match bytes[0] {
            0xc3 => (1, "ret", String::new()),
            0x90 => (1, "nop", String::new()),
            0x91 => (1, "inc", "eax".to_string()),
            0x92 => (1, "dec", "eax".to_string()),
            0xd0 => (1, "call", "rax".to_string()),
            0xf4 => (1, "hlt", String::new()),
            0xb0 | 0xe8 | 0xb1 => {
                let len = if bytes[0] == 0xb1 { 3 } else { 2 };
                if bytes.len() < len {
                    return Step::Truncated;
                }
                match bytes[0] {
                    0xb0 => (2, "mov", format!("al, 0x{:x}", bytes[1])),
                    0xe8 => (2, "call", format!("0x{:x}", bytes[1])),
                    _ => (3, "mov", format!("ax, 0x{:x}", u16::from_le_bytes([bytes[1], bytes[2]]))),
                }
            }
            _ => return Step::Undecodable,
        };

        match Insn::new(at, bytes[..len].to_vec(), Architecture::X86_64, mnemonic, operands) {
            Ok(insn) => Step::Insn(insn),
            Err(_) => Step::Undecodable,
        }
    }
}

impl Disassembler for ToyDisassembler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn architecture(&self) -> Architecture {
        Architecture::X86_64
    }

    fn decode<'a>(&'a self, address: Address, bytes: &'a [u8]) -> InsnStream<'a> {
        Box::new(StepStream::new(bytes, address, Architecture::X86_64, Self::step))
    }
}

/// Text of each instruction, for compact assertions.
pub(crate) fn texts(insns: &[Insn]) -> Vec<String> {
    insns.iter().map(|i| i.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toy_decoding() {
        let toy = ToyDisassembler::new();
        let insns = toy.decode_all(0x100, &[0xb1, 0x90, 0x91, 0xc3, 0x77]);
        assert_eq!(texts(&insns), vec!["mov ax, 0x9190", "ret", "db 0x77"]);
        assert_eq!(insns[1].address(), 0x103);
    }
}
