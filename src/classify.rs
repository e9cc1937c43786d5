//! Per-architecture instruction classification tables.
//!
//! Every predicate on [`Insn`] is answered by looking its mnemonic and operand
//! text up in a [`PatternTable`]. Supporting a new architecture means adding a
//! table here; decoders for architectures without one are refused.

use serde::{Deserialize, Serialize};

use crate::{Architecture, Insn};

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlowKind {
    /// Falls through to the next instruction
    None,
    /// Conditional branch
    Conditional,
    /// Unconditional jump or call
    Unconditional,
}

/// Mnemonic and register tables for one instruction set.
#[derive(Debug)]
pub struct PatternTable {
    /// Mnemonic prefixes stripped before lookup (`rep`, `lock`, ...)
    pub prefixes: &'static [&'static str],
    pub returns: &'static [&'static str],
    pub conditional_branches: &'static [&'static str],
    pub jumps: &'static [&'static str],
    pub calls: &'static [&'static str],
    pub nops: &'static [&'static str],
    /// Register-to-itself moves that do nothing (`mov eax, eax`)
    pub moves: &'static [&'static str],
    /// Undecodable markers and instructions no gadget should contain
    pub invalid: &'static [&'static str],
    /// Registers that can carry an indirect branch target
    pub registers: &'static [&'static str],
    /// Instruction-pointer registers usable as a memory base
    pub ip_registers: &'static [&'static str],
}

static X86: PatternTable = PatternTable {
    prefixes: &["rep", "repe", "repz", "repne", "repnz", "lock", "bnd", "notrack"],
    returns: &["ret", "retf", "retn", "retq", "retfq"],
    conditional_branches: &[
        "jo", "jno", "js", "jns", "je", "jz", "jne", "jnz", "jb", "jnae", "jc", "jnb", "jae",
        "jnc", "jbe", "jna", "ja", "jnbe", "jl", "jnge", "jge", "jnl", "jle", "jng", "jg",
        "jnle", "jp", "jpe", "jnp", "jpo", "jcxz", "jecxz", "jrcxz", "loop", "loope", "loopz",
        "loopne", "loopnz",
    ],
    jumps: &["jmp", "ljmp"],
    calls: &["call", "lcall"],
    nops: &["nop", "nopw", "nopl", "fnop"],
    moves: &["mov"],
    invalid: &[
        "db", ".byte", "(bad)", "in", "insb", "insw", "insd", "outsb", "outsw", "outsd", "hlt",
    ],
    registers: &[
        "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15", "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "r8d",
        "r9d", "r10d", "r11d", "r12d", "r13d", "r14d", "r15d", "ax", "bx", "cx", "dx", "si",
        "di", "bp", "sp", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w", "r14w", "r15w",
    ],
    ip_registers: &["rip", "eip"],
};

impl PatternTable {
    /// Table for `arch`, or `None` when instructions of that architecture
    /// cannot be classified yet.
    pub fn for_arch(arch: Architecture) -> Option<&'static PatternTable> {
        match arch {
            Architecture::X86_32 | Architecture::X86_64 => Some(&X86),
            _ => None,
        }
    }

    /// Mnemonic with prefixes removed (`rep stosb` -> `stosb`).
    pub fn base_mnemonic<'a>(&self, mnemonic: &'a str) -> &'a str {
        mnemonic
            .split_whitespace()
            .find(|word| !self.prefixes.contains(word))
            .unwrap_or(mnemonic)
    }

    fn lookup(&self, insn: &Insn, names: &[&str]) -> bool {
        names.contains(&self.base_mnemonic(insn.mnemonic()))
    }

    /// True if any operand token names a general-purpose register.
    fn names_register(&self, operands: &str) -> bool {
        operands
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| self.registers.contains(&token))
    }

    fn is_immediate(operands: &str) -> bool {
        let op = operands.trim();
        let digits = op
            .strip_prefix("0x")
            .or_else(|| op.strip_suffix('h'))
            .unwrap_or(op);
        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn control_flow_kind(&self, insn: &Insn) -> ControlFlowKind {
        if self.lookup(insn, self.jumps) || self.lookup(insn, self.calls) {
            ControlFlowKind::Unconditional
        } else if self.lookup(insn, self.conditional_branches) {
            ControlFlowKind::Conditional
        } else {
            ControlFlowKind::None
        }
    }

    pub fn is_return(&self, insn: &Insn) -> bool {
        self.lookup(insn, self.returns)
    }

    pub fn is_nop(&self, insn: &Insn) -> bool {
        if self.lookup(insn, self.nops) {
            return true;
        }
        if !self.lookup(insn, self.moves) {
            return false;
        }
        match insn.operands().split_once(',') {
            Some((dst, src)) => dst.trim().eq_ignore_ascii_case(src.trim()),
            None => false,
        }
    }

    pub fn is_invalid(&self, insn: &Insn) -> bool {
        self.lookup(insn, self.invalid)
    }

    pub fn is_jmp_reg_uncond(&self, insn: &Insn) -> bool {
        self.lookup(insn, self.jumps) && self.names_register(insn.operands())
    }

    pub fn is_call_reg(&self, insn: &Insn) -> bool {
        self.lookup(insn, self.calls) && self.names_register(insn.operands())
    }

    pub fn is_direct_call(&self, insn: &Insn) -> bool {
        self.lookup(insn, self.calls) && Self::is_immediate(insn.operands())
    }

    /// Displacement of an `[rip + 0xN]` style memory operand.
    pub fn ip_relative_displacement(&self, operands: &str) -> Option<u64> {
        let start = operands.find('[')?;
        let end = start + operands[start..].find(']')?;
        let inner: String = operands[start + 1..end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        let (base, disp) = inner.split_once('+')?;
        if !self.ip_registers.contains(&base) {
            return None;
        }
        let hex = disp.strip_prefix("0x")?;
        u64::from_str_radix(hex, 16).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn insn(mnemonic: &str, operands: &str) -> Insn {
        Insn::new(0x1000, vec![0x90], Architecture::X86_64, mnemonic, operands).unwrap()
    }

    #[rstest]
    #[case("jmp", "rax", ControlFlowKind::Unconditional)]
    #[case("call", "0x401000", ControlFlowKind::Unconditional)]
    #[case("bnd jmp", "qword ptr [rdx]", ControlFlowKind::Unconditional)]
    #[case("jne", "0x1010", ControlFlowKind::Conditional)]
    #[case("loop", "0x1010", ControlFlowKind::Conditional)]
    #[case("ret", "", ControlFlowKind::None)]
    #[case("pop", "rdi", ControlFlowKind::None)]
    fn test_control_flow_kind(#[case] m: &str, #[case] ops: &str, #[case] kind: ControlFlowKind) {
        assert_eq!(insn(m, ops).control_flow_kind(), kind);
    }

    #[rstest]
    #[case("ret", "", true)]
    #[case("ret", "8", true)]
    #[case("retf", "", true)]
    #[case("RET", "", true)]
    #[case("rep ret", "", true)]
    #[case("retpoline", "", false)]
    fn test_is_return(#[case] m: &str, #[case] ops: &str, #[case] expected: bool) {
        assert_eq!(insn(m, ops).is_return(), expected);
    }

    #[rstest]
    #[case("nop", "", true)]
    #[case("nop", "dword ptr [rax]", true)]
    #[case("mov", "eax, eax", true)]
    #[case("mov", "eax, ebx", false)]
    #[case("xor", "eax, eax", false)]
    fn test_is_nop(#[case] m: &str, #[case] ops: &str, #[case] expected: bool) {
        assert_eq!(insn(m, ops).is_nop(), expected);
    }

    #[rstest]
    #[case("db", "0xff", true)]
    #[case("hlt", "", true)]
    #[case("in", "al, dx", true)]
    #[case("rep insb", "byte ptr [rdi], dx", true)]
    #[case("outsd", "dx, dword ptr [rsi]", true)]
    #[case("insertps", "xmm0, xmm1, 0", false)]
    #[case("add", "eax, 1", false)]
    fn test_is_invalid(#[case] m: &str, #[case] ops: &str, #[case] expected: bool) {
        assert_eq!(insn(m, ops).is_invalid(), expected);
    }

    #[test]
    fn test_register_indirect_branches() {
        assert!(insn("jmp", "rax").is_jmp_reg_uncond());
        assert!(insn("jmp", "qword ptr [rbx + 8]").is_jmp_reg_uncond());
        assert!(!insn("jmp", "qword ptr [rip + 0x2000]").is_jmp_reg_uncond());
        assert!(!insn("jmp", "0x401000").is_jmp_reg_uncond());
        assert!(!insn("je", "0x401000").is_jmp_reg_uncond());

        assert!(insn("call", "rdx").is_call_reg());
        assert!(insn("call", "rdx").reads_or_writes_register_indirectly());
        assert!(!insn("call", "0x401000").is_call_reg());
        assert!(!insn("pop", "rax").reads_or_writes_register_indirectly());
    }

    #[rstest]
    #[case("call", "0x401000", true)]
    #[case("call", "401000h", true)]
    #[case("call", "rax", false)]
    #[case("call", "qword ptr [rip + 0x10]", false)]
    #[case("jmp", "0x401000", false)]
    fn test_is_direct_call(#[case] m: &str, #[case] ops: &str, #[case] expected: bool) {
        assert_eq!(insn(m, ops).is_direct_call(), expected);
    }

    #[test]
    fn test_ip_relative_displacement() {
        let table = PatternTable::for_arch(Architecture::X86_64).unwrap();
        assert_eq!(table.ip_relative_displacement("rax, qword ptr [rip + 0x201ac2]"), Some(0x201ac2));
        assert_eq!(table.ip_relative_displacement("eax,[eip+0x10]"), Some(0x10));
        assert_eq!(table.ip_relative_displacement("rax, qword ptr [rbx + 0x10]"), None);
        assert_eq!(table.ip_relative_displacement("rax, 0x10"), None);
    }

    #[test]
    fn test_no_table_for_unclassified_architectures() {
        assert!(PatternTable::for_arch(Architecture::X86_32).is_some());
        assert!(PatternTable::for_arch(Architecture::Arm).is_none());
        assert!(PatternTable::for_arch(Architecture::Unknown).is_none());
    }
}
