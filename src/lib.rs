//! Core types, traits, and errors for the realign gadget finder.
//!
//! realign discovers return-oriented-programming gadgets by scanning executable
//! segments for a terminal opcode (usually `ret`) and walking backwards from
//! every occurrence, re-disassembling at each earlier offset until the decoded
//! instruction stream realigns onto the occurrence. Redundant gadgets that share
//! an instruction suffix are collapsed to their longest representatives.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use realign::{
//!     parser::GoblinParser,
//!     registry::Registry,
//!     search::GadgetFinder,
//!     config::SearchConfig,
//!     SegmentSource, // Import the trait to bring segments() into scope
//! };
//!
//! let image = fs::read("path/to/binary").unwrap();
//! let parsed = GoblinParser::new().segments(&image).unwrap();
//!
//! // Resolve a decoder once, then share it for the whole scan
//! let registry = Registry::with_default_backends();
//! let finder = GadgetFinder::new(&registry, parsed.architecture, SearchConfig::default()).unwrap();
//!
//! for gadget in finder.find(&parsed.segments, &[0xc3]) {
//!     println!("{}", gadget.listing());
//! }
//! ```

pub mod classify;
pub mod config;
pub mod decoder;
pub mod format;
pub mod gadget;
pub mod parser;
pub mod registry;
pub mod scanner;
pub mod search;
#[cfg(test)]
mod testing;

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::classify::{ControlFlowKind, PatternTable};

/// Represents an address in memory
pub type Address = u64;

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[non_exhaustive]
pub enum Architecture {
    /// 32-bit x86
    #[value(name = "x86")]
    X86_32,
    /// 64-bit x86
    #[value(name = "x86-64")]
    X86_64,
    /// ARM (32-bit)
    Arm,
    /// ARM Thumb mode
    Thumb,
    /// AArch64 (ARM 64-bit)
    #[value(name = "aarch64")]
    AArch64,
    /// MIPS 32-bit
    Mips32,
    /// RISC-V 32-bit
    #[value(name = "riscv32")]
    RiscV32,
    /// RISC-V 64-bit
    #[value(name = "riscv64")]
    RiscV64,
    /// PowerPC 32-bit
    Ppc32,
    /// Unknown architecture
    #[value(skip)]
    Unknown,
}

impl Architecture {
    /// Width of a code address in bytes.
    pub fn pointer_width(&self) -> usize {
        match self {
            Architecture::X86_64 | Architecture::AArch64 | Architecture::RiscV64 => 8,
            _ => 4,
        }
    }

    /// The classification table for this architecture, if one exists.
    ///
    /// Backends refuse architectures without a table, so every `Insn` can
    /// answer every predicate.
    pub fn patterns(&self) -> Option<&'static PatternTable> {
        PatternTable::for_arch(*self)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::X86_64 => write!(f, "x86-64"),
            Architecture::Arm => write!(f, "ARM"),
            Architecture::Thumb => write!(f, "Thumb"),
            Architecture::AArch64 => write!(f, "AArch64"),
            Architecture::Mips32 => write!(f, "MIPS32"),
            Architecture::RiscV32 => write!(f, "RISC-V 32"),
            Architecture::RiscV64 => write!(f, "RISC-V 64"),
            Architecture::Ppc32 => write!(f, "PowerPC 32"),
            Architecture::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A contiguous run of executable bytes with its load address.
///
/// Fields are private and there are no setters, so a segment cannot change
/// once a scan holds it:
///
/// ```compile_fail
/// let mut seg = realign::Segment::new(0x1000, vec![0xc3]);
/// seg.base_address = 0x2000;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    base_address: Address,
    data: Vec<u8>,
}

impl Segment {
    /// Create a new segment
    pub fn new(base_address: Address, data: impl Into<Vec<u8>>) -> Self {
        Self {
            base_address,
            data: data.into(),
        }
    }

    /// Address of the first byte
    pub fn base_address(&self) -> Address {
        self.base_address
    }

    /// Raw segment bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the segment in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the segment holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address one past the last byte
    pub fn end_address(&self) -> Address {
        self.base_address + self.data.len() as Address
    }
}

/// One decoded instruction.
///
/// Equality and hashing cover `(bytes, address, architecture)` only; the
/// textual form is derived from those by the decoder. Use [`Insn::same`] to
/// compare two instructions while ignoring where they sit.
///
/// An `Insn` is frozen at construction:
///
/// ```compile_fail
/// let arch = realign::Architecture::X86_64;
/// let mut insn = realign::Insn::new(0x1000, vec![0xc3], arch, "ret", "").unwrap();
/// insn.address = 0x2000;
/// ```
#[derive(Debug, Clone)]
pub struct Insn {
    address: Address,
    bytes: Vec<u8>,
    arch: Architecture,
    mnemonic: String,
    operands: String,
    table: &'static PatternTable,
}

impl Insn {
    /// Build an instruction from decoder output.
    ///
    /// Fails when the encoding is empty or longer than
    /// [`MAX_INSTRUCTION_SIZE`], or when `arch` has no classification table.
    pub fn new(
        address: Address,
        bytes: impl Into<Vec<u8>>,
        arch: Architecture,
        mnemonic: impl Into<String>,
        operands: impl Into<String>,
    ) -> Result<Self, GadgetError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_INSTRUCTION_SIZE {
            return Err(GadgetError::MalformedInstruction(format!(
                "{} encoding bytes at 0x{:x}",
                bytes.len(),
                address
            )));
        }
        let table = arch.patterns().ok_or_else(|| {
            GadgetError::MalformedInstruction(format!("no instruction patterns for {}", arch))
        })?;

        Ok(Self {
            address,
            bytes,
            arch,
            mnemonic: mnemonic.into().trim().to_lowercase(),
            operands: operands.into().trim().to_string(),
            table,
        })
    }

    /// A one-byte marker for a byte the decoder could not make sense of.
    pub fn undecodable(address: Address, byte: u8, arch: Architecture) -> Result<Self, GadgetError> {
        Self::new(address, vec![byte], arch, "db", format!("0x{:02x}", byte))
    }

    /// Address of the instruction
    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw encoding
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoding length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; an instruction has at least one byte.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Architecture the instruction was decoded for
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// Lower-case mnemonic, including any prefixes (e.g. `rep stosb`)
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Operand text as the decoder printed it
    pub fn operands(&self) -> &str {
        &self.operands
    }

    /// Address of the following instruction
    pub fn end_address(&self) -> Address {
        self.address + self.bytes.len() as Address
    }

    /// Same encoding and architecture, regardless of address.
    pub fn same(&self, other: &Insn) -> bool {
        self.bytes == other.bytes && self.arch == other.arch
    }

    /// How this instruction transfers control, if at all.
    pub fn control_flow_kind(&self) -> ControlFlowKind {
        self.table.control_flow_kind(self)
    }

    /// Any conditional or unconditional jump or call.
    pub fn has_control_flow(&self) -> bool {
        self.control_flow_kind() != ControlFlowKind::None
    }

    pub fn is_return(&self) -> bool {
        self.table.is_return(self)
    }

    pub fn is_nop(&self) -> bool {
        self.table.is_nop(self)
    }

    /// Undecodable bytes and instructions excluded by policy (I/O, halt).
    pub fn is_invalid(&self) -> bool {
        self.table.is_invalid(self)
    }

    /// Unconditional jump whose target comes from a register.
    pub fn is_jmp_reg_uncond(&self) -> bool {
        self.table.is_jmp_reg_uncond(self)
    }

    /// Call whose target comes from a register.
    pub fn is_call_reg(&self) -> bool {
        self.table.is_call_reg(self)
    }

    /// Call to an immediate, hard-coded target.
    pub fn is_direct_call(&self) -> bool {
        self.table.is_direct_call(self)
    }

    /// Jump or call routed through a register, the links of a JOP/COP chain.
    pub fn reads_or_writes_register_indirectly(&self) -> bool {
        self.is_jmp_reg_uncond() || self.is_call_reg()
    }

    /// Absolute address of an instruction-pointer relative memory operand.
    pub fn ip_relative_target(&self) -> Option<Address> {
        let disp = self.table.ip_relative_displacement(&self.operands)?;
        Some(self.end_address().wrapping_add(disp as Address))
    }

    /// Listing line: address, hex bytes, text, and a resolved-address comment.
    pub fn display(&self) -> String {
        let width = self.arch.pointer_width() * 2;
        let addr = format!("{:0width$x}", self.address, width = width);
        let hex: String = self.bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let comment = match self.ip_relative_target() {
            Some(target) => format!(" ; 0x{:0width$x}", target, width = width),
            None => String::new(),
        };

        format!("    {:<16}  {:<23}{}{}", addr, hex, self, comment)
    }
}

impl PartialEq for Insn {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.address == other.address && self.arch == other.arch
    }
}

impl Eq for Insn {}

impl Hash for Insn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
        self.address.hash(state);
        self.arch.hash(state);
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operands)
        }
    }
}

/// Lazy, single-pass stream of decoded instructions.
pub type InsnStream<'a> = Box<dyn Iterator<Item = Insn> + 'a>;

/// Decoder trait: architecture-specific disassembler backend.
///
/// Implementations must be re-entrant: one resolved instance is shared by
/// every worker of a parallel scan.
pub trait Disassembler: Send + Sync + fmt::Debug {
    /// Registry name of the backend that built this decoder
    fn name(&self) -> &'static str;

    /// Architecture this decoder was built for
    fn architecture(&self) -> Architecture;

    /// Decode `bytes` as if loaded at `address`.
    ///
    /// Undecodable bytes come out as one-byte `db` markers; the stream ends
    /// when the bytes run out or only a truncated instruction remains.
    fn decode<'a>(&'a self, address: Address, bytes: &'a [u8]) -> InsnStream<'a>;

    /// Decode eagerly into a vector.
    fn decode_all(&self, address: Address, bytes: &[u8]) -> Vec<Insn> {
        self.decode(address, bytes).collect()
    }
}

/// Executable segments extracted from an object file.
#[derive(Debug, Clone)]
pub struct ParsedImage {
    /// Detected architecture
    pub architecture: Architecture,
    /// Entry point address, if available
    pub entry_point: Option<Address>,
    /// Executable segments in file order
    pub segments: Vec<Segment>,
}

/// Parser trait: turn an object file into executable segments.
pub trait SegmentSource: Send + Sync {
    /// Extract the executable segments of `data`
    fn segments(&self, data: &[u8]) -> Result<ParsedImage, GadgetError>;
}

/// Error type for gadget search operations
#[derive(Debug, thiserror::Error)]
pub enum GadgetError {
    /// No registered backend can decode the architecture
    #[error("could not find a disassembler for {arch} (tried: {attempted:?})")]
    ArchitectureNotSupported {
        arch: Architecture,
        attempted: Vec<String>,
    },

    /// A rank override named a backend that is not registered
    #[error("invalid backend name {0:?}")]
    InvalidBackend(String),

    /// The terminal byte sequence does not decode on its own
    #[error("invalid instruction sequence at 0x{address:x}: {bytes:02x?}")]
    InvalidInstructionSequence { address: Address, bytes: Vec<u8> },

    /// A match does not point at the target sequence
    #[error("target sequence not found at 0x{address:x}")]
    TargetMismatch { address: Address },

    /// Decoder output that cannot form an instruction
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),

    /// Failed to parse binary format
    #[error("Failed to parse binary format: {0}")]
    Parsing(String),

    /// Bad configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
