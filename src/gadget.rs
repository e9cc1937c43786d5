//! The gadget value produced by backward search.

use std::fmt;
use std::sync::Arc;

use crate::{Address, Architecture, Disassembler, Insn};

/// An instruction sequence that realigns onto an occurrence of the target.
///
/// A gadget only stores bytes; its instructions are decoded on demand with
/// the decoder that found it. Like [`Insn`] it cannot be changed once built:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use realign::{decoder::CapstoneBackend, gadget::Gadget, Architecture};
///
/// let decoder = Arc::new(CapstoneBackend::new(Architecture::X86_64).unwrap());
/// let mut gadget = Gadget::new(vec![0xc3], 0x1001, 1, vec![0x5f, 0xc3], decoder);
/// gadget.back_offset = 2;
/// ```
#[derive(Debug, Clone)]
pub struct Gadget {
    terminal: Vec<u8>,
    base_address: Address,
    back_offset: usize,
    window: Vec<u8>,
    decoder: Arc<dyn Disassembler>,
}

impl Gadget {
    /// Create a gadget starting `back_offset` bytes before the occurrence of
    /// `terminal` at `base_address`. `window` covers both.
    pub fn new(
        terminal: Vec<u8>,
        base_address: Address,
        back_offset: usize,
        window: Vec<u8>,
        decoder: Arc<dyn Disassembler>,
    ) -> Self {
        debug_assert!(window.ends_with(&terminal));
        debug_assert_eq!(window.len(), terminal.len() + back_offset);
        Self {
            terminal,
            base_address,
            back_offset,
            window,
            decoder,
        }
    }

    /// Bytes of the control-transfer sequence the gadget ends in
    pub fn terminal_sequence(&self) -> &[u8] {
        &self.terminal
    }

    /// Address of the terminal occurrence
    pub fn base_address(&self) -> Address {
        self.base_address
    }

    /// Bytes between the gadget start and the terminal occurrence
    pub fn back_offset(&self) -> usize {
        self.back_offset
    }

    /// Every byte of the gadget, terminal sequence included
    pub fn window_bytes(&self) -> &[u8] {
        &self.window
    }

    pub fn architecture(&self) -> Architecture {
        self.decoder.architecture()
    }

    /// Address of the first instruction
    pub fn start_address(&self) -> Address {
        self.base_address - self.back_offset as Address
    }

    /// Decoded instructions, first to last.
    pub fn insns(&self) -> Vec<Insn> {
        self.decoder.decode_all(self.start_address(), &self.window)
    }

    /// Decoded instructions, last to first.
    pub fn rev_insns(&self) -> Vec<Insn> {
        let mut insns = self.insns();
        insns.reverse();
        insns
    }

    /// Multi-line disassembly, one instruction per line.
    pub fn listing(&self) -> String {
        self.insns()
            .iter()
            .map(Insn::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Gadget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.architecture().pointer_width() * 2;
        write!(f, "0x{:0width$x}:", self.start_address(), width = width)?;
        for insn in self.insns() {
            write!(f, " {};", insn)?;
        }
        Ok(())
    }
}
