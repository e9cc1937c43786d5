//! Decoder backends implementing [`Disassembler`](crate::Disassembler).
//!
//! Backends only know how to decode a single instruction at the front of a
//! byte slice. [`StepStream`] turns that into the full stream contract: bad
//! bytes become `db` markers and a truncated tail ends the stream.

pub mod capstone;
#[cfg(feature = "iced")]
pub mod iced;

pub use self::capstone::CapstoneBackend;
#[cfg(feature = "iced")]
pub use self::iced::IcedBackend;

use crate::{Address, Architecture, Insn};

/// Outcome of decoding one instruction at the front of a slice.
#[derive(Debug)]
pub(crate) enum Step {
    /// A complete instruction
    Insn(Insn),
    /// The leading byte does not start any instruction
    Undecodable,
    /// The bytes start an instruction that runs past the end of the slice
    Truncated,
}

/// Drives a single-instruction decode function across a byte slice.
pub(crate) struct StepStream<'a, F> {
    bytes: &'a [u8],
    address: Address,
    arch: Architecture,
    pos: usize,
    step: F,
    done: bool,
}

impl<'a, F> StepStream<'a, F>
where
    F: FnMut(&'a [u8], Address) -> Step,
{
    pub(crate) fn new(bytes: &'a [u8], address: Address, arch: Architecture, step: F) -> Self {
        Self {
            bytes,
            address,
            arch,
            pos: 0,
            step,
            done: false,
        }
    }
}

impl<'a, F> Iterator for StepStream<'a, F>
where
    F: FnMut(&'a [u8], Address) -> Step,
{
    type Item = Insn;

    fn next(&mut self) -> Option<Insn> {
        if self.done || self.pos >= self.bytes.len() {
            return None;
        }

        let at = self.address + self.pos as Address;
        let insn = match (self.step)(&self.bytes[self.pos..], at) {
            Step::Insn(insn) => insn,
            Step::Undecodable => match Insn::undecodable(at, self.bytes[self.pos], self.arch) {
                Ok(insn) => insn,
                Err(e) => {
                    log::warn!("stopping decode at 0x{:x}: {}", at, e);
                    self.done = true;
                    return None;
                }
            },
            Step::Truncated => {
                self.done = true;
                return None;
            }
        };

        // Avoid infinite loop from zero-sized instructions
        self.pos += insn.len().max(1);
        Some(insn)
    }
}
