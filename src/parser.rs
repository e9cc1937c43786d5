//! Goblin-based segment source for ELF and PE images.

use std::fmt;

use goblin::elf::{self, program_header::PT_LOAD};
use goblin::pe::{self, section_table::IMAGE_SCN_MEM_EXECUTE};
use goblin::Object;

use crate::{Address, Architecture, GadgetError, ParsedImage, Segment, SegmentSource};

/// Extracts executable segments from ELF and PE images via Goblin.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoblinParser;

impl GoblinParser {
    /// Construct a new GoblinParser.
    pub fn new() -> Self {
        GoblinParser
    }

    /// Executable `PT_LOAD` segments, at their virtual addresses.
    fn parse_elf(&self, elf: &elf::Elf<'_>, img: &[u8]) -> Result<ParsedImage, GadgetError> {
        let architecture = elf_architecture(elf.header.e_machine, elf.header.e_ident[elf::header::EI_CLASS]);

        let mut segments = Vec::new();
        for ph in &elf.program_headers {
            if ph.p_type != PT_LOAD || !ph.is_executable() {
                continue;
            }
            match file_bytes(img, ph.p_offset, ph.p_filesz) {
                Some(data) => segments.push(Segment::new(ph.p_vaddr, data)),
                None => log::warn!(
                    "segment at 0x{:08x} lies outside the file, skipping",
                    ph.p_vaddr
                ),
            }
        }

        Ok(ParsedImage {
            architecture,
            entry_point: Some(elf.entry),
            segments,
        })
    }

    /// Executable sections, at image base plus their RVA.
    fn parse_pe(&self, pe: &pe::PE<'_>, img: &[u8]) -> Result<ParsedImage, GadgetError> {
        let architecture = pe_architecture(pe.header.coff_header.machine);
        let image_base = pe.image_base as Address;

        let mut segments = Vec::new();
        for sect in &pe.sections {
            if sect.characteristics & IMAGE_SCN_MEM_EXECUTE == 0 {
                continue;
            }
            let base = image_base + sect.virtual_address as Address;
            match file_bytes(img, sect.pointer_to_raw_data as u64, sect.size_of_raw_data as u64) {
                Some(data) => segments.push(Segment::new(base, data)),
                None => log::warn!(
                    "section {} lies outside the file, skipping",
                    sect.name().unwrap_or("?")
                ),
            }
        }

        Ok(ParsedImage {
            architecture,
            entry_point: Some(image_base + pe.entry as Address),
            segments,
        })
    }
}

/// The file bytes `offset..offset + size`, if they are all present.
fn file_bytes(img: &[u8], offset: u64, size: u64) -> Option<Vec<u8>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    img.get(start..end).map(<[u8]>::to_vec)
}

/// Architecture named by an ELF `e_machine`, using the ELF class for RISC-V.
pub fn elf_architecture(machine: u16, class: u8) -> Architecture {
    match machine {
        elf::header::EM_386 => Architecture::X86_32,
        elf::header::EM_X86_64 => Architecture::X86_64,
        elf::header::EM_ARM => Architecture::Arm,
        elf::header::EM_AARCH64 => Architecture::AArch64,
        elf::header::EM_MIPS => Architecture::Mips32,
        elf::header::EM_PPC => Architecture::Ppc32,
        elf::header::EM_RISCV => match class {
            elf::header::ELFCLASS32 => Architecture::RiscV32,
            elf::header::ELFCLASS64 => Architecture::RiscV64,
            _ => Architecture::Unknown,
        },
        _ => Architecture::Unknown,
    }
}

/// Architecture named by a COFF machine field.
pub fn pe_architecture(machine: u16) -> Architecture {
    match machine {
        pe::header::COFF_MACHINE_X86 => Architecture::X86_32,
        pe::header::COFF_MACHINE_X86_64 => Architecture::X86_64,
        pe::header::COFF_MACHINE_ARM => Architecture::Arm,
        pe::header::COFF_MACHINE_ARM64 => Architecture::AArch64,
        _ => Architecture::Unknown,
    }
}

impl fmt::Display for GoblinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinParser")
    }
}

impl SegmentSource for GoblinParser {
    fn segments(&self, data: &[u8]) -> Result<ParsedImage, GadgetError> {
        let parsed = match Object::parse(data) {
            Ok(Object::Elf(elf)) => self.parse_elf(&elf, data)?,
            Ok(Object::PE(pe)) => self.parse_pe(&pe, data)?,
            Ok(_) => return Err(GadgetError::Parsing("Unsupported file format".into())),
            Err(e) => return Err(GadgetError::Parsing(e.to_string())),
        };
        log::debug!(
            "{} image with {} executable segments",
            parsed.architecture,
            parsed.segments.len()
        );
        Ok(parsed)
    }
}
