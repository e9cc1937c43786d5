//! JSON and JSON Lines output formatters

use serde::{Deserialize, Serialize};

use super::{GadgetFormatter, JsonFormatter, JsonLinesFormatter};
use crate::gadget::Gadget;
use crate::classify::ControlFlowKind;
use crate::{GadgetError, Insn};

/// Serializable instruction for JSON output
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct InstructionJson {
    /// Address of the instruction
    pub address: String,
    /// Size of the instruction in bytes
    pub size: usize,
    /// Mnemonic (e.g., "mov", "add")
    pub mnemonic: String,
    /// Operands
    pub operands: String,
    /// Bytes of the instruction as hex string
    pub bytes: String,
    /// Kind of control transfer, if any
    pub control_flow: ControlFlowKind,
    /// Resolved address of an instruction-pointer-relative operand
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
}

/// Serializable gadget for JSON output
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GadgetJson {
    /// Address of the first instruction
    pub address: String,
    /// Address of the terminal sequence
    pub base_address: String,
    /// Bytes between the first instruction and the terminal sequence
    pub back_offset: usize,
    pub architecture: String,
    /// One-line summary, instructions joined by `; `
    pub text: String,
    pub instructions: Vec<InstructionJson>,
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

/// Convert an instruction to JSON format
fn instruction_to_json(insn: &Insn) -> InstructionJson {
    InstructionJson {
        address: format!("0x{:x}", insn.address()),
        size: insn.len(),
        mnemonic: insn.mnemonic().to_string(),
        operands: insn.operands().to_string(),
        bytes: hex_bytes(insn.bytes()),
        control_flow: insn.control_flow_kind(),
        target: insn.ip_relative_target().map(|t| format!("0x{:x}", t)),
    }
}

/// Convert a gadget to JSON format
pub fn gadget_to_json(gadget: &Gadget) -> GadgetJson {
    let insns = gadget.insns();
    let text = insns.iter().map(Insn::to_string).collect::<Vec<_>>().join("; ");
    GadgetJson {
        address: format!("0x{:x}", gadget.start_address()),
        base_address: format!("0x{:x}", gadget.base_address()),
        back_offset: gadget.back_offset(),
        architecture: gadget.architecture().to_string(),
        text,
        instructions: insns.iter().map(instruction_to_json).collect(),
    }
}

impl GadgetFormatter for JsonFormatter {
    fn format(&self, gadgets: &[Gadget]) -> Result<String, GadgetError> {
        let result: Vec<GadgetJson> = gadgets.iter().map(gadget_to_json).collect();
        Ok(serde_json::to_string_pretty(&result)?)
    }
}

impl GadgetFormatter for JsonLinesFormatter {
    fn format(&self, gadgets: &[Gadget]) -> Result<String, GadgetError> {
        let mut output = String::new();
        for gadget in gadgets {
            output.push_str(&serde_json::to_string(&gadget_to_json(gadget))?);
            output.push('\n');
        }
        Ok(output)
    }
}
