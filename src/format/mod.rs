//! Output formats for gadget listings

mod json;

pub use self::json::*;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::gadget::Gadget;
use crate::GadgetError;

/// Supported output formats for search results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text listing (default)
    #[default]
    Text,
    /// JSON array of gadgets
    Json,
    /// JSON Lines format (one gadget per line)
    #[value(name = "jsonl")]
    JsonLines,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get a formatter for this output format
    pub fn formatter(&self) -> Box<dyn GadgetFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
        }
    }
}

/// Formatter trait for gadget output
pub trait GadgetFormatter {
    /// Render a batch of gadgets
    fn format(&self, gadgets: &[Gadget]) -> Result<String, GadgetError>;
}

/// Listing per gadget, separated by blank lines
pub struct TextFormatter;

/// Pretty-printed JSON array
pub struct JsonFormatter;

/// One compact JSON object per gadget
pub struct JsonLinesFormatter;

impl GadgetFormatter for TextFormatter {
    fn format(&self, gadgets: &[Gadget]) -> Result<String, GadgetError> {
        let mut output = String::new();

        for gadget in gadgets {
            output.push_str(&format!("{}\n", gadget));
            output.push_str(&gadget.listing());
            output.push_str("\n\n");
        }
        output.push_str(&format!("{} gadgets found\n", gadgets.len()));

        Ok(output)
    }
}
