//! Search parameters and the bad-instruction policy.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{GadgetError, Insn};

/// Default number of bytes to walk back from each occurrence
pub const DEFAULT_MAX_BACK: usize = 20;

/// Which instructions disqualify a candidate gadget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    /// Reject undecodable bytes, I/O instructions and `hlt`
    pub reject_invalid: bool,
    /// Reject calls to hard-coded addresses
    pub reject_direct_calls: bool,
    /// Further mnemonics to reject, matched without prefixes
    pub extra_bad_mnemonics: Vec<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            reject_invalid: true,
            reject_direct_calls: true,
            extra_bad_mnemonics: Vec::new(),
        }
    }
}

impl FilterPolicy {
    /// Accept everything.
    pub fn permissive() -> Self {
        Self {
            reject_invalid: false,
            reject_direct_calls: false,
            extra_bad_mnemonics: Vec::new(),
        }
    }

    /// True if `insn` may not appear in a gadget.
    pub fn is_bad(&self, insn: &Insn) -> bool {
        if self.reject_invalid && insn.is_invalid() {
            return true;
        }
        if self.reject_direct_calls && insn.is_direct_call() {
            return true;
        }
        if self.extra_bad_mnemonics.is_empty() {
            return false;
        }
        let base = insn
            .architecture()
            .patterns()
            .map(|table| table.base_mnemonic(insn.mnemonic()))
            .unwrap_or(insn.mnemonic());
        self.extra_bad_mnemonics
            .iter()
            .any(|bad| bad.eq_ignore_ascii_case(base))
    }

    /// True if any instruction of the sequence is bad.
    pub fn has_bad(&self, insns: &[Insn]) -> bool {
        insns.iter().any(|insn| self.is_bad(insn))
    }
}

/// Parameters for one gadget search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of bytes to search backward from each occurrence
    pub max_back: usize,
    /// Instruction blacklist
    pub policy: FilterPolicy,
    /// Search occurrences on the rayon thread pool
    pub parallel: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_back: DEFAULT_MAX_BACK,
            policy: FilterPolicy::default(),
            parallel: false,
        }
    }
}

impl SearchConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GadgetError> {
        let text = fs::read_to_string(path)?;
        let config: SearchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that make the search meaningless.
    pub fn validate(&self) -> Result<(), GadgetError> {
        if self.max_back == 0 {
            return Err(GadgetError::Config("max_back must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Architecture;
    use std::io::Write;

    fn insn(bytes: &[u8], mnemonic: &str, operands: &str) -> Insn {
        Insn::new(0x1000, bytes.to_vec(), Architecture::X86_64, mnemonic, operands).unwrap()
    }

    #[test]
    fn test_default_policy() {
        let policy = FilterPolicy::default();
        assert!(policy.is_bad(&insn(&[0x06], "db", "0x06")));
        assert!(policy.is_bad(&insn(&[0xf4], "hlt", "")));
        assert!(policy.is_bad(&insn(&[0xe8, 0, 0, 0, 0], "call", "0x1005")));
        assert!(!policy.is_bad(&insn(&[0xff, 0xd0], "call", "rax")));
        assert!(!policy.is_bad(&insn(&[0x5f], "pop", "rdi")));
    }

    #[test]
    fn test_permissive_policy() {
        let policy = FilterPolicy::permissive();
        assert!(!policy.is_bad(&insn(&[0x06], "db", "0x06")));
        assert!(!policy.is_bad(&insn(&[0xe8, 0, 0, 0, 0], "call", "0x1005")));
    }

    #[test]
    fn test_extra_bad_mnemonics() {
        let policy = FilterPolicy {
            extra_bad_mnemonics: vec!["SYSCALL".into(), "stosb".into()],
            ..FilterPolicy::default()
        };
        assert!(policy.is_bad(&insn(&[0x0f, 0x05], "syscall", "")));
        assert!(policy.is_bad(&insn(&[0xf3, 0xaa], "rep stosb", "")));
        assert!(!policy.has_bad(&[insn(&[0x5f], "pop", "rdi"), insn(&[0xc3], "ret", "")]));
    }

    #[test]
    fn test_config_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_back": 12, "policy": {{"reject_direct_calls": false}}}}"#).unwrap();

        let config = SearchConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_back, 12);
        assert!(!config.parallel);
        assert!(config.policy.reject_invalid);
        assert!(!config.policy.reject_direct_calls);
    }

    #[test]
    fn test_config_rejects_zero_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_back": 0}}"#).unwrap();

        assert!(matches!(
            SearchConfig::from_json_file(file.path()),
            Err(GadgetError::Config(_))
        ));
    }

    #[test]
    fn test_config_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            SearchConfig::from_json_file(file.path()),
            Err(GadgetError::Json(_))
        ));
    }
}
