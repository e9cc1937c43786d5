//! Ranked registry of disassembler backends.
//!
//! A `Registry` is an ordinary value: build one at startup (usually with
//! [`Registry::with_default_backends`]) and pass it to whatever needs to
//! resolve a decoder. Tests build their own with fake backends.

use std::fmt;
use std::sync::Arc;

use crate::decoder::CapstoneBackend;
use crate::{Architecture, Disassembler, GadgetError};

/// Why a single backend could not serve a request. Recovered inside
/// [`Registry::resolve`]; never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend's decoding library is missing or failed to load
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend works but cannot decode this architecture
    #[error("architecture not supported: {0}")]
    ArchitectureNotSupported(Architecture),
}

/// Builds a decoder for an architecture.
pub type Constructor =
    Box<dyn Fn(Architecture) -> Result<Arc<dyn Disassembler>, BackendError> + Send + Sync>;

struct Entry {
    name: String,
    rank: i32,
    constructor: Constructor,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .finish_non_exhaustive()
    }
}

/// Backends in registration order; resolution walks them by descending rank.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends: `capstone` (rank 10) and
    /// `iced` (rank 5).
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register(CapstoneBackend::NAME, 10, |arch| {
            CapstoneBackend::new(arch).map(|d| Arc::new(d) as Arc<dyn Disassembler>)
        });
        registry.register("iced", 5, try_iced);
        registry
    }

    /// Add a backend. Registering an existing name replaces it in place,
    /// keeping its position for tie-breaks.
    pub fn register<F>(&mut self, name: &str, rank: i32, constructor: F)
    where
        F: Fn(Architecture) -> Result<Arc<dyn Disassembler>, BackendError> + Send + Sync + 'static,
    {
        let entry = Entry {
            name: name.to_string(),
            rank,
            constructor: Box::new(constructor),
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Change the rank of a registered backend.
    pub fn set_rank(&mut self, name: &str, rank: i32) -> Result<(), GadgetError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| GadgetError::InvalidBackend(name.to_string()))?;
        entry.rank = rank;
        Ok(())
    }

    /// Rank of a backend, if registered
    pub fn rank(&self, name: &str) -> Option<i32> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.rank)
    }

    /// Backend names in the order `resolve` tries them.
    pub fn backend_names(&self) -> Vec<&str> {
        self.ordered().map(|e| e.name.as_str()).collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &Entry> {
        let mut entries: Vec<&Entry> = self.entries.iter().collect();
        // sort_by is stable, so equal ranks stay in registration order
        entries.sort_by(|a, b| b.rank.cmp(&a.rank));
        entries.into_iter()
    }

    /// Build a decoder for `arch` from the highest-ranked backend that can.
    pub fn resolve(&self, arch: Architecture) -> Result<Arc<dyn Disassembler>, GadgetError> {
        let mut attempted = Vec::new();

        for entry in self.ordered() {
            match (entry.constructor)(arch) {
                Ok(dasm) => {
                    log::debug!("resolved {} decoder from backend {:?}", arch, entry.name);
                    return Ok(dasm);
                }
                Err(BackendError::Unavailable(reason)) => {
                    log::debug!("skipping backend {:?}: {}", entry.name, reason);
                }
                Err(BackendError::ArchitectureNotSupported(_)) => {
                    log::debug!("backend {:?} does not support {}", entry.name, arch);
                    attempted.push(entry.name.clone());
                }
            }
        }

        Err(GadgetError::ArchitectureNotSupported { arch, attempted })
    }

    /// Build a decoder from one named backend, bypassing rank order.
    pub fn resolve_with(
        &self,
        name: &str,
        arch: Architecture,
    ) -> Result<Arc<dyn Disassembler>, GadgetError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| GadgetError::InvalidBackend(name.to_string()))?;

        (entry.constructor)(arch).map_err(|e| {
            log::debug!("backend {:?} failed: {}", name, e);
            GadgetError::ArchitectureNotSupported {
                arch,
                attempted: vec![name.to_string()],
            }
        })
    }
}

#[cfg(feature = "iced")]
fn try_iced(arch: Architecture) -> Result<Arc<dyn Disassembler>, BackendError> {
    crate::decoder::IcedBackend::new(arch).map(|d| Arc::new(d) as Arc<dyn Disassembler>)
}

#[cfg(not(feature = "iced"))]
fn try_iced(_arch: Architecture) -> Result<Arc<dyn Disassembler>, BackendError> {
    Err(BackendError::Unavailable("built without the `iced` feature".to_string()))
}
