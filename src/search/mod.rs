//! The gadget search pipeline: scan, backward search, reduce.

pub mod backward;
pub mod reduce;

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::config::SearchConfig;
use crate::gadget::Gadget;
use crate::registry::Registry;
use crate::scanner::{scan, Match};
use crate::{Architecture, Disassembler, GadgetError, Segment};

pub use backward::backward_search;
pub use reduce::{maximal_unique, maximal_unique_by};

/// Finds gadgets for one architecture with one resolved decoder.
///
/// The decoder is resolved once and shared by every match, on every worker
/// thread when searching in parallel.
#[derive(Debug, Clone)]
pub struct GadgetFinder {
    decoder: Arc<dyn Disassembler>,
    config: SearchConfig,
}

impl GadgetFinder {
    /// Validate `config` and resolve a decoder for `arch` from `registry`.
    pub fn new(registry: &Registry, arch: Architecture, config: SearchConfig) -> Result<Self, GadgetError> {
        config.validate()?;
        let decoder = registry.resolve(arch)?;
        log::info!("using {} backend for {}", decoder.name(), arch);
        Ok(Self { decoder, config })
    }

    /// Use an already resolved decoder.
    pub fn with_disassembler(decoder: Arc<dyn Disassembler>, config: SearchConfig) -> Result<Self, GadgetError> {
        config.validate()?;
        Ok(Self { decoder, config })
    }

    pub fn disassembler(&self) -> &Arc<dyn Disassembler> {
        &self.decoder
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Backward search from a single occurrence of `target`.
    pub fn search_match(&self, m: Match<'_>, target: &[u8]) -> Result<Vec<Gadget>, GadgetError> {
        backward_search(&self.decoder, m, target, &self.config)
    }

    /// Search one occurrence, logging and discarding a per-match failure so
    /// the rest of the scan carries on.
    fn search_or_skip(&self, m: Match<'_>, target: &[u8]) -> Vec<Gadget> {
        match self.search_match(m, target) {
            Ok(gadgets) => gadgets,
            Err(e) => {
                log::warn!("skipping match at 0x{:08x}: {}", m.address(), e);
                Vec::new()
            }
        }
    }

    /// Lazily yield every gadget ending in `target`, in segment order then
    /// match order.
    pub fn find<'a>(&'a self, segments: &'a [Segment], target: &'a [u8]) -> impl Iterator<Item = Gadget> + 'a {
        scan(segments, target).flat_map(move |m| self.search_or_skip(m, target))
    }

    /// Same result as [`find`](Self::find), with matches searched on the
    /// rayon thread pool.
    pub fn find_par(&self, segments: &[Segment], target: &[u8]) -> Vec<Gadget> {
        let matches: Vec<Match<'_>> = scan(segments, target).collect();
        log::debug!("searching {} matches in parallel", matches.len());

        let per_match: Vec<Vec<Gadget>> = matches
            .par_iter()
            .map(|m| self.search_or_skip(*m, target))
            .collect();

        per_match.into_iter().flatten().collect()
    }

    /// Collect every gadget, sequentially or in parallel per the config.
    pub fn collect(&self, segments: &[Segment], target: &[u8]) -> Vec<Gadget> {
        let start_time = Instant::now();
        let gadgets = if self.config.parallel {
            self.find_par(segments, target)
        } else {
            self.find(segments, target).collect()
        };

        let total: usize = segments.iter().map(Segment::len).sum();
        log::info!(
            "found {} gadgets in {} bytes across {} segments in {:?}",
            gadgets.len(),
            total,
            segments.len(),
            start_time.elapsed()
        );
        gadgets
    }
}
