//! Naive byte-window scan for a target sequence.

use crate::{Address, Segment};

/// One occurrence of the target sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'a> {
    /// Segment containing the occurrence
    pub segment: &'a Segment,
    /// Byte offset of the occurrence within the segment
    pub offset: usize,
}

impl Match<'_> {
    /// Load address of the occurrence
    pub fn address(&self) -> Address {
        self.segment.base_address() + self.offset as Address
    }
}

/// Every occurrence of `needle` in one segment, ascending. Overlapping
/// occurrences are all reported.
pub fn scan_segment<'a>(segment: &'a Segment, needle: &'a [u8]) -> impl Iterator<Item = Match<'a>> + 'a {
    // windows(0) would panic; an empty needle matches nothing
    let size = needle.len().max(1);
    segment
        .data()
        .windows(size)
        .enumerate()
        .filter(move |(_, window)| !needle.is_empty() && *window == needle)
        .map(move |(offset, _)| Match { segment, offset })
}

/// Every occurrence of `needle` across `segments`, in input order.
pub fn scan<'a>(segments: &'a [Segment], needle: &'a [u8]) -> impl Iterator<Item = Match<'a>> + 'a {
    segments.iter().flat_map(move |segment| {
        log::debug!(
            "search {} bytes starting at 0x{:08x}",
            segment.len(),
            segment.base_address()
        );
        scan_segment(segment, needle)
    })
}
