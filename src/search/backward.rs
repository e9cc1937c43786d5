//! Backward search from one occurrence of the target sequence.

use std::sync::Arc;

use crate::config::SearchConfig;
use crate::gadget::Gadget;
use crate::scanner::Match;
use crate::{Address, Disassembler, GadgetError, Insn};

use super::reduce::maximal_unique;

/// Find every gadget that realigns onto the occurrence `m` of `target`.
///
/// For each back offset `i` in `1..=max_back` (clamped so the window never
/// starts before the segment), the bytes from `i` before the occurrence to
/// its end are decoded. A window yields a gadget when it decodes to more
/// instructions than `target` alone, its trailing instructions equal the
/// reference decode, and no instruction is rejected by the filter policy.
/// The scan stops at the first window that starts with the reference
/// sequence as well as ending with it. Survivors go through
/// [`maximal_unique`].
pub fn backward_search(
    decoder: &Arc<dyn Disassembler>,
    m: Match<'_>,
    target: &[u8],
    config: &SearchConfig,
) -> Result<Vec<Gadget>, GadgetError> {
    let data = m.segment.data();
    let offset = m.offset;
    let end = offset + target.len();
    let base = m.address();

    if data.get(offset..end) != Some(target) {
        return Err(GadgetError::TargetMismatch { address: base });
    }

    let reference = decoder.decode_all(base, target);
    if reference.is_empty() {
        return Err(GadgetError::InvalidInstructionSequence {
            address: base,
            bytes: target.to_vec(),
        });
    }
    let ref_len = reference.len();

    log::debug!(
        "backward search from 0x{:08x} for sequences ending in {:?}",
        base,
        reference.iter().map(Insn::to_string).collect::<Vec<_>>()
    );

    let max_back = config.max_back.min(offset);
    let mut gadgets = Vec::new();

    for i in 1..=max_back {
        let window = &data[offset - i..end];
        let trial = decoder.decode_all(base - i as Address, window);

        if trial.len() <= ref_len {
            continue;
        }
        if trial[trial.len() - ref_len..] != reference[..] {
            continue;
        }

        // The reference repeats at the front: the window starting at that
        // earlier copy was already searched from its own occurrence. Relative
        // branches print their resolved target, so the text must match too.
        if trial.len() >= 2 * ref_len
            && trial[..ref_len]
                .iter()
                .zip(&reference)
                .all(|(a, b)| a.same(b) && a.to_string() == b.to_string())
        {
            log::debug!("0x{:08x}: sequence repeats {} bytes back, stopping", base, i);
            break;
        }

        if config.policy.has_bad(&trial) {
            continue;
        }

        gadgets.push(Gadget::new(
            target.to_vec(),
            base,
            i,
            window.to_vec(),
            Arc::clone(decoder),
        ));
    }

    Ok(maximal_unique(gadgets))
}
