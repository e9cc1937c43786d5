//! Collapse gadgets that share an instruction suffix.
//!
//! Gadgets ending at the same occurrence are arranged in a trie keyed by
//! their instructions read backwards from the terminal. At each branch point
//! a gadget whose sequence is already exhausted is dropped, because a longer
//! sibling contains it; a gadget alone at its branch point is kept whatever
//! its length.

use crate::gadget::Gadget;

/// Keep the maximal gadgets of a group sharing one terminal occurrence.
pub fn maximal_unique(gadgets: Vec<Gadget>) -> Vec<Gadget> {
    maximal_unique_by(gadgets, Gadget::rev_insns)
}

/// Trie reduction over any items with a reversed sequence key.
///
/// Keys are computed once per item. Output order follows the order in which
/// branches are first seen, so results are deterministic.
pub fn maximal_unique_by<T, K, F>(items: Vec<T>, rev_seq: F) -> Vec<T>
where
    K: PartialEq,
    F: Fn(&T) -> Vec<K>,
{
    let keys: Vec<Vec<K>> = items.iter().map(&rev_seq).collect();
    let mut keep = Vec::with_capacity(items.len());
    partition(&keys, (0..items.len()).collect(), 0, &mut keep);

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|idx| slots[idx].take()).collect()
}

/// Split `group` by the key element at `depth` (the length of the prefix
/// shared by everything in the group) and recurse into each branch.
fn partition<K: PartialEq>(keys: &[Vec<K>], group: Vec<usize>, depth: usize, keep: &mut Vec<usize>) {
    if group.len() <= 1 {
        keep.extend(group);
        return;
    }

    let mut branches: Vec<(&K, Vec<usize>)> = Vec::new();
    for idx in group {
        // Exhausted here: a prefix of every longer sibling
        let Some(head) = keys[idx].get(depth) else {
            continue;
        };
        match branches.iter_mut().find(|(h, _)| *h == head) {
            Some((_, members)) => members.push(idx),
            None => branches.push((head, vec![idx])),
        }
    }

    for (_, members) in branches {
        partition(keys, members, depth + 1, keep);
    }
}
