//! Coin selection.
//!
//! Greedy over the value-sorted candidates: repeatedly take the smallest
//! note whose prefix (itself plus everything smaller) still covers what is
//! left to pay. Selections with an odd number of notes pick up one extra
//! dust note when there is one below everything selected, since spends
//! consume notes in pairs.

use std::collections::BTreeSet;

use shroud_privacy::{Asset, IncludedNoteWithNullifier};

use crate::error::{CoreError, Result};

/// Pick notes of `asset` from `spendable` covering `requested`.
///
/// Notes whose merkle index is in `excluded` are never picked. Ties between
/// equal values go to the lower merkle index.
pub fn gather_notes(
    asset: &Asset,
    spendable: &[IncludedNoteWithNullifier],
    requested: u128,
    excluded: &BTreeSet<u64>,
) -> Result<Vec<IncludedNoteWithNullifier>> {
    let mut candidates: Vec<&IncludedNoteWithNullifier> = spendable
        .iter()
        .filter(|n| n.asset() == asset && !excluded.contains(&n.merkle_index))
        .collect();
    candidates.sort_by_key(|n| (n.value(), n.merkle_index));
    candidates.dedup_by_key(|n| n.merkle_index);

    let owned: u128 = candidates.iter().map(|n| n.value() as u128).sum();
    if owned < requested {
        return Err(CoreError::InsufficientFunds {
            asset: *asset,
            requested,
            owned,
        });
    }
    if requested == 0 {
        return Ok(Vec::new());
    }

    // prefix[k] = sum of the k smallest candidates
    let mut prefix = Vec::with_capacity(candidates.len() + 1);
    prefix.push(0u128);
    for note in &candidates {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + note.value() as u128);
    }

    let mut selected = Vec::new();
    let mut remaining = requested;
    let mut upper = candidates.len();

    while remaining > 0 && upper > 0 {
        let k = prefix[..=upper].partition_point(|sum| *sum < remaining);
        if k == 0 || k > upper {
            break;
        }
        let note = candidates[k - 1];
        remaining = remaining.saturating_sub(note.value() as u128);
        selected.push(*note);
        upper = k - 1;
    }

    // Everything below `upper` is untouched and smaller than every pick
    if selected.len() % 2 == 1 && upper > 0 {
        selected.push(*candidates[0]);
    }

    Ok(selected)
}
