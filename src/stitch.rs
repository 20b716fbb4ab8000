use itertools::Itertools;
use tracing::debug;

use crate::network::Network;
use crate::result::StitchError;

/// One frequency sub-band measurement and its position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySegment {
    pub ordinal: i32,
    pub network: Network,
}

impl FrequencySegment {
    pub fn new(ordinal: i32, network: Network) -> Self {
        FrequencySegment { ordinal, network }
    }
}

/// Folds `items` into at most one element by merging neighbours pass by pass.
///
/// Each pass merges (0, 1), (2, 3), ... and carries an odd trailing element
/// through unchanged. For an associative `merge` the result equals a left to
/// right fold, with fewer large intermediate buffers.
pub fn reduce_pairwise<T, E>(
    mut items: Vec<T>,
    mut merge: impl FnMut(T, T) -> Result<T, E>,
) -> Result<Vec<T>, E> {
    while items.len() > 1 {
        let mut next = Vec::with_capacity((items.len() + 1) / 2);
        for mut pair in &items.into_iter().chunks(2) {
            match (pair.next(), pair.next()) {
                (Some(lower), Some(upper)) => next.push(merge(lower, upper)?),
                (Some(single), None) => next.push(single),
                _ => {}
            }
        }
        items = next;
    }
    Ok(items)
}

/// Sorts the batch by ordinal and checks that the ordinals run 1..=N.
fn ordered(mut segments: Vec<FrequencySegment>) -> Result<Vec<Network>, StitchError> {
    segments.sort_by_key(|s| s.ordinal);
    for (expected, segment) in (1..).zip(&segments) {
        if segment.ordinal != expected {
            return Err(StitchError::Contiguity {
                expected,
                found: segment.ordinal,
            });
        }
    }
    Ok(segments.into_iter().map(|s| s.network).collect())
}

/// Merges a batch of contiguous sub-band segments into one network.
///
/// Returns `None` for an empty batch and the segment itself for a batch of one.
pub fn stitch(segments: Vec<FrequencySegment>) -> Result<Option<Network>, StitchError> {
    let networks = ordered(segments)?;
    debug!(segments = networks.len(), "stitching");
    let mut merged = reduce_pairwise(networks, |lower, upper| lower.stitch(&upper))?;
    Ok(merged.pop())
}

/// Left to right fold over the same batch; produces the same network as
/// [`stitch`].
pub fn stitch_sequential(segments: Vec<FrequencySegment>) -> Result<Option<Network>, StitchError> {
    let mut networks = ordered(segments)?.into_iter();
    let first = match networks.next() {
        Some(first) => first,
        None => return Ok(None),
    };
    networks
        .try_fold(first, |acc, next| acc.stitch(&next))
        .map(Some)
}
