//! Sibling order-index arithmetic.
//!
//! Growth is append-only: existing siblings keep their indices and new
//! entries are placed after them. Callers compute positions from a count or
//! maximum read inside the same write transaction as the inserts, so the
//! functions here stay pure.

/// Positions for `n` entries appended after `existing` siblings.
///
/// With a gap-free sibling set of size `existing` this continues the
/// sequence `existing, existing + 1, …`.
///
/// ```rust
/// use autodidact_core::ordering::append_positions;
///
/// assert_eq!(append_positions(2, 3).collect::<Vec<_>>(), vec![2, 3, 4]);
/// ```
pub fn append_positions(existing: i64, n: usize) -> impl Iterator<Item = i64> {
    (0..n as i64).map(move |i| existing + i)
}

/// Largest relative offset accepted from a payload or a request, either sign.
pub const MAX_OFFSET: i64 = 1_000_000;

pub fn offset_in_range(offset: i64) -> bool {
    (-MAX_OFFSET..=MAX_OFFSET).contains(&offset)
}

/// Positions for entries that may carry their own relative offset.
///
/// The base is `current_max` (or `-1` when there are no siblings yet, which
/// keeps a fresh list zero-based). An entry with an offset lands at
/// `base + offset`; an entry without one lands at `base + position + 1`.
/// Results are forced strictly increasing so that a batch never collides
/// with itself or with the existing maximum.
///
/// Returns `None` if any position would overflow `i64`.
///
/// ```rust
/// use autodidact_core::ordering::offset_positions;
///
/// assert_eq!(offset_positions(None, &[Some(1), Some(2)]), Some(vec![0, 1]));
/// assert_eq!(offset_positions(Some(4), &[None, None]), Some(vec![5, 6]));
/// assert_eq!(offset_positions(Some(1), &[Some(i64::MAX)]), None);
/// ```
pub fn offset_positions(current_max: Option<i64>, offsets: &[Option<i64>]) -> Option<Vec<i64>> {
    let base = current_max.unwrap_or(-1);
    let mut previous = base;
    let mut positions = Vec::with_capacity(offsets.len());
    for (position, offset) in offsets.iter().enumerate() {
        let step = match offset {
            Some(offset) => *offset,
            None => i64::try_from(position).ok()?.checked_add(1)?,
        };
        let index = base.checked_add(step)?.max(previous.checked_add(1)?);
        previous = index;
        positions.push(index);
    }
    Some(positions)
}

/// Positions for `n` entries placed after the sibling holding `current_max`.
///
/// Unlike [`append_positions`] this stays collision-free when the existing
/// indices have gaps.
pub fn positions_after(current_max: Option<i64>, n: usize) -> Option<Vec<i64>> {
    offset_positions(current_max, &vec![None; n])
}

/// The single position after `current_max`, `0` for an empty sibling set.
pub fn next_position(current_max: Option<i64>) -> Option<i64> {
    match current_max {
        Some(max) => max.checked_add(1),
        None => Some(0),
    }
}
