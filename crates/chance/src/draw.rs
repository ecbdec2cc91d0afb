//! Weighted selection

use rand::Rng;

use crate::error::{ChanceError, ChanceResult};
use crate::prize::Prize;

/// Pick one prize.
///
/// Draws a real in `[0, total)`, then walks the entries in order
/// subtracting each weight and returns the first at which the running
/// value is no longer positive. Zero-weight entries are never selected.
pub fn draw<'a, R: Rng + ?Sized>(entries: &'a [Prize], rng: &mut R) -> ChanceResult<&'a Prize> {
    let mut total = 0.0;
    for prize in entries {
        if !prize.weight.is_finite() || prize.weight < 0.0 {
            return Err(ChanceError::InvalidWeight {
                prize: prize.id.clone(),
                weight: prize.weight,
            });
        }
        total += prize.weight;
    }
    if total <= 0.0 {
        return Err(ChanceError::EmptyTable);
    }

    let mut remaining = rng.gen_range(0.0..total);
    let mut last = None;
    for prize in entries.iter().filter(|p| p.weight > 0.0) {
        remaining -= prize.weight;
        if remaining <= 0.0 {
            return Ok(prize);
        }
        last = Some(prize);
    }
    // Float rounding can leave a sliver past the last entry
    last.ok_or(ChanceError::EmptyTable)
}
