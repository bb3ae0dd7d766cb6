use std::ops::RangeInclusive;

use half::f16;
use tracing::trace;

use crate::matrix::ContactMatrix;

/// Largest relative rounding error of a normal binary16 value (`2^-11`).
///
/// Values below `2^-14` are subnormal in binary16 and carry less relative
/// precision; values below `2^-25` round to zero.
pub const F16_MAX_RELATIVE_ERROR: f64 = 4.8828125e-4;

/// Diagonals `-window..=window` of a contact matrix, stored as binary16.
///
/// Offset `d` holds `size - |d|` values (zero when the matrix is too small)
/// and never contains NaN or infinities.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalBand {
    window: usize,
    diagonals: Vec<Vec<f16>>,
}

impl DiagonalBand {
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of diagonals, always `2 * window + 1`.
    pub fn len(&self) -> usize {
        self.diagonals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagonals.is_empty()
    }

    pub fn offsets(&self) -> RangeInclusive<isize> {
        let w = self.window as isize;
        -w..=w
    }

    pub fn get(&self, offset: isize) -> Option<&[f16]> {
        let index = offset.checked_add(self.window as isize)?;
        let index = usize::try_from(index).ok()?;
        self.diagonals.get(index).map(Vec::as_slice)
    }

    /// Diagonals in increasing offset order.
    pub fn iter(&self) -> impl Iterator<Item = (isize, &[f16])> + '_ {
        self.offsets()
            .zip(self.diagonals.iter())
            .map(|(offset, values)| (offset, values.as_slice()))
    }
}

/// Extracts the diagonal band of `matrix` for offsets `-window..=window`.
pub fn extract<M: ContactMatrix + ?Sized>(matrix: &M, window: usize) -> DiagonalBand {
    trace!(size = matrix.size(), window, "extracting diagonal band");
    let w = window as isize;
    let diagonals = (-w..=w)
        .map(|offset| {
            matrix
                .diagonal(offset)
                .into_iter()
                .map(to_half)
                .collect::<Vec<_>>()
        })
        .collect();
    DiagonalBand { window, diagonals }
}

/// Casts to binary16 with a single round-to-nearest-even step.
///
/// Non-finite inputs become zero. Finite inputs beyond the binary16 range
/// saturate to `±65504`.
pub fn to_half(value: f64) -> f16 {
    if !value.is_finite() {
        return f16::ZERO;
    }
    let half = f16::from_f64(value);
    if half.is_infinite() {
        if value > 0.0 { f16::MAX } else { f16::MIN }
    } else {
        half
    }
}
