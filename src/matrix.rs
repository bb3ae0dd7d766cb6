use crate::error::HicbandError;

/// Square contact matrix accessed through diagonal projections.
///
/// `diagonal(d)` follows NumPy `diagonal`: for `d >= 0` element `k` is
/// `M[k][k + d]`, for `d < 0` it is `M[k - d][k]`. Offsets outside the
/// matrix yield an empty vector.
pub trait ContactMatrix {
    fn size(&self) -> usize;

    fn diagonal(&self, offset: isize) -> Vec<f64>;
}

pub(crate) fn diagonal_len(size: usize, offset: isize) -> usize {
    size.saturating_sub(offset.unsigned_abs())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    size: usize,
    values: Vec<f64>,
}

impl DenseMatrix {
    pub fn new(size: usize, values: Vec<f64>) -> Result<Self, HicbandError> {
        if values.len() != size * size {
            return Err(HicbandError::Source(format!(
                "dense matrix of size {size} needs {} values, got {}",
                size * size,
                values.len()
            )));
        }
        Ok(Self { size, values })
    }

    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            values: vec![0.0; size * size],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, HicbandError> {
        let size = rows.len();
        if let Some(row) = rows.iter().find(|row| row.len() != size) {
            return Err(HicbandError::Source(format!(
                "matrix is not square: {size} rows but a row of length {}",
                row.len()
            )));
        }
        Ok(Self {
            size,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.size + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.size + col] = value;
    }
}

impl ContactMatrix for DenseMatrix {
    fn size(&self) -> usize {
        self.size
    }

    fn diagonal(&self, offset: isize) -> Vec<f64> {
        let shift = offset.unsigned_abs();
        (0..diagonal_len(self.size, offset))
            .map(|k| {
                if offset >= 0 {
                    self.get(k, k + shift)
                } else {
                    self.get(k + shift, k)
                }
            })
            .collect()
    }
}

/// Compressed sparse row matrix with sorted columns and optional per-bin
/// balancing weights.
///
/// With weights, a stored pixel reads as `raw * w[i] * w[j]`; an absent pixel
/// reads as `0` unless one of its bins is masked (NaN weight), in which case
/// it reads as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    size: usize,
    row_offsets: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
    weights: Option<Vec<f64>>,
}

impl SparseMatrix {
    /// Builds from `(row, col, value)` triplets. Duplicate coordinates are
    /// summed.
    pub fn from_triplets(
        size: usize,
        mut triplets: Vec<(usize, usize, f64)>,
    ) -> Result<Self, HicbandError> {
        if let Some((row, col, _)) = triplets
            .iter()
            .find(|(row, col, _)| *row >= size || *col >= size)
        {
            return Err(HicbandError::Source(format!(
                "pixel ({row}, {col}) outside matrix of size {size}"
            )));
        }
        triplets.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_offsets = vec![0usize; size + 1];
        let mut cols = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;
        for (row, col, value) in triplets {
            if last == Some((row, col)) {
                if let Some(slot) = values.last_mut() {
                    *slot += value;
                }
                continue;
            }
            row_offsets[row + 1] += 1;
            cols.push(col);
            values.push(value);
            last = Some((row, col));
        }
        for row in 0..size {
            row_offsets[row + 1] += row_offsets[row];
        }

        Ok(Self {
            size,
            row_offsets,
            cols,
            values,
            weights: None,
        })
    }

    /// Builds a symmetric matrix from upper-triangle pixels (`row <= col`), the
    /// storage convention of cooler files.
    pub fn from_upper_triangle(
        size: usize,
        pixels: Vec<(usize, usize, f64)>,
    ) -> Result<Self, HicbandError> {
        let mut triplets = Vec::with_capacity(pixels.len() * 2);
        for (row, col, value) in pixels {
            if row > col {
                return Err(HicbandError::Source(format!(
                    "pixel ({row}, {col}) is below the diagonal"
                )));
            }
            triplets.push((row, col, value));
            if row != col {
                triplets.push((col, row, value));
            }
        }
        Self::from_triplets(size, triplets)
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self, HicbandError> {
        if weights.len() != self.size {
            return Err(HicbandError::Source(format!(
                "expected {} balancing weights, got {}",
                self.size,
                weights.len()
            )));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        let range = self.row_offsets[row]..self.row_offsets[row + 1];
        let raw = self.cols[range.clone()]
            .binary_search(&col)
            .ok()
            .map(|idx| self.values[range.start + idx]);
        match &self.weights {
            None => raw.unwrap_or(0.0),
            Some(weights) => {
                let scale = weights[row] * weights[col];
                match raw {
                    Some(value) => value * scale,
                    None if scale.is_nan() => f64::NAN,
                    None => 0.0,
                }
            }
        }
    }
}

impl ContactMatrix for SparseMatrix {
    fn size(&self) -> usize {
        self.size
    }

    fn diagonal(&self, offset: isize) -> Vec<f64> {
        let shift = offset.unsigned_abs();
        (0..diagonal_len(self.size, offset))
            .map(|k| {
                if offset >= 0 {
                    self.get(k, k + shift)
                } else {
                    self.get(k + shift, k)
                }
            })
            .collect()
    }
}
