//! Column-major dense matrix holding one parameter column per entity.
//!
//! Column `j` is contiguous (`rows` values), so a user's or item's factor
//! vector is a plain slice, same layout as `factors[u * k..(u + 1) * k]`.

use rand::Rng;
use rayon::prelude::*;

use crate::error::{ModelError, Result};
use crate::linalg;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    /// Allocates a zeroed matrix, reporting allocation failure instead of aborting.
    pub fn try_zeros(rows: usize, cols: usize, what: &'static str) -> Result<Self> {
        let len = rows.checked_mul(cols).ok_or(ModelError::Allocation {
            what,
            bytes: usize::MAX,
        })?;
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            let bytes = len.saturating_mul(std::mem::size_of::<f64>());
            tracing::error!(what, bytes, "parameter allocation failed");
            return Err(ModelError::Allocation { what, bytes });
        }
        data.resize(len, 0.0);
        Ok(Self { rows, cols, data })
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>, what: &'static str) -> Result<Self> {
        let expected = rows * cols;
        if data.len() != expected {
            return Err(ModelError::DimensionMismatch {
                what,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline(always)]
    pub fn col(&self, j: usize) -> &[f64] {
        &self.data[j * self.rows..(j + 1) * self.rows]
    }

    #[inline(always)]
    pub fn col_mut(&mut self, j: usize) -> &mut [f64] {
        &mut self.data[j * self.rows..(j + 1) * self.rows]
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[col * self.rows + row]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        &mut self.data[col * self.rows + row]
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Uniform samples in [0, 1).
    pub fn fill_uniform<R: Rng>(&mut self, rng: &mut R) {
        for v in self.data.iter_mut() {
            *v = rng.random::<f64>();
        }
    }

    /// Multiplies every element by `factor` on the current rayon pool.
    pub fn scale(&mut self, factor: f64) {
        self.data.par_iter_mut().for_each(|v| *v *= factor);
    }

    /// Multiplies row `r` of every column by `factors[r]`.
    pub fn scale_rows(&mut self, factors: &[f64]) {
        debug_assert_eq!(factors.len(), self.rows);
        if self.rows == 0 {
            return;
        }
        self.data.par_chunks_mut(self.rows).for_each(|col| {
            for (v, f) in col.iter_mut().zip(factors) {
                *v *= f;
            }
        });
    }

    pub fn max_abs(&self) -> f64 {
        linalg::max_abs(&self.data)
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}
