//! Temporal basis functions precomputed over the signed date-offset domain.
//!
//! Every table covers `t ∈ [-max_date, max_date]`, stored at index
//! `t + max_date`. Stacked tables keep all rows for one offset contiguous so a
//! lookup returns a slice that can be dotted directly against a coefficient
//! column.

use std::f64::consts::PI;

use crate::config::ModelConfig;

pub fn constant_row(max_date: u32) -> Vec<f64> {
    vec![1.0; 2 * max_date as usize + 1]
}

/// `sign(t) * |t / max_date|^beta`
pub fn power_law_row(max_date: u32, beta: f64) -> Vec<f64> {
    offsets(max_date)
        .map(|t| power_law(t, max_date, beta))
        .collect()
}

pub fn sin_row(max_date: u32, w: f64) -> Vec<f64> {
    offsets(max_date)
        .map(|t| (t as f64 / max_date as f64 * PI * w).sin())
        .collect()
}

pub fn cos_row(max_date: u32, w: f64) -> Vec<f64> {
    offsets(max_date)
        .map(|t| (t as f64 / max_date as f64 * PI * w).cos())
        .collect()
}

#[inline]
pub fn power_law(t: i64, max_date: u32, beta: f64) -> f64 {
    let sign = t.signum() as f64;
    sign * (t.unsigned_abs() as f64 / max_date as f64).powf(beta)
}

fn offsets(max_date: u32) -> impl Iterator<Item = i64> {
    let m = max_date as i64;
    -m..=m
}

/// Coarse bucket of `date` among `bins` equal slices of `[1, max_date]`.
#[inline(always)]
pub fn timebin(date: u32, bins: u32, max_date: u32) -> usize {
    ((date as u64 - 1) * bins as u64 / max_date as u64) as usize
}

/// Several basis rows evaluated together, laid out offset-major.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisTable {
    max_date: u32,
    n_rows: usize,
    data: Vec<f64>,
}

impl BasisTable {
    /// Stacks rows produced by the `*_row` generators.
    pub fn stack(max_date: u32, rows: &[Vec<f64>]) -> Self {
        let width = 2 * max_date as usize + 1;
        let n_rows = rows.len();
        let mut data = vec![0.0; width * n_rows];
        for (r, row) in rows.iter().enumerate() {
            debug_assert_eq!(row.len(), width);
            for (offset, &v) in row.iter().enumerate() {
                data[offset * n_rows + r] = v;
            }
        }
        Self {
            max_date,
            n_rows,
            data,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn max_date(&self) -> u32 {
        self.max_date
    }

    #[inline(always)]
    fn index(&self, t: i64) -> usize {
        debug_assert!(t.unsigned_abs() <= self.max_date as u64, "offset {t} outside domain");
        (t + self.max_date as i64) as usize
    }

    /// All rows evaluated at offset `t`.
    #[inline(always)]
    pub fn column(&self, t: i64) -> &[f64] {
        let at = self.index(t) * self.n_rows;
        &self.data[at..at + self.n_rows]
    }

    /// First row at offset `t`; for single-row tables.
    #[inline(always)]
    pub fn value(&self, t: i64) -> f64 {
        self.data[self.index(t) * self.n_rows]
    }
}

/// The three tables the model reads: drift weight for `U1`, user bias basis
/// (`A`) and item bias basis (`B`).
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalBasis {
    pub drift: BasisTable,
    pub user: BasisTable,
    pub item: BasisTable,
}

impl TemporalBasis {
    pub fn from_config(config: &ModelConfig) -> Self {
        let m = config.max_date;
        let drift = BasisTable::stack(m, &[power_law_row(m, config.drift_beta)]);

        let mut rows = vec![constant_row(m)];
        for &beta in &config.power_law_betas {
            rows.push(power_law_row(m, beta));
        }
        let listed = config.frequency_list();
        for band in 0..listed.len() {
            let w = config.band_frequency(band, &listed);
            rows.push(sin_row(m, w));
            rows.push(cos_row(m, w));
        }
        let user = BasisTable::stack(m, &rows);
        let item = user.clone();

        Self { drift, user, item }
    }
}
