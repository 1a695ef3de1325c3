//! Single-record SGD step over a lock-free shared parameter store.
//!
//! Workers write into the same matrices without locks or atomics (Hogwild).
//! Two workers touching the same user or item column race; with batches of
//! independent records that is rare and its effect on convergence is
//! tolerated. Everything else in a step is worker-private.

use std::marker::PhantomData;

use crate::basis::TemporalBasis;
use crate::config::ModelConfig;
use crate::linalg::add_scaled;
use crate::matrix::DenseMatrix;
use crate::params::ModelParams;
use crate::predict::{implicit_mean, raw_score, report_non_finite, Columns, Lookup};
use crate::records::Record;

/// Reserved per-record weight of the gradient.
pub const DATA_WEIGHT: f64 = 1.0;

#[derive(Clone, Copy)]
struct SharedMatrix {
    ptr: *mut f64,
    rows: usize,
}

impl SharedMatrix {
    fn new(m: &mut DenseMatrix) -> Self {
        Self {
            ptr: m.as_mut_slice().as_mut_ptr(),
            rows: m.rows(),
        }
    }

    /// # Safety
    /// `j` must be a valid column; the caller accepts unsynchronised writers.
    #[inline(always)]
    unsafe fn col<'a>(&self, j: usize) -> &'a mut [f64] {
        std::slice::from_raw_parts_mut(self.ptr.add(j * self.rows), self.rows)
    }

    /// # Safety
    /// As for [`SharedMatrix::col`].
    #[inline(always)]
    unsafe fn cell<'a>(&self, row: usize, col: usize) -> &'a mut f64 {
        &mut *self.ptr.add(col * self.rows + row)
    }
}

/// Raw view of a [`ModelParams`] that many workers may update at once.
///
/// Holds the store's exclusive borrow for `'a`, so nothing else can observe
/// the matrices while workers run.
pub struct HogwildParams<'a> {
    mu: f64,
    u0: SharedMatrix,
    u1: SharedMatrix,
    v: SharedMatrix,
    y: SharedMatrix,
    a: SharedMatrix,
    b: SharedMatrix,
    a_timebin: SharedMatrix,
    b_timebin: SharedMatrix,
    date_origin_user: &'a [u32],
    date_origin_item: &'a [u32],
    rated_items: &'a [Vec<u32>],
    _store: PhantomData<&'a mut ModelParams>,
}

// SAFETY: concurrent unsynchronised column writes are the accepted Hogwild
// contract; all pointers stay valid for 'a through the exclusive borrow.
unsafe impl Send for HogwildParams<'_> {}
unsafe impl Sync for HogwildParams<'_> {}

impl<'a> HogwildParams<'a> {
    pub fn new(params: &'a mut ModelParams) -> Self {
        let ModelParams {
            mu,
            u0,
            u1,
            v,
            y,
            a,
            b,
            a_timebin,
            b_timebin,
            date_origin_user,
            date_origin_item,
            rated_items,
            ..
        } = params;
        Self {
            mu: *mu,
            u0: SharedMatrix::new(u0),
            u1: SharedMatrix::new(u1),
            v: SharedMatrix::new(v),
            y: SharedMatrix::new(y),
            a: SharedMatrix::new(a),
            b: SharedMatrix::new(b),
            a_timebin: SharedMatrix::new(a_timebin),
            b_timebin: SharedMatrix::new(b_timebin),
            date_origin_user,
            date_origin_item,
            rated_items,
            _store: PhantomData,
        }
    }
}

/// Per-epoch constants of a step.
pub struct StepContext<'a> {
    pub basis: &'a TemporalBasis,
    pub config: &'a ModelConfig,
    pub learning_rate: f64,
}

/// Applies one gradient step for `record`; returns the residual.
///
/// `u_eff` and `y_mean` are worker scratch of length `rank`. The record's ids
/// and date must already be validated against the store.
pub fn sgd_step(
    view: &HogwildParams<'_>,
    ctx: &StepContext<'_>,
    record: &Record,
    u_eff: &mut [f64],
    y_mean: &mut [f64],
) -> f64 {
    let lookup = Lookup::new(
        ctx.basis,
        ctx.config,
        view.date_origin_user,
        view.date_origin_item,
        record,
    );
    let (i, j) = (lookup.user, lookup.item);

    // SAFETY: ids were validated against the store dimensions; concurrent
    // access to the same columns is the Hogwild contract.
    let (u0, u1, v, a, b, user_bin, item_bin) = unsafe {
        (
            view.u0.col(i),
            view.u1.col(i),
            view.v.col(j),
            view.a.col(i),
            view.b.col(j),
            view.a_timebin.cell(lookup.user_bin, i),
            view.b_timebin.cell(lookup.item_bin, j),
        )
    };

    let rated: &[u32] = view.rated_items.get(i).map(Vec::as_slice).unwrap_or(&[]);
    let implicit = ctx.config.implicit_feedback;
    if implicit {
        // SAFETY: item indices come from validated training records.
        implicit_mean(y_mean, rated, |c| unsafe { &*view.y.col(c) });
    }

    let cols = Columns {
        mu: view.mu,
        u0: &*u0,
        u1: &*u1,
        v: &*v,
        a: &*a,
        b: &*b,
        user_bin: *user_bin,
        item_bin: *item_bin,
    };
    let y_term = if implicit { Some(&*y_mean) } else { None };
    let predicted = raw_score(&lookup, &cols, y_term, u_eff);
    if ctx.config.check_finite && !predicted.is_finite() {
        report_non_finite(
            predicted,
            &lookup,
            &cols,
            (view.date_origin_user[i], view.date_origin_item[j]),
            y_term,
        );
    }

    let residual = record.score as f64 - predicted;
    let step = ctx.learning_rate * 2.0 * residual * DATA_WEIGHT;

    add_scaled(u0, v, step);
    add_scaled(u1, v, step * lookup.drift_weight);
    add_scaled(v, u_eff, step);
    add_scaled(a, lookup.user_basis, step);
    add_scaled(b, lookup.item_basis, step);
    *user_bin += step;
    *item_bin += step;

    if implicit && !rated.is_empty() {
        let step_eff = step / rated.len() as f64;
        for &item in rated {
            // SAFETY: as above.
            let y = unsafe { view.y.col(item as usize) };
            add_scaled(y, v, step_eff);
        }
    }
    residual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{power_law, timebin};
    use crate::init::initialize;
    use crate::records::RecordStore;

    fn setup(implicit_feedback: bool) -> (ModelConfig, TemporalBasis, ModelParams) {
        let config = ModelConfig {
            rank: 3,
            max_date: 30,
            user_time_bins: 4,
            item_time_bins: 3,
            implicit_feedback,
            ..ModelConfig::default()
        };
        let basis = TemporalBasis::from_config(&config);
        let records = RecordStore::new(vec![
            Record::new(1, 1, 5, 4.0),
            Record::new(1, 3, 25, 2.0),
            Record::new(2, 2, 14, 5.0),
            Record::new(2, 3, 16, 1.0),
        ]);
        let mut params = initialize(&config, &basis, &records, 2, 3).unwrap();
        for m in [&mut params.u0, &mut params.v, &mut params.y, &mut params.a, &mut params.b] {
            m.scale(0.05);
        }
        params.u1.fill(0.05);
        (config, basis, params)
    }

    fn close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-12, "{x} vs {y}");
        }
    }

    #[test]
    fn test_step_applies_closed_form_delta() {
        for implicit in [false, true] {
            let (config, basis, mut params) = setup(implicit);
            let before = params.clone();
            let record = Record::new(1, 3, 22, 4.0);
            let (i, j) = (0usize, 2usize);
            let rate = 0.01;

            let mut u_eff = vec![0.0; 3];
            let mut y_mean = vec![0.0; 3];
            let expected_pred = {
                let mut s = vec![0.0; 3];
                let mut m = vec![0.0; 3];
                let p = crate::predict::predict_with(&before, &basis, &config, &record, &mut s, &mut m);
                assert!(p > 1.0 && p < 5.0, "prediction must be unclamped for this check: {p}");
                p
            };

            let residual = {
                let view = HogwildParams::new(&mut params);
                let ctx = StepContext {
                    basis: &basis,
                    config: &config,
                    learning_rate: rate,
                };
                sgd_step(&view, &ctx, &record, &mut u_eff, &mut y_mean)
            };
            assert!((residual - (4.0 - expected_pred)).abs() < 1e-12);

            let step = rate * 2.0 * residual;
            let tu = 22 - before.date_origin_user[i] as i64;
            let ti = 22 - before.date_origin_item[j] as i64;
            let w = power_law(tu, 30, 0.4);
            let v_old = before.v.col(j);
            let u_old: Vec<f64> = (0..3)
                .map(|f| before.u0.get(f, i) + w * before.u1.get(f, i))
                .collect();

            let want_u0: Vec<f64> = (0..3).map(|f| before.u0.get(f, i) + step * v_old[f]).collect();
            let want_u1: Vec<f64> = (0..3).map(|f| before.u1.get(f, i) + step * w * v_old[f]).collect();
            let want_v: Vec<f64> = (0..3).map(|f| v_old[f] + step * u_old[f]).collect();
            close(params.u0.col(i), &want_u0);
            close(params.u1.col(i), &want_u1);
            close(params.v.col(j), &want_v);

            let want_a: Vec<f64> = before
                .a
                .col(i)
                .iter()
                .zip(basis.user.column(tu))
                .map(|(c, f)| c + step * f)
                .collect();
            let want_b: Vec<f64> = before
                .b
                .col(j)
                .iter()
                .zip(basis.item.column(ti))
                .map(|(c, f)| c + step * f)
                .collect();
            close(params.a.col(i), &want_a);
            close(params.b.col(j), &want_b);

            let (bu, bi) = (timebin(22, 4, 30), timebin(22, 3, 30));
            assert!((params.a_timebin.get(bu, i) - step).abs() < 1e-12);
            assert!((params.b_timebin.get(bi, j) - step).abs() < 1e-12);

            // Untouched entities keep their values.
            assert_eq!(params.u0.col(1), before.u0.col(1));
            assert_eq!(params.v.col(0), before.v.col(0));

            if implicit {
                // User 1 rated items 1 and 3; Y moves along the updated V column.
                let step_eff = step / 2.0;
                for c in [0usize, 2] {
                    let want: Vec<f64> = (0..3)
                        .map(|f| before.y.get(f, c) + step_eff * params.v.get(f, j))
                        .collect();
                    close(params.y.col(c), &want);
                }
                assert_eq!(params.y.col(1), before.y.col(1));
            } else {
                assert_eq!(params.y, before.y);
            }
        }
    }

    #[test]
    fn test_zero_rate_leaves_store_unchanged() {
        let (config, basis, mut params) = setup(true);
        let before = params.clone();
        let view = HogwildParams::new(&mut params);
        let ctx = StepContext {
            basis: &basis,
            config: &config,
            learning_rate: 0.0,
        };
        let mut u_eff = vec![0.0; 3];
        let mut y_mean = vec![0.0; 3];
        sgd_step(&view, &ctx, &Record::new(2, 2, 14, 5.0), &mut u_eff, &mut y_mean);
        drop(view);
        assert_eq!(params, before);
    }

    #[test]
    fn test_non_finite_step_completes() {
        let (config, basis, mut params) = setup(true);
        *params.u0.get_mut(0, 0) = f64::NAN;
        let before = params.clone();
        let mut u_eff = vec![0.0; 3];
        let mut y_mean = vec![0.0; 3];
        let residual = {
            let view = HogwildParams::new(&mut params);
            let ctx = StepContext {
                basis: &basis,
                config: &config,
                learning_rate: 0.01,
            };
            sgd_step(&view, &ctx, &Record::new(1, 3, 22, 4.0), &mut u_eff, &mut y_mean)
        };
        assert!(residual.is_nan());
        // The poison spreads only through the touched columns.
        assert!(params.v.col(2).iter().all(|v| v.is_nan()));
        assert_eq!(params.u0.col(1), before.u0.col(1));
        assert_eq!(params.v.col(1), before.v.col(1));
    }
}
