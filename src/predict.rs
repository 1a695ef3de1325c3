//! Forward pass shared by scoring and the SGD step.
//!
//! ```text
//! u_eff  = U0[:,i] + U1[:,i] * drift(d - origin_user[i])
//! score  = mu + u_eff·V[:,j]
//!        + A_basis(d - origin_user[i])·A[:,i] + B_basis(d - origin_item[j])·B[:,j]
//!        + A_timebin[bin_u, i] + B_timebin[bin_i, j]
//!        [+ V[:,j]·mean(Y[:, rated(i)])]
//! ```

use crate::basis::{timebin, TemporalBasis};
use crate::config::ModelConfig;
use crate::linalg::{add_scaled, compose, dot};
use crate::params::ModelParams;
use crate::records::Record;

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 5.0;

/// Record-dependent basis lookups, independent of learned parameters.
pub(crate) struct Lookup<'a> {
    pub user: usize,
    pub item: usize,
    pub date: u32,
    pub drift_weight: f64,
    pub user_basis: &'a [f64],
    pub item_basis: &'a [f64],
    pub user_bin: usize,
    pub item_bin: usize,
}

impl<'a> Lookup<'a> {
    /// Ids and date must already be checked against the store and domain.
    #[inline]
    pub(crate) fn new(
        basis: &'a TemporalBasis,
        config: &ModelConfig,
        origin_user: &[u32],
        origin_item: &[u32],
        record: &Record,
    ) -> Self {
        let user = record.user as usize - 1;
        let item = record.item as usize - 1;
        let d = record.date as i64;
        let t_user = d - origin_user[user] as i64;
        let t_item = d - origin_item[item] as i64;
        Self {
            user,
            item,
            date: record.date,
            drift_weight: basis.drift.value(t_user),
            user_basis: basis.user.column(t_user),
            item_basis: basis.item.column(t_item),
            user_bin: timebin(record.date, config.user_time_bins, config.max_date),
            item_bin: timebin(record.date, config.item_time_bins, config.max_date),
        }
    }
}

/// Parameter columns touched by one record.
pub(crate) struct Columns<'a> {
    pub mu: f64,
    pub u0: &'a [f64],
    pub u1: &'a [f64],
    pub v: &'a [f64],
    pub a: &'a [f64],
    pub b: &'a [f64],
    pub user_bin: f64,
    pub item_bin: f64,
}

/// Unclamped score; leaves the composed user vector in `u_eff`.
#[inline]
pub(crate) fn raw_score(
    lookup: &Lookup<'_>,
    cols: &Columns<'_>,
    implicit: Option<&[f64]>,
    u_eff: &mut [f64],
) -> f64 {
    compose(u_eff, cols.u0, cols.u1, lookup.drift_weight);
    let mut score = cols.mu + dot(u_eff, cols.v);
    score += dot(lookup.user_basis, cols.a);
    score += dot(lookup.item_basis, cols.b);
    score += cols.user_bin + cols.item_bin;
    if let Some(y_mean) = implicit {
        score += dot(cols.v, y_mean);
    }
    score
}

/// Mean of the implicit-feedback columns of the items a user rated.
pub(crate) fn implicit_mean<'a>(
    out: &mut [f64],
    rated: &[u32],
    column: impl Fn(usize) -> &'a [f64],
) {
    out.fill(0.0);
    for &item in rated {
        add_scaled(out, column(item as usize), 1.0);
    }
    if !rated.is_empty() {
        let inv = 1.0 / rated.len() as f64;
        out.iter_mut().for_each(|v| *v *= inv);
    }
}

/// Reports a non-finite score together with everything that fed it.
/// Observational only.
#[cold]
pub(crate) fn report_non_finite(
    score: f64,
    lookup: &Lookup<'_>,
    cols: &Columns<'_>,
    origins: (u32, u32),
    implicit: Option<&[f64]>,
) {
    tracing::warn!(
        score,
        date = lookup.date,
        user = lookup.user + 1,
        item = lookup.item + 1,
        origin_user = origins.0,
        origin_item = origins.1,
        mu = cols.mu,
        static_dot = dot(cols.u0, cols.v),
        user_basis = ?lookup.user_basis,
        a = ?cols.a,
        item_basis = ?lookup.item_basis,
        b = ?cols.b,
        implicit = ?implicit,
        "non-finite prediction"
    );
}

/// Clamped prediction from a read-only store.
///
/// `u_eff` and `y_mean` are scratch of length `rank`.
pub(crate) fn predict_with(
    params: &ModelParams,
    basis: &TemporalBasis,
    config: &ModelConfig,
    record: &Record,
    u_eff: &mut [f64],
    y_mean: &mut [f64],
) -> f64 {
    let lookup = Lookup::new(
        basis,
        config,
        &params.date_origin_user,
        &params.date_origin_item,
        record,
    );
    let (i, j) = (lookup.user, lookup.item);
    let cols = Columns {
        mu: params.mu,
        u0: params.u0.col(i),
        u1: params.u1.col(i),
        v: params.v.col(j),
        a: params.a.col(i),
        b: params.b.col(j),
        user_bin: params.a_timebin.get(lookup.user_bin, i),
        item_bin: params.b_timebin.get(lookup.item_bin, j),
    };

    let implicit = if config.implicit_feedback {
        let rated = params.rated_items.get(i).map(Vec::as_slice).unwrap_or(&[]);
        implicit_mean(y_mean, rated, |c| params.y.col(c));
        Some(&*y_mean)
    } else {
        None
    };

    let score = raw_score(&lookup, &cols, implicit, u_eff).clamp(MIN_SCORE, MAX_SCORE);
    if config.check_finite && !score.is_finite() {
        report_non_finite(
            score,
            &lookup,
            &cols,
            (params.date_origin_user[i], params.date_origin_item[j]),
            implicit,
        );
    }
    score
}
