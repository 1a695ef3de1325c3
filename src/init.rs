//! Training-set statistics and parameter allocation.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::basis::TemporalBasis;
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::matrix::DenseMatrix;
use crate::params::ModelParams;
use crate::records::{Record, RecordStore};

/// Mean score through an integer histogram over {0..5}; scores truncate to
/// their integer bucket.
pub fn global_mean(records: &RecordStore) -> Result<f64> {
    if records.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    let mut counts = [0u64; 6];
    for (index, r) in records.iter().enumerate() {
        if !(0.0..=5.0).contains(&r.score) {
            return Err(ModelError::invalid_record(
                index,
                format!("score {} outside [0, 5]", r.score),
            ));
        }
        counts[r.score as usize] += 1;
    }
    let total: u64 = counts.iter().enumerate().map(|(s, &c)| s as u64 * c).sum();
    Ok(total as f64 / records.len() as f64)
}

/// Integer mean observation date per entity; entities never observed sit at
/// the middle of the domain.
pub fn date_origins(
    records: &RecordStore,
    n: usize,
    id: impl Fn(&Record) -> u32,
    max_date: u32,
) -> Vec<u32> {
    let mut sums = vec![0u64; n];
    let mut counts = vec![0u64; n];
    for r in records {
        let c = id(r) as usize - 1;
        sums[c] += r.date as u64;
        counts[c] += 1;
    }
    sums.iter()
        .zip(&counts)
        .map(|(&s, &c)| if c == 0 { max_date / 2 } else { (s / c) as u32 })
        .collect()
}

/// Builds a fresh parameter store for `n_users × n_items`.
///
/// `u0`, `v`, `y`, `a` and `b` are drawn uniformly from [0, 1) with the
/// configured seed; `u1` and both time-bin tables start at zero.
pub fn initialize(
    config: &ModelConfig,
    basis: &TemporalBasis,
    records: &RecordStore,
    n_users: usize,
    n_items: usize,
) -> Result<ModelParams> {
    let mu = global_mean(records)?;
    let date_origin_user = date_origins(records, n_users, |r| r.user, config.max_date);
    let date_origin_item = date_origins(records, n_items, |r| r.item, config.max_date);

    let k = config.rank;
    let mut params = ModelParams {
        mu,
        u0: DenseMatrix::try_zeros(k, n_users, "U0")?,
        u1: DenseMatrix::try_zeros(k, n_users, "U1")?,
        v: DenseMatrix::try_zeros(k, n_items, "V")?,
        y: DenseMatrix::try_zeros(k, n_items, "Y")?,
        a: DenseMatrix::try_zeros(basis.user.n_rows(), n_users, "A")?,
        b: DenseMatrix::try_zeros(basis.item.n_rows(), n_items, "B")?,
        a_timebin: DenseMatrix::try_zeros(config.user_time_bins as usize, n_users, "A_timebin")?,
        b_timebin: DenseMatrix::try_zeros(config.item_time_bins as usize, n_items, "B_timebin")?,
        date_origin_user,
        date_origin_item,
        a_lambda: vec![config.lambda; basis.user.n_rows()],
        b_lambda: vec![config.lambda; basis.item.n_rows()],
        rated_items: Vec::new(),
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    params.u0.fill_uniform(&mut rng);
    params.v.fill_uniform(&mut rng);
    params.y.fill_uniform(&mut rng);
    params.a.fill_uniform(&mut rng);
    params.b.fill_uniform(&mut rng);

    params.rebuild_rated_items(records.iter().map(|r| (r.user, r.item)));

    tracing::debug!(
        mu,
        n_users,
        n_items,
        rank = k,
        user_basis_rows = basis.user.n_rows(),
        item_basis_rows = basis.item.n_rows(),
        "initialized parameter store"
    );
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig {
            rank: 3,
            max_date: 40,
            user_time_bins: 4,
            item_time_bins: 5,
            ..ModelConfig::default()
        }
    }

    fn records() -> RecordStore {
        RecordStore::new(vec![
            Record::new(1, 1, 10, 5.0),
            Record::new(1, 2, 21, 3.0),
            Record::new(3, 2, 30, 4.0),
            Record::new(3, 1, 7, 2.9),
        ])
    }

    #[test]
    fn test_global_mean_uses_integer_buckets() {
        // 2.9 lands in bucket 2.
        assert_eq!(global_mean(&records()).unwrap(), (5.0 + 3.0 + 4.0 + 2.0) / 4.0);
        assert!(matches!(
            global_mean(&RecordStore::default()),
            Err(ModelError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_date_origins_floor_mean_and_default_midpoint() {
        let origins = date_origins(&records(), 3, |r| r.user, 40);
        // user 1: (10 + 21) / 2 = 15, user 2 unseen, user 3: (30 + 7) / 2 = 18
        assert_eq!(origins, vec![15, 20, 18]);
    }

    #[test]
    fn test_initialize_shapes_and_fill() {
        let config = config();
        let basis = TemporalBasis::from_config(&config);
        let params = initialize(&config, &basis, &records(), 3, 2).unwrap();

        assert_eq!((params.u0.rows(), params.u0.cols()), (3, 3));
        assert_eq!((params.v.rows(), params.v.cols()), (3, 2));
        assert_eq!((params.a.rows(), params.a.cols()), (15, 3));
        assert_eq!((params.b.rows(), params.b.cols()), (15, 2));
        assert_eq!((params.a_timebin.rows(), params.b_timebin.rows()), (4, 5));
        assert_eq!(params.a_lambda, vec![config.lambda; 15]);

        assert!(params.u1.as_slice().iter().all(|&v| v == 0.0));
        assert!(params.a_timebin.as_slice().iter().all(|&v| v == 0.0));
        assert!(params.u0.as_slice().iter().all(|v| (0.0..1.0).contains(v)));
        assert!(params.u0.max_abs() > 0.0);

        assert_eq!(params.rated_items, vec![vec![0, 1], vec![], vec![1, 0]]);

        let again = initialize(&config, &basis, &records(), 3, 2).unwrap();
        assert_eq!(params, again);
    }
}
