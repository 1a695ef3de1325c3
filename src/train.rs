//! Epoch driver: batched lock-free parallel SGD with per-epoch shrinkage and
//! learning-rate decay.
//!
//! Records are split into fixed-size batches (the tail batch may be short).
//! Each epoch shuffles the batch order, hands batches to the worker pool, and
//! every worker walks its batch through a private shuffled offset
//! permutation, skipping offsets past the end of the data. The parallel loop
//! returning is the only ordering guarantee: shrinkage for epoch N runs after
//! every batch of epoch N has finished.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::basis::TemporalBasis;
use crate::config::ModelConfig;
use crate::error::Result;
use crate::metrics;
use crate::params::{ModelParams, ParameterMagnitudes};
use crate::predict::predict_with;
use crate::records::Record;
use crate::update::{sgd_step, HogwildParams, StepContext};

/// Optional per-epoch evaluation sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitDiagnostics<'a> {
    /// Scored after every epoch; RMSE lands in the report.
    pub validation: Option<&'a [Record]>,
    /// Blind set whose predictions are written to
    /// `<dir>/output_iter_<epoch>.txt` after every epoch.
    pub qualifying: Option<(&'a [Record], &'a Path)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Rate the epoch's steps used.
    pub learning_rate: f64,
    pub elapsed_secs: f64,
    pub samples_per_sec: f64,
    pub validation_rmse: Option<f64>,
    pub qualifying_output: Option<PathBuf>,
    pub magnitudes: ParameterMagnitudes,
}

// ── Intra-batch shuffle generator ─────────────────────────────────────────
// One XorShift64 per (epoch, batch), so the permutation does not depend on
// which worker picks the batch up.
struct BatchRng(u64);

impl BatchRng {
    /// Seed is a splitmix64 finalisation of (seed, epoch, batch); never zero.
    fn for_batch(seed: u64, epoch: u64, batch: usize) -> Self {
        let mut z = seed
            .wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add((batch as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self(z.max(1))
    }

    #[inline(always)]
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Fisher-Yates over `order`.
    fn permute(&mut self, order: &mut [u32]) {
        for i in (1..order.len()).rev() {
            let j = (self.next_u64() % (i as u64 + 1)) as usize;
            order.swap(i, j);
        }
    }
}

struct WorkerScratch {
    u_eff: Vec<f64>,
    y_mean: Vec<f64>,
    order: Vec<u32>,
}

thread_local! {
    static SCRATCH: RefCell<WorkerScratch> = const {
        RefCell::new(WorkerScratch {
            u_eff: Vec::new(),
            y_mean: Vec::new(),
            order: Vec::new(),
        })
    };
}

pub(crate) fn n_batches(n_records: usize, batch_size: usize) -> usize {
    n_records.div_ceil(batch_size)
}

/// One pass over every record.
fn run_epoch(
    pool: &ThreadPool,
    view: &HogwildParams<'_>,
    ctx: &StepContext<'_>,
    records: &[Record],
    batch_order: &[usize],
    epoch: u64,
) {
    let batch_size = ctx.config.batch_size;
    let rank = ctx.config.rank;
    let shuffle = ctx.config.shuffle;
    let seed = ctx.config.seed;

    pool.install(|| {
        batch_order.par_iter().for_each(|&batch| {
            SCRATCH.with(|cell| {
                let mut scratch = cell.borrow_mut();
                let WorkerScratch {
                    u_eff,
                    y_mean,
                    order,
                } = &mut *scratch;
                u_eff.resize(rank, 0.0);
                y_mean.resize(rank, 0.0);
                order.clear();
                order.extend(0..batch_size as u32);
                if shuffle {
                    BatchRng::for_batch(seed, epoch, batch).permute(order);
                }

                let base = batch * batch_size;
                for &offset in order.iter() {
                    let index = base + offset as usize;
                    if index >= records.len() {
                        continue;
                    }
                    sgd_step(view, ctx, &records[index], u_eff, y_mean);
                }
            });
        });
    });
}

/// Multiplies every matrix by `(1 - lambda * rate)^power`, row-wise for the
/// bias coefficient matrices. Runs on `pool`.
pub(crate) fn shrink(pool: &ThreadPool, params: &mut ModelParams, config: &ModelConfig, rate: f64) {
    let factor = |lambda: f64| (1.0 - lambda * rate).powf(config.regularization_power);

    pool.install(|| {
        params.u0.scale(factor(config.u0_lambda));
        params.u1.scale(factor(config.u1_lambda));
        params.v.scale(factor(config.v_lambda));
        params.y.scale(factor(config.y_lambda));
        params.a_timebin.scale(factor(config.lambda));
        params.b_timebin.scale(factor(config.lambda));

        let a_shrink: Vec<f64> = params.a_lambda.iter().map(|&l| factor(l)).collect();
        let b_shrink: Vec<f64> = params.b_lambda.iter().map(|&l| factor(l)).collect();
        params.a.scale_rows(&a_shrink);
        params.b.scale_rows(&b_shrink);
    });
}

pub(crate) fn decay(rate: f64, config: &ModelConfig) -> f64 {
    (rate * config.learning_rate_decay).max(config.learning_rate_min)
}

/// Scores records in parallel; ids and dates must be validated.
pub(crate) fn predict_all(
    pool: &ThreadPool,
    params: &ModelParams,
    basis: &TemporalBasis,
    config: &ModelConfig,
    records: &[Record],
) -> Vec<f64> {
    let k = config.rank;
    pool.install(|| {
        records
            .par_iter()
            .map_init(
                || (vec![0.0; k], vec![0.0; k]),
                |(u_eff, y_mean), r| predict_with(params, basis, config, r, u_eff, y_mean),
            )
            .collect()
    })
}

/// One score per line, input order.
pub(crate) fn write_predictions(path: &Path, scores: &[f64]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for s in scores {
        writeln!(writer, "{s}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs `iterations` epochs over `records`.
///
/// `epoch_base` offsets shuffle seeds so repeated fits do not replay the same
/// schedule.
#[allow(clippy::too_many_arguments)]
pub(crate) fn train(
    pool: &ThreadPool,
    params: &mut ModelParams,
    basis: &TemporalBasis,
    config: &ModelConfig,
    records: &[Record],
    iterations: usize,
    epoch_base: u64,
    diagnostics: FitDiagnostics<'_>,
) -> Result<Vec<EpochReport>> {
    let mut batch_order: Vec<usize> = (0..n_batches(records.len(), config.batch_size)).collect();
    let mut shuffler = StdRng::seed_from_u64(config.seed.wrapping_add(epoch_base));
    let mut rate = config.learning_rate;
    let mut reports = Vec::with_capacity(iterations);

    tracing::info!(
        records = records.len(),
        batches = batch_order.len(),
        batch_size = config.batch_size,
        threads = pool.current_num_threads(),
        rank = config.rank,
        iterations,
        "starting fit"
    );

    for epoch in 0..iterations {
        let epoch_start = Instant::now();
        if config.shuffle {
            batch_order.shuffle(&mut shuffler);
        }

        {
            let view = HogwildParams::new(params);
            let ctx = StepContext {
                basis,
                config,
                learning_rate: rate,
            };
            run_epoch(pool, &view, &ctx, records, &batch_order, epoch_base + epoch as u64);
        }
        let elapsed = epoch_start.elapsed().as_secs_f64();

        let validation_rmse = diagnostics.validation.map(|set| {
            let predicted = predict_all(pool, params, basis, config, set);
            metrics::rmse(set, &predicted)
        });

        let qualifying_output = match diagnostics.qualifying {
            Some((set, dir)) => {
                let predicted = predict_all(pool, params, basis, config, set);
                let path = dir.join(format!("output_iter_{epoch}.txt"));
                write_predictions(&path, &predicted)?;
                Some(path)
            }
            None => None,
        };

        let magnitudes = params.magnitudes();
        let samples_per_sec = if elapsed > 0.0 {
            records.len() as f64 / elapsed
        } else {
            0.0
        };
        tracing::info!(
            epoch,
            learning_rate = rate,
            elapsed_secs = elapsed,
            samples_per_sec,
            validation_rmse = ?validation_rmse,
            max_u0 = magnitudes.u0,
            max_u1 = magnitudes.u1,
            max_v = magnitudes.v,
            max_y = magnitudes.y,
            max_a = magnitudes.a,
            max_b = magnitudes.b,
            "epoch finished"
        );
        reports.push(EpochReport {
            epoch,
            learning_rate: rate,
            elapsed_secs: elapsed,
            samples_per_sec,
            validation_rmse,
            qualifying_output,
            magnitudes,
        });

        if epoch + 1 != iterations {
            shrink(pool, params, config, rate);
            rate = decay(rate, config);
        }
    }

    Ok(reports)
}
