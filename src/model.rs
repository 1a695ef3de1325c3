//! `TimeSvd`: the time-aware latent factor model.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use rayon::ThreadPool;

use crate::basis::TemporalBasis;
use crate::config::ModelConfig;
use crate::error::{EntityKind, ModelError, Result};
use crate::init;
use crate::params::ModelParams;
use crate::persist;
use crate::predict::predict_with;
use crate::records::{Record, RecordStore};
use crate::train::{self, EpochReport, FitDiagnostics};

pub struct TimeSvd {
    config: ModelConfig,
    basis: TemporalBasis,
    params: Option<ModelParams>,
    pool: ThreadPool,
    epochs_trained: u64,
}

impl std::fmt::Debug for TimeSvd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSvd")
            .field("config", &self.config)
            .field("initialized", &self.params.is_some())
            .field("epochs_trained", &self.epochs_trained)
            .finish()
    }
}

impl TimeSvd {
    /// Validates `config`, precomputes basis tables and builds the worker pool.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let basis = TemporalBasis::from_config(&config);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .thread_name(|i| format!("timesvd-worker-{i}"))
            .build()?;
        Ok(Self {
            config,
            basis,
            params: None,
            pool,
            epochs_trained: 0,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn basis(&self) -> &TemporalBasis {
        &self.basis
    }

    pub fn params(&self) -> Option<&ModelParams> {
        self.params.as_ref()
    }

    /// Direct access to the store, e.g. to seed fixed embeddings.
    pub fn params_mut(&mut self) -> Option<&mut ModelParams> {
        self.params.as_mut()
    }

    pub fn is_initialized(&self) -> bool {
        self.params.is_some()
    }

    /// Allocates a fresh store sized to the largest ids in `records` and
    /// restarts the shuffle schedule, so a fresh fit depends only on `seed`.
    pub fn init(&mut self, records: &RecordStore) -> Result<()> {
        records.validate(self.config.max_date)?;
        let params = init::initialize(
            &self.config,
            &self.basis,
            records,
            records.max_user(),
            records.max_item(),
        )?;
        self.params = Some(params);
        self.epochs_trained = 0;
        Ok(())
    }

    pub fn fit(
        &mut self,
        records: &RecordStore,
        iterations: usize,
        continue_fit: bool,
    ) -> Result<Vec<EpochReport>> {
        self.fit_with(records, iterations, continue_fit, FitDiagnostics::default())
    }

    /// Trains for `iterations` epochs. Without `continue_fit` the store is
    /// re-initialized from `records` first.
    pub fn fit_with(
        &mut self,
        records: &RecordStore,
        iterations: usize,
        continue_fit: bool,
        diagnostics: FitDiagnostics<'_>,
    ) -> Result<Vec<EpochReport>> {
        records.validate(self.config.max_date)?;
        if !continue_fit {
            self.init(records)?;
        }
        if let Some(set) = diagnostics.validation {
            self.check_scorable(set)?;
        }
        if let Some((set, _)) = diagnostics.qualifying {
            self.check_scorable(set)?;
        }

        let params = self.params.as_mut().ok_or(ModelError::NotInitialized)?;
        check_ids(params, records.as_slice())?;
        params.rebuild_rated_items(records.iter().map(|r| (r.user, r.item)));
        tracing::debug!(users = params.n_users(), "rebuilt rated-item lists");

        let reports = train::train(
            &self.pool,
            params,
            &self.basis,
            &self.config,
            records.as_slice(),
            iterations,
            self.epochs_trained,
            diagnostics,
        )?;
        self.epochs_trained += iterations as u64;
        Ok(reports)
    }

    /// Clamped rating estimate for one observation; the score field is ignored.
    pub fn predict(&self, record: &Record) -> Result<f64> {
        let params = self.params.as_ref().ok_or(ModelError::NotInitialized)?;
        self.check_scorable(std::slice::from_ref(record))?;
        let k = self.config.rank;
        let mut u_eff = vec![0.0; k];
        let mut y_mean = vec![0.0; k];
        Ok(predict_with(
            params,
            &self.basis,
            &self.config,
            record,
            &mut u_eff,
            &mut y_mean,
        ))
    }

    /// Scores in input order, in parallel on the model's pool.
    pub fn predict_batch(&self, records: &[Record]) -> Result<Vec<f64>> {
        let params = self.params.as_ref().ok_or(ModelError::NotInitialized)?;
        self.check_scorable(records)?;
        Ok(train::predict_all(
            &self.pool,
            params,
            &self.basis,
            &self.config,
            records,
        ))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let params = self.params.as_ref().ok_or(ModelError::NotInitialized)?;
        let mut writer = BufWriter::new(File::create(path)?);
        persist::write_params(&mut writer, params)?;
        writer.flush()?;
        Ok(())
    }

    /// Replaces the store with a saved one. On any error the current store is
    /// left as it was.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        let params = persist::read_params(&mut reader, &self.config, &self.basis)?;
        self.params = Some(params);
        Ok(())
    }

    fn check_scorable(&self, records: &[Record]) -> Result<()> {
        let params = self.params.as_ref().ok_or(ModelError::NotInitialized)?;
        for (index, r) in records.iter().enumerate() {
            if r.date == 0 || r.date > self.config.max_date {
                return Err(ModelError::invalid_record(
                    index,
                    format!("date {} outside [1, {}]", r.date, self.config.max_date),
                ));
            }
        }
        check_ids(params, records)
    }
}

fn check_ids(params: &ModelParams, records: &[Record]) -> Result<()> {
    let (n_users, n_items) = (params.n_users(), params.n_items());
    for r in records {
        if r.user == 0 || r.user as usize > n_users {
            return Err(ModelError::EntityOutOfRange {
                kind: EntityKind::User,
                id: r.user,
                count: n_users,
            });
        }
        if r.item == 0 || r.item as usize > n_items {
            return Err(ModelError::EntityOutOfRange {
                kind: EntityKind::Item,
                id: r.item,
                count: n_items,
            });
        }
    }
    Ok(())
}
