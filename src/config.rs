//! Hyper-parameters and runtime constants of the time-aware model.
//!
//! Everything the estimator used to hard-code (date domain, worker count,
//! implicit-feedback switch, NaN checks) is a field here, so tests can run on
//! tiny synthetic date domains.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// How the angular (sin/cos) basis bands pick their frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyMode {
    /// Band `i` uses `w = i`. This is what the trained production models used,
    /// even though a frequency list was configured alongside it.
    LoopIndex,
    /// Band `i` uses `w = frequencies[i]`.
    Listed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub rank: usize,
    pub max_date: u32,
    pub user_time_bins: u32,
    pub item_time_bins: u32,

    /// Shrink strength for every A/B basis row and both time-bin tables.
    pub lambda: f64,
    pub u0_lambda: f64,
    pub u1_lambda: f64,
    pub v_lambda: f64,
    pub y_lambda: f64,
    pub regularization_power: f64,

    pub learning_rate: f64,
    pub learning_rate_decay: f64,
    pub learning_rate_min: f64,

    pub batch_size: usize,
    pub n_threads: usize,

    pub drift_beta: f64,
    pub power_law_betas: Vec<f64>,
    /// `None` selects [`default_frequencies`] for `max_date`.
    pub frequencies: Option<Vec<f64>>,
    pub frequency_mode: FrequencyMode,

    pub implicit_feedback: bool,
    pub check_finite: bool,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rank: 20,
            max_date: 2243,
            user_time_bins: 20,
            item_time_bins: 20,
            lambda: 1e-4,
            u0_lambda: 1e-4,
            u1_lambda: 0.1,
            v_lambda: 1e-3,
            y_lambda: 1e-4,
            regularization_power: 1.0,
            learning_rate: 0.0015,
            learning_rate_decay: 0.9,
            learning_rate_min: 0.0,
            batch_size: 1000,
            n_threads: 8,
            drift_beta: 0.4,
            power_law_betas: vec![0.4, 1.2],
            frequencies: None,
            frequency_mode: FrequencyMode::LoopIndex,
            implicit_feedback: false,
            check_finite: true,
            shuffle: true,
            seed: 42,
        }
    }
}

/// Weekly, half-weekly, quarterly and three long-period bands.
pub fn default_frequencies(max_date: u32) -> Vec<f64> {
    let m = max_date as f64;
    vec![2.0 * m / 28.0, 2.0 * m / 7.0, 2.0 * m / 90.0, 0.25, 1.0, 4.0]
}

impl ModelConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn frequency_list(&self) -> Vec<f64> {
        self.frequencies
            .clone()
            .unwrap_or_else(|| default_frequencies(self.max_date))
    }

    /// Frequency actually fed to band `band`.
    pub fn band_frequency(&self, band: usize, listed: &[f64]) -> f64 {
        match self.frequency_mode {
            FrequencyMode::LoopIndex => band as f64,
            FrequencyMode::Listed => listed[band],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(ModelError::invalid_config("rank must be > 0"));
        }
        if self.max_date == 0 {
            return Err(ModelError::invalid_config("max_date must be > 0"));
        }
        if self.user_time_bins == 0 || self.item_time_bins == 0 {
            return Err(ModelError::invalid_config("time bin counts must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ModelError::invalid_config("batch_size must be > 0"));
        }
        if self.n_threads == 0 {
            return Err(ModelError::invalid_config("n_threads must be > 0"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(ModelError::invalid_config(
                "learning_rate must be finite and >= 0",
            ));
        }
        if !(self.learning_rate_decay > 0.0 && self.learning_rate_decay <= 1.0) {
            return Err(ModelError::invalid_config(
                "learning_rate_decay must be in (0, 1]",
            ));
        }
        if !self.learning_rate_min.is_finite() || self.learning_rate_min < 0.0 {
            return Err(ModelError::invalid_config(
                "learning_rate_min must be finite and >= 0",
            ));
        }
        if !self.regularization_power.is_finite() {
            return Err(ModelError::invalid_config(
                "regularization_power must be finite",
            ));
        }
        let lambdas = [
            ("lambda", self.lambda),
            ("u0_lambda", self.u0_lambda),
            ("u1_lambda", self.u1_lambda),
            ("v_lambda", self.v_lambda),
            ("y_lambda", self.y_lambda),
        ];
        for (name, value) in lambdas {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::invalid_config(format!(
                    "{name} must be finite and >= 0"
                )));
            }
            if 1.0 - value * self.learning_rate <= 0.0 {
                return Err(ModelError::invalid_config(format!(
                    "{name} * learning_rate must be < 1"
                )));
            }
        }
        if self.power_law_betas.iter().any(|b| !b.is_finite() || *b <= 0.0)
            || !self.drift_beta.is_finite()
            || self.drift_beta <= 0.0
        {
            return Err(ModelError::invalid_config("power-law betas must be > 0"));
        }
        let frequencies = self.frequency_list();
        if frequencies.is_empty() {
            return Err(ModelError::invalid_config("frequency list is empty"));
        }
        if frequencies.iter().any(|w| !w.is_finite()) {
            return Err(ModelError::invalid_config("frequencies must be finite"));
        }
        Ok(())
    }
}
