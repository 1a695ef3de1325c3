//! Time-aware latent factor model for rating prediction.
//!
//! Ratings are explained by a global mean, a user embedding that drifts with
//! time, item embeddings, smooth per-entity temporal biases and coarse time-bin
//! biases. Training is lock-free parallel SGD over batches of records.

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
use mimalloc::MiMalloc;

#[cfg(feature = "python")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod basis;
pub mod config;
pub mod error;
pub mod init;
mod linalg;
pub mod matrix;
pub mod metrics;
pub mod model;
pub mod params;
pub mod persist;
pub mod predict;
pub mod records;
pub mod train;
pub mod update;

#[cfg(feature = "python")]
mod python;

pub use basis::TemporalBasis;
pub use config::{FrequencyMode, ModelConfig};
pub use error::{EntityKind, ModelError, Result};
pub use model::TimeSvd;
pub use params::{ModelParams, ParameterMagnitudes};
pub use persist::MODEL_ID;
pub use predict::{MAX_SCORE, MIN_SCORE};
pub use records::{Record, RecordStore, RECORD_SIZE};
pub use train::{EpochReport, FitDiagnostics};

#[cfg(feature = "python")]
#[pymodule]
fn _timesvd(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PyTimeSvd>()?;
    m.add("MODEL_ID", MODEL_ID)?;
    Ok(())
}
