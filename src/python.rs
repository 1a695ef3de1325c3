use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::model;
use crate::records::{Record, RecordStore};

impl From<ModelError> for PyErr {
    fn from(err: ModelError) -> PyErr {
        match err {
            ModelError::Io(e) => PyIOError::new_err(e.to_string()),
            ModelError::NotInitialized | ModelError::ThreadPool(_) | ModelError::Allocation { .. } => {
                PyRuntimeError::new_err(err.to_string())
            }
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

fn zip_records(
    users: &[u32],
    items: &[u32],
    dates: &[u32],
    scores: Option<&[f32]>,
) -> PyResult<Vec<Record>> {
    let n = users.len();
    if items.len() != n || dates.len() != n || scores.is_some_and(|s| s.len() != n) {
        return Err(PyValueError::new_err("Input arrays must have equal length."));
    }
    Ok((0..n)
        .map(|k| Record::new(users[k], items[k], dates[k], scores.map_or(0.0, |s| s[k])))
        .collect())
}

#[pyclass(name = "TimeSvd")]
pub struct PyTimeSvd {
    inner: model::TimeSvd,
}

#[pymethods]
impl PyTimeSvd {
    /// `config_json` overrides defaults field by field.
    #[new]
    #[pyo3(signature = (config_json=None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(s) => ModelConfig::from_json_str(s)?,
            None => ModelConfig::default(),
        };
        Ok(Self {
            inner: model::TimeSvd::new(config)?,
        })
    }

    #[getter]
    fn config_json(&self) -> PyResult<String> {
        Ok(self.inner.config().to_json_string()?)
    }

    #[getter]
    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    /// Returns the learning rate each epoch ran with.
    #[pyo3(signature = (users, items, dates, scores, iterations, continue_fit=false))]
    #[allow(clippy::too_many_arguments)]
    fn fit<'py>(
        &mut self,
        py: Python<'py>,
        users: PyReadonlyArray1<u32>,
        items: PyReadonlyArray1<u32>,
        dates: PyReadonlyArray1<u32>,
        scores: PyReadonlyArray1<f32>,
        iterations: usize,
        continue_fit: bool,
    ) -> PyResult<Vec<f64>> {
        let records = RecordStore::new(zip_records(
            users.as_slice()?,
            items.as_slice()?,
            dates.as_slice()?,
            Some(scores.as_slice()?),
        )?);
        let inner = &mut self.inner;
        let reports = py.detach(|| inner.fit(&records, iterations, continue_fit))?;
        Ok(reports.iter().map(|r| r.learning_rate).collect())
    }

    fn predict<'py>(
        &self,
        py: Python<'py>,
        users: PyReadonlyArray1<u32>,
        items: PyReadonlyArray1<u32>,
        dates: PyReadonlyArray1<u32>,
    ) -> PyResult<Py<PyArray1<f64>>> {
        let records = zip_records(users.as_slice()?, items.as_slice()?, dates.as_slice()?, None)?;
        let inner = &self.inner;
        let scores = py.detach(|| inner.predict_batch(&records))?;
        Ok(PyArray1::from_vec(py, scores).into())
    }

    fn save(&self, path: &str) -> PyResult<()> {
        Ok(self.inner.save(path)?)
    }

    fn load(&mut self, path: &str) -> PyResult<()> {
        Ok(self.inner.load(path)?)
    }
}
