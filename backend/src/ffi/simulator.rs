//! PyO3 wrapper for EpisodeSimulator
//!
//! Scenarios go in and episode reports come out as JSON strings, so the
//! Python side only needs `json.loads`.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::orchestrator::{EpisodeSimulator, Scenario, SimulationError};

/// Python wrapper for the Rust episode simulator
///
/// # Example (from Python)
///
/// ```python
/// from dismissal_coordinator_core import Simulator
/// import json
///
/// sim = Simulator.preset("demo")
/// report = json.loads(sim.next_episode())
/// print(report["initial_risk"], report["final_risk"])
/// ```
#[pyclass(name = "Simulator")]
pub struct PySimulator {
    inner: EpisodeSimulator,
    runtime: tokio::runtime::Runtime,
}

fn to_py_err(err: SimulationError) -> PyErr {
    match err {
        SimulationError::Config(e) => PyValueError::new_err(e.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

impl PySimulator {
    fn build(scenario: Scenario) -> PyResult<Self> {
        let inner = EpisodeSimulator::new(scenario).map_err(to_py_err)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PyRuntimeError::new_err(format!("failed to start runtime: {}", e)))?;
        Ok(Self { inner, runtime })
    }
}

#[pymethods]
impl PySimulator {
    /// Create a simulator from a scenario JSON document
    ///
    /// Raises ValueError if the scenario does not parse or validate.
    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        let scenario = Scenario::from_json(json).map_err(|e| PyValueError::new_err(e.to_string()))?;
        Self::build(scenario)
    }

    /// Create a simulator from a built-in preset
    #[staticmethod]
    fn preset(name: &str) -> PyResult<Self> {
        let scenario = Scenario::preset(name).map_err(|e| PyValueError::new_err(e.to_string()))?;
        Self::build(scenario)
    }

    /// Simulate one episode and return its report as JSON
    fn next_episode(&mut self, py: Python<'_>) -> PyResult<String> {
        let Self { inner, runtime } = self;
        let episode = py
            .allow_threads(|| runtime.block_on(inner.next_episode()))
            .map_err(to_py_err)?;
        serde_json::to_string(&episode.report()).map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    /// Simulate `count` episodes, one JSON report per episode
    fn run(&mut self, py: Python<'_>, count: usize) -> PyResult<Vec<String>> {
        (0..count).map(|_| self.next_episode(py)).collect()
    }

    fn next_episode_index(&self) -> usize {
        self.inner.next_episode_index()
    }

    /// Checkpoint of the state carried into the next episode, as JSON
    fn checkpoint(&self) -> PyResult<String> {
        self.inner
            .checkpoint()
            .to_json()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    /// Every logged event so far, as a JSON array
    fn events(&self) -> PyResult<String> {
        serde_json::to_string(self.inner.event_log().events())
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }
}
