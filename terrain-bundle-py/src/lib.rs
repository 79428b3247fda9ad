use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::path::{Path, PathBuf};
use terrain_bundle::{ArtifactBundle, Pipeline, PipelineConfig, PipelineError};

#[pymodule]
#[pyo3(name = "terrain_bundle")]
fn terrain_bundle_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyArtifact>()?;
    m.add_function(wrap_pyfunction!(process, m)?)?;
    m.add_function(wrap_pyfunction!(write_bundle, m)?)?;
    Ok(())
}

#[pyclass(name = "Artifact")]
pub struct PyArtifact {
    #[pyo3(get)]
    pub name: String,
    #[pyo3(get)]
    pub file_name: String,
    #[pyo3(get)]
    pub data: Py<PyBytes>,
    #[pyo3(get)]
    pub size: usize,
}

#[pymethods]
impl PyArtifact {
    fn __len__(&self) -> usize {
        self.size
    }

    fn __repr__(&self) -> String {
        format!(
            "Artifact(name='{}', file_name='{}', size={})",
            self.name, self.file_name, self.size
        )
    }
}

fn to_py_err(err: PipelineError) -> PyErr {
    match &err {
        PipelineError::Stage {
            source: terrain_bundle::Error::Input(_),
            ..
        } => PyErr::new::<pyo3::exceptions::PyValueError, _>(err.to_string()),
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(err.to_string()),
    }
}

fn run_pipeline(
    py: Python<'_>,
    dem_path: &str,
    boundary_path: &str,
    interval: f64,
    workdir: Option<PathBuf>,
) -> PyResult<ArtifactBundle> {
    let config = PipelineConfig {
        contour_interval: interval,
        workspace_root: workdir,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config);

    // 処理中はGILを解放
    py.allow_threads(|| pipeline.run(Path::new(dem_path), Path::new(boundary_path)))
        .map_err(to_py_err)
}

/// DEMを境界で切り抜き、5つの成果物を (名前, 内容) で返す
#[pyfunction]
#[pyo3(signature = (dem_path, boundary_path, interval=1.0, workdir=None))]
pub fn process(
    py: Python<'_>,
    dem_path: &str,
    boundary_path: &str,
    interval: f64,
    workdir: Option<PathBuf>,
) -> PyResult<Vec<PyArtifact>> {
    let bundle = run_pipeline(py, dem_path, boundary_path, interval, workdir)?;

    Ok(bundle
        .artifacts()
        .iter()
        .map(|artifact| PyArtifact {
            name: artifact.name().to_string(),
            file_name: artifact.kind.bundle_file_name(),
            data: PyBytes::new_bound(py, &artifact.bytes).unbind(),
            size: artifact.bytes.len(),
        })
        .collect())
}

#[pyfunction]
#[pyo3(signature = (dem_path, boundary_path, output_path, interval=1.0))]
pub fn write_bundle(
    py: Python<'_>,
    dem_path: &str,
    boundary_path: &str,
    output_path: &str,
    interval: f64,
) -> PyResult<()> {
    let bundle = run_pipeline(py, dem_path, boundary_path, interval, None)?;
    bundle.write_zip(Path::new(output_path)).map_err(|e| {
        PyErr::new::<pyo3::exceptions::PyIOError, _>(format!("Failed to write bundle: {}", e))
    })
}
