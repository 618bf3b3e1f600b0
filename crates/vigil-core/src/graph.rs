//! Inference device and graph handles.
//!
//! A graph is a serialized network (ONNX) allocated on an execution device.
//! The engine only sees the [`InferenceGraph`] trait, so the runtime behind
//! it can be swapped without touching the identification pipeline.

use crate::engine::EngineError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::path::{Path, PathBuf};

const CPU_DEVICE: &str = "cpu";

/// A loaded network that maps one input tensor to one output vector.
pub trait InferenceGraph {
    /// Square edge length of the expected input image.
    fn input_size(&self) -> u32;

    /// Run a forward pass and return the flattened first output.
    fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EngineError>;
}

/// An execution device that graphs can be allocated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
}

impl Device {
    /// List the devices available to this build.
    pub fn enumerate() -> Vec<Device> {
        vec![Device {
            name: CPU_DEVICE.to_string(),
        }]
    }

    /// Open a device by name (case-insensitive).
    pub fn open(name: &str) -> Result<Device, EngineError> {
        Self::enumerate()
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::DeviceUnavailable(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// ONNX Runtime graph handle.
pub struct OnnxGraph {
    session: Session,
    input_size: u32,
    path: PathBuf,
}

impl OnnxGraph {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&mut self, input: &Array4<f32>) -> ort::Result<Vec<f32>> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

impl InferenceGraph for OnnxGraph {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EngineError> {
        self.run(input)
            .map_err(|e| EngineError::Inference(format!("device execution fault: {e}")))
    }
}

/// Read a serialized graph from disk and allocate it on `device`.
pub fn load_graph(
    path: &Path,
    device: &Device,
    input_size: u32,
    intra_threads: usize,
) -> Result<OnnxGraph, EngineError> {
    let graph_load_error = |reason: String| EngineError::GraphLoad {
        path: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| graph_load_error(e.to_string()))?;
    if bytes.is_empty() {
        return Err(graph_load_error("file is empty".into()));
    }

    let session = build_session(&bytes, intra_threads)
        .map_err(|e| graph_load_error(format!("rejected by runtime: {e}")))?;

    tracing::info!(
        path = %path.display(),
        device = %device,
        input_size,
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "graph allocated"
    );

    Ok(OnnxGraph {
        session,
        input_size,
        path: path.to_path_buf(),
    })
}

fn build_session(bytes: &[u8], intra_threads: usize) -> ort::Result<Session> {
    let session = Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_memory(bytes)?;
    Ok(session)
}
