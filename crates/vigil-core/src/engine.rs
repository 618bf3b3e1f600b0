//! Embedding engine: image in, embedding out.
//!
//! Holds the loaded graph for the lifetime of the process. The engine keeps no
//! identity state; everything gallery-related lives in the session.

use crate::graph::InferenceGraph;
use crate::preprocess::{self, TensorLayout};
use crate::types::Embedding;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no accelerator device named `{0}` is available")]
    DeviceUnavailable(String),
    #[error("failed to load graph {path}: {reason}")]
    GraphLoad { path: String, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Anything that turns an image into an embedding.
///
/// The session only depends on this trait; the daemon plugs in an
/// [`EmbeddingEngine`], tests plug in fakes.
pub trait Embedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, EngineError>;
}

/// Post-processing options for [`EmbeddingEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub layout: TensorLayout,
    /// Expected output length. `None` accepts whatever the graph produces.
    pub embedding_dim: Option<usize>,
    pub l2_normalize: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            layout: TensorLayout::Nchw,
            embedding_dim: None,
            l2_normalize: true,
        }
    }
}

/// Graph-backed embedder.
pub struct EmbeddingEngine<G> {
    graph: G,
    options: EngineOptions,
}

impl<G: InferenceGraph> EmbeddingEngine<G> {
    pub fn new(graph: G, options: EngineOptions) -> Self {
        Self { graph, options }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Normalize `image` to the graph's input and run one forward pass.
    pub fn infer(&mut self, image: &DynamicImage) -> Result<Embedding, EngineError> {
        let input =
            preprocess::image_to_tensor(image, self.graph.input_size(), self.options.layout)?;
        let raw = self.graph.forward(&input)?;

        if raw.is_empty() {
            return Err(EngineError::Inference("graph produced an empty output".into()));
        }
        if let Some(dim) = self.options.embedding_dim {
            if raw.len() != dim {
                return Err(EngineError::Inference(format!(
                    "expected {dim}-dim embedding, got {}",
                    raw.len()
                )));
            }
        }

        let embedding = Embedding::new(raw);
        Ok(if self.options.l2_normalize {
            embedding.l2_normalized()
        } else {
            embedding
        })
    }
}

impl<G: InferenceGraph> Embedder for EmbeddingEngine<G> {
    fn embed(&mut self, image: &DynamicImage) -> Result<Embedding, EngineError> {
        self.infer(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use ndarray::Array4;

    /// Returns the mean of each input channel, or a device fault on demand.
    struct ChannelMeanGraph {
        size: u32,
        fail: bool,
        last_shape: Vec<usize>,
    }

    impl ChannelMeanGraph {
        fn new(size: u32) -> Self {
            Self { size, fail: false, last_shape: Vec::new() }
        }
    }

    impl InferenceGraph for ChannelMeanGraph {
        fn input_size(&self) -> u32 {
            self.size
        }

        fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EngineError> {
            self.last_shape = input.shape().to_vec();
            if self.fail {
                return Err(EngineError::Inference("device execution fault: stalled".into()));
            }
            let per_channel = (self.size * self.size) as f32;
            Ok((0..3)
                .map(|c| input.index_axis(ndarray::Axis(1), c).sum() / per_channel)
                .collect())
        }
    }

    fn solid(rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 30, Rgb(rgb)))
    }

    #[test]
    fn test_infer_resizes_to_graph_input() {
        let mut engine = EmbeddingEngine::new(ChannelMeanGraph::new(8), EngineOptions::default());
        engine.infer(&solid([1, 2, 3])).unwrap();
        assert_eq!(engine.graph().last_shape, vec![1, 3, 8, 8]);
    }

    #[test]
    fn test_infer_without_normalization_exposes_raw_output() {
        let options = EngineOptions { l2_normalize: false, ..EngineOptions::default() };
        let mut engine = EmbeddingEngine::new(ChannelMeanGraph::new(4), options);
        let embedding = engine.infer(&solid([128, 0, 128])).unwrap();
        assert!(embedding.values[0].abs() < 1e-6);
        assert!((embedding.values[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_infer_l2_normalizes_by_default() {
        let mut engine = EmbeddingEngine::new(ChannelMeanGraph::new(4), EngineOptions::default());
        let embedding = engine.infer(&solid([0, 0, 0])).unwrap();
        let norm: f32 = embedding.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_infer_rejects_wrong_dimension() {
        let options = EngineOptions { embedding_dim: Some(128), ..EngineOptions::default() };
        let mut engine = EmbeddingEngine::new(ChannelMeanGraph::new(4), options);
        let err = engine.infer(&solid([0, 0, 0])).unwrap_err();
        assert!(matches!(err, EngineError::Inference(msg) if msg.contains("128")));
    }

    #[test]
    fn test_infer_propagates_device_fault() {
        let mut graph = ChannelMeanGraph::new(4);
        graph.fail = true;
        let mut engine = EmbeddingEngine::new(graph, EngineOptions::default());
        assert!(matches!(
            engine.infer(&solid([0, 0, 0])),
            Err(EngineError::Inference(_))
        ));
    }

    #[test]
    fn test_infer_rejects_zero_size_image() {
        let mut engine = EmbeddingEngine::new(ChannelMeanGraph::new(4), EngineOptions::default());
        let err = engine.infer(&DynamicImage::new_rgb8(0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::Inference(_)));
        assert!(engine.graph().last_shape.is_empty(), "graph must not run");
    }
}
