//! vigil-core — Face embedding and gallery identification engine.
//!
//! Embeds a probe image on an inference device, then scans a directory of
//! reference images and reports the first (or best) identity whose embedding
//! falls within the match threshold.

pub mod engine;
pub mod gallery;
pub mod graph;
pub mod matcher;
pub mod preprocess;
pub mod session;
pub mod types;
pub mod wire;

pub use engine::{Embedder, EmbeddingEngine, EngineError, EngineOptions};
pub use gallery::{EmbeddingCache, GalleryEntry};
pub use graph::{load_graph, Device, InferenceGraph, OnnxGraph};
pub use matcher::{DistanceMatcher, MatchError, MatchPolicy, Matcher};
pub use preprocess::TensorLayout;
pub use session::{decode_probe, InferenceSession, SessionError};
pub use types::{Embedding, InferenceResult, MatchDecision};
pub use wire::{ErrorResponse, InferResponse, WireError};
