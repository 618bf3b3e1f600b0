//! One identification request, end to end.
//!
//! Decode the probe, embed it, then walk the gallery in file-name order,
//! embedding and comparing each reference image. Under
//! [`MatchPolicy::FirstMatch`] the scan stops at the first match and, when
//! nothing matches, the confidence of the *last* comparison is reported.

use crate::engine::{Embedder, EngineError};
use crate::gallery::{self, EmbeddingCache, GalleryEntry};
use crate::matcher::{MatchError, MatchPolicy, Matcher};
use crate::types::{Embedding, InferenceResult, MatchDecision, NO_COMPARISON_CONFIDENCE};
use image::{DynamicImage, ImageError, ImageReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("probe is not a valid image: {0}")]
    ImageDecode(#[source] ImageError),
    #[error("probe inference failed: {0}")]
    Inference(#[source] EngineError),
    #[error("gallery directory {path} is unavailable: {source}")]
    GalleryUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Failure on a single gallery entry. Logged and skipped, never fatal.
#[derive(Error, Debug)]
enum EntryError {
    #[error("decode: {0}")]
    Decode(#[from] ImageError),
    #[error("{0}")]
    Inference(#[from] EngineError),
}

/// Decode submitted image bytes, sniffing the format from content.
pub fn decode_probe(bytes: &[u8]) -> Result<DynamicImage, SessionError> {
    image::load_from_memory(bytes).map_err(SessionError::ImageDecode)
}

fn decode_file(path: &Path) -> Result<DynamicImage, ImageError> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(ImageError::IoError)?
        .decode()
}

/// Running state of a gallery scan.
#[derive(Default)]
struct Scan<'a> {
    last: Option<f32>,
    closest: Option<f32>,
    matched: Option<(&'a str, f32)>,
}

impl<'a> Scan<'a> {
    /// Record one comparison. Returns `true` when the scan should stop.
    fn record(&mut self, label: &'a str, decision: MatchDecision, policy: MatchPolicy) -> bool {
        let confidence = decision.confidence;
        self.last = Some(confidence);
        self.closest = Some(self.closest.map_or(confidence, |c| c.min(confidence)));

        if !decision.is_match {
            return false;
        }
        match policy {
            MatchPolicy::FirstMatch => {
                self.matched = Some((label, confidence));
                true
            }
            MatchPolicy::BestMatch => {
                if self.matched.map_or(true, |(_, best)| confidence < best) {
                    self.matched = Some((label, confidence));
                }
                false
            }
        }
    }

    fn into_result(self, policy: MatchPolicy) -> InferenceResult {
        if let Some((label, confidence)) = self.matched {
            return InferenceResult::identified(label, confidence);
        }
        let reported = match policy {
            MatchPolicy::FirstMatch => self.last,
            MatchPolicy::BestMatch => self.closest,
        };
        InferenceResult::intruder(reported.unwrap_or(NO_COMPARISON_CONFIDENCE))
    }
}

/// Identification pipeline bound to one gallery directory and matcher.
pub struct InferenceSession<M> {
    gallery_dir: PathBuf,
    matcher: M,
    policy: MatchPolicy,
    cache: Option<EmbeddingCache>,
}

impl<M: Matcher> InferenceSession<M> {
    pub fn new(gallery_dir: impl Into<PathBuf>, matcher: M, policy: MatchPolicy) -> Self {
        Self {
            gallery_dir: gallery_dir.into(),
            matcher,
            policy,
            cache: None,
        }
    }

    /// Remember gallery embeddings across requests, keyed by path and mtime.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(EmbeddingCache::new);
        self
    }

    pub fn gallery_dir(&self) -> &Path {
        &self.gallery_dir
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Decode `bytes` and identify the face in it.
    pub fn identify<E: Embedder + ?Sized>(
        &mut self,
        embedder: &mut E,
        bytes: &[u8],
    ) -> Result<InferenceResult, SessionError> {
        let probe = decode_probe(bytes)?;
        self.identify_image(embedder, &probe)
    }

    /// Identify an already decoded probe image.
    pub fn identify_image<E: Embedder + ?Sized>(
        &mut self,
        embedder: &mut E,
        probe: &DynamicImage,
    ) -> Result<InferenceResult, SessionError> {
        let probe = embedder.embed(probe).map_err(SessionError::Inference)?;

        let entries = gallery::enumerate(&self.gallery_dir).map_err(|source| {
            SessionError::GalleryUnavailable {
                path: self.gallery_dir.display().to_string(),
                source,
            }
        })?;
        if let Some(cache) = self.cache.as_mut() {
            cache.retain_live(&entries);
        }
        tracing::debug!(entries = entries.len(), policy = %self.policy, "scanning gallery");

        let mut scan = Scan::default();
        for entry in &entries {
            let known = match self.gallery_embedding(embedder, entry) {
                Ok(known) => known,
                Err(err) => {
                    tracing::warn!(
                        path = %entry.path.display(),
                        error = %err,
                        "skipping unusable gallery image"
                    );
                    continue;
                }
            };

            let decision = self.matcher.compare(&known, &probe)?;
            tracing::debug!(
                label = %entry.label,
                confidence = decision.confidence,
                is_match = decision.is_match,
                "compared gallery entry"
            );
            if scan.record(&entry.label, decision, self.policy) {
                tracing::info!(label = %entry.label, confidence = decision.confidence, "match");
                break;
            }
        }

        Ok(scan.into_result(self.policy))
    }

    fn gallery_embedding<E: Embedder + ?Sized>(
        &mut self,
        embedder: &mut E,
        entry: &GalleryEntry,
    ) -> Result<Embedding, EntryError> {
        let modified = self
            .cache
            .as_ref()
            .and_then(|_| std::fs::metadata(&entry.path).and_then(|m| m.modified()).ok());

        if let (Some(cache), Some(modified)) = (self.cache.as_ref(), modified) {
            if let Some(hit) = cache.get(&entry.path, modified) {
                return Ok(hit.clone());
            }
        }

        let image = decode_file(&entry.path)?;
        let embedding = embedder.embed(&image)?;

        if let (Some(cache), Some(modified)) = (self.cache.as_mut(), modified) {
            cache.insert(entry.path.clone(), modified, embedding.clone());
        }
        Ok(embedding)
    }
}
