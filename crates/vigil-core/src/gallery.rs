//! Reference-image gallery: directory enumeration and an optional
//! embedding cache keyed by path and modification time.

use crate::types::Embedding;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File extensions treated as gallery images.
///
/// Matching is case-insensitive, so `ALICE.JPG` is a gallery entry. A
/// case-sensitive suffix check would silently skip such files.
pub const RECOGNIZED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// One known identity: a label derived from the file name and its image path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub label: String,
    pub path: PathBuf,
}

impl GalleryEntry {
    /// Build an entry from an image path. Returns `None` when the extension
    /// is not a recognized image type.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !RECOGNIZED_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        let label = path.file_stem()?.to_string_lossy().into_owned();
        Some(Self {
            label,
            path: path.to_path_buf(),
        })
    }
}

/// List gallery entries in ascending file-name order.
///
/// Directories and files with unrecognized extensions are skipped.
pub fn enumerate(dir: &Path) -> std::io::Result<Vec<GalleryEntry>> {
    let mut entries = Vec::new();
    for item in std::fs::read_dir(dir)? {
        let path = item?.path();
        if !path.is_file() {
            continue;
        }
        match GalleryEntry::from_path(&path) {
            Some(entry) => entries.push(entry),
            None => tracing::trace!(path = %path.display(), "skipping non-image gallery file"),
        }
    }
    entries.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(entries)
}

struct CachedEmbedding {
    modified: SystemTime,
    embedding: Embedding,
}

/// Gallery embeddings remembered across sessions.
///
/// An entry is only served while the file's modification time is unchanged.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: HashMap<PathBuf, CachedEmbedding>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path, modified: SystemTime) -> Option<&Embedding> {
        self.entries
            .get(path)
            .filter(|cached| cached.modified == modified)
            .map(|cached| &cached.embedding)
    }

    pub fn insert(&mut self, path: PathBuf, modified: SystemTime, embedding: Embedding) {
        self.entries.insert(path, CachedEmbedding { modified, embedding });
    }

    /// Drop entries whose files are no longer in the gallery.
    pub fn retain_live(&mut self, live: &[GalleryEntry]) {
        self.entries
            .retain(|path, _| live.iter().any(|entry| &entry.path == path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
