//! Corpus items: immutable units of source text fed through the pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::tier::Tier;

/// One unit of input source text.
///
/// Immutable once loaded; workers share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusItem {
    /// Relative path from the corpus root, `/`-separated.
    pub id: String,

    /// Where the item was read from.
    pub source_path: PathBuf,

    /// Source text as loaded.
    pub source: String,

    /// SHA-256 of `source`, hex encoded.
    pub digest: String,

    /// Pre-existing transpiled artifact (paired verification).
    pub precompiled: Option<PathBuf>,

    /// Tier assigned by the manifest, overriding the classifier.
    pub tier_tag: Option<Tier>,
}

impl CorpusItem {
    /// Create an item, computing its content digest.
    pub fn new(id: impl Into<String>, source_path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        let source = source.into();
        let digest = content_digest(source.as_bytes());
        Self {
            id: id.into(),
            source_path: source_path.into(),
            source,
            digest,
            precompiled: None,
            tier_tag: None,
        }
    }

    /// Attach a pre-existing transpiled artifact.
    pub fn with_precompiled(mut self, path: impl Into<PathBuf>) -> Self {
        self.precompiled = Some(path.into());
        self
    }

    /// Attach a manifest tier tag.
    pub fn with_tier_tag(mut self, tier: Tier) -> Self {
        self.tier_tag = Some(tier);
        self
    }

    /// File name used when the item is materialised in a scratch directory.
    pub fn file_name(&self) -> String {
        Path::new(&self.id)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "item".to_string())
    }

    /// File stem used to name derived artifacts.
    pub fn file_stem(&self) -> String {
        Path::new(&self.file_name())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "item".to_string())
    }
}

/// An item that could not be loaded; listed in the report, never checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludedItem {
    /// Identifier as given by the manifest or scan.
    pub id: String,

    /// Why the item was excluded.
    pub reason: String,
}

/// SHA-256 of arbitrary bytes, hex encoded.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
