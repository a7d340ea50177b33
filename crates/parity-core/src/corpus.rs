//! Corpus loading: a filesystem scan or a manifest document.
//!
//! Only an unreadable root or manifest aborts the run. Individual items that
//! cannot be read become [`ExcludedItem`] entries and are listed in the
//! report without being checked.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::domain::{CorpusError, CorpusItem, ExcludedItem, Tier};

/// Result alias for corpus loading.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Directory names never descended into during a scan.
pub const DEFAULT_SKIP_DIRS: &[&str] = &["__pycache__"];

/// Where corpus items come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CorpusSource {
    /// Recursive scan of `root` for files with one of `extensions`.
    Scan {
        root: PathBuf,
        extensions: Vec<String>,
        skip_dirs: Vec<String>,
    },
    /// Ordered manifest; entry paths resolve against `root`.
    Manifest { root: PathBuf, manifest: PathBuf },
}

impl CorpusSource {
    /// Scan for `.py` files, skipping the default directories.
    pub fn scan(root: impl Into<PathBuf>) -> Self {
        CorpusSource::Scan {
            root: root.into(),
            extensions: vec!["py".to_string()],
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        match self {
            CorpusSource::Scan { root, .. } | CorpusSource::Manifest { root, .. } => root,
        }
    }
}

/// Items ready for the pipeline plus those that failed to load.
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub root: PathBuf,
    pub items: Vec<Arc<CorpusItem>>,
    pub excluded: Vec<ExcludedItem>,
}

impl LoadedCorpus {
    /// Items enumerated, loaded or not.
    pub fn total(&self) -> usize {
        self.items.len() + self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestEntry {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        tier: Option<u8>,
        #[serde(default)]
        precompiled: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    List(Vec<ManifestEntry>),
    Table {
        #[serde(alias = "item")]
        items: Vec<ManifestEntry>,
    },
}

impl ManifestDocument {
    fn into_entries(self) -> Vec<ManifestEntry> {
        match self {
            ManifestDocument::List(entries) | ManifestDocument::Table { items: entries } => entries,
        }
    }
}

struct PendingItem {
    id: String,
    path: PathBuf,
    tier: Option<Tier>,
    precompiled: Option<PathBuf>,
}

/// Enumerate and read the corpus.
///
/// `max_items` truncates the enumeration (after sorting, for scans) before any
/// file is read.
pub fn load_corpus(source: &CorpusSource, max_items: Option<usize>) -> Result<LoadedCorpus> {
    // Tools run inside per-item workspaces, so item paths must be absolute.
    let root = match source.root().canonicalize() {
        Ok(root) if root.is_dir() => root,
        _ => return Err(CorpusError::RootNotFound(source.root().to_path_buf())),
    };

    let mut pending = match source {
        CorpusSource::Scan {
            extensions,
            skip_dirs,
            ..
        } => scan_root(&root, extensions, skip_dirs)?,
        CorpusSource::Manifest { manifest, .. } => read_manifest(&root, manifest)?,
    };

    if let Some(limit) = max_items {
        if pending.len() > limit {
            debug!(found = pending.len(), limit, "truncating corpus");
            pending.truncate(limit);
        }
    }

    let mut corpus = LoadedCorpus {
        root: root.clone(),
        ..Default::default()
    };
    for entry in pending {
        match load_item(&root, entry) {
            Ok(item) => corpus.items.push(Arc::new(item)),
            Err(excluded) => {
                warn!(item = %excluded.id, reason = %excluded.reason, "corpus item excluded");
                corpus.excluded.push(excluded);
            }
        }
    }

    info!(
        root = %root.display(),
        items = corpus.items.len(),
        excluded = corpus.excluded.len(),
        "corpus loaded"
    );
    Ok(corpus)
}

fn scan_root(root: &Path, extensions: &[String], skip_dirs: &[String]) -> Result<Vec<PendingItem>> {
    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| {
        if e.depth() == 0 || !e.file_type().is_dir() {
            return true;
        }
        let name = e.file_name().to_string_lossy();
        !name.starts_with('.') && !skip_dirs.iter().any(|s| *s == name)
    });

    let mut found = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| CorpusError::Scan {
            root: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let matches = path
            .extension()
            .is_some_and(|ext| extensions.iter().any(|want| ext == want.as_str()));
        if !matches {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        found.push(PendingItem {
            id: relative_id(rel),
            path: path.to_path_buf(),
            tier: None,
            precompiled: None,
        });
    }

    found.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(found)
}

fn read_manifest(root: &Path, manifest: &Path) -> Result<Vec<PendingItem>> {
    let text = std::fs::read_to_string(manifest).map_err(|source| CorpusError::ManifestRead {
        path: manifest.to_path_buf(),
        source,
    })?;
    let document = parse_manifest(manifest, &text)?;

    let mut pending = Vec::new();
    for entry in document.into_entries() {
        let (path, tier, precompiled) = match entry {
            ManifestEntry::Path(path) => (path, None, None),
            ManifestEntry::Detailed {
                path,
                tier,
                precompiled,
            } => (path, tier, precompiled),
        };
        let tier = match tier {
            None => None,
            Some(ordinal) => Some(Tier::from_ordinal(ordinal).ok_or_else(|| {
                CorpusError::ManifestParse {
                    path: manifest.to_path_buf(),
                    reason: format!("item '{path}' has unknown tier {ordinal}"),
                }
            })?),
        };
        pending.push(PendingItem {
            id: relative_id(Path::new(&path)),
            path: root.join(&path),
            tier,
            precompiled: precompiled.map(|p| root.join(p)),
        });
    }
    Ok(pending)
}

/// JSON for `.json` manifests, TOML otherwise.
fn parse_manifest(manifest: &Path, text: &str) -> Result<ManifestDocument> {
    let is_json = manifest
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(text).map_err(|e| e.to_string())
    } else {
        toml::from_str(text).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| CorpusError::ManifestParse {
        path: manifest.to_path_buf(),
        reason,
    })
}

fn load_item(root: &Path, pending: PendingItem) -> std::result::Result<CorpusItem, ExcludedItem> {
    let excluded = |reason: String| ExcludedItem {
        id: pending.id.clone(),
        reason,
    };

    if !pending.path.starts_with(root) || escapes_root(&pending.path, root) {
        return Err(excluded("path escapes the corpus root".to_string()));
    }
    let source = std::fs::read_to_string(&pending.path)
        .map_err(|e| excluded(format!("failed to read {}: {e}", pending.path.display())))?;
    if let Some(pre) = &pending.precompiled {
        if !pre.is_file() {
            return Err(excluded(format!(
                "precompiled artifact not found: {}",
                pre.display()
            )));
        }
    }

    let mut item = CorpusItem::new(pending.id.clone(), pending.path.clone(), source);
    if let Some(pre) = pending.precompiled {
        item = item.with_precompiled(pre);
    }
    if let Some(tier) = pending.tier {
        item = item.with_tier_tag(tier);
    }
    Ok(item)
}

fn escapes_root(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| rel.components().any(|c| matches!(c, Component::ParentDir)))
        .unwrap_or(true)
}

/// `/`-separated identifier for a root-relative path.
fn relative_id(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
