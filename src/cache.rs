//! Compression cache for incremental image builds.
//!
//! Recompressing every PNG at best compression on each save of an unrelated
//! image is the slow part of the image task. This module lets
//! [`compress_images`](crate::images::compress_images) skip files whose
//! source bytes and compression settings have not changed since the last run.
//!
//! ## Cache keys
//!
//! The cache is **content-addressed**: lookups are by the combination of
//! `source_hash` and `params_hash`, not by output path. Moving an image to
//! another directory under the images root does not invalidate it; the
//! previous output is copied to the new location instead.
//!
//! - **`source_hash`**: SHA-256 of the source file contents. Content-based
//!   rather than mtime-based so it survives `git checkout`.
//! - **`params_hash`**: SHA-256 of the image kind and the compression
//!   settings that apply to it. Changing `images.jpeg_quality` only
//!   invalidates JPEGs.
//!
//! A cache hit requires:
//! 1. An entry with matching `source_hash` and `params_hash` exists
//! 2. The previously-written output file still exists on disk
//!
//! An entry at the requested output path always wins over another path with
//! the same content, so identical images in two places are both hits. Entries
//! whose source is gone are pruned with [`CacheManifest::retain_outputs`].
//!
//! ## Storage
//!
//! The manifest is a JSON file, `.webpipe-cache.json`, in the image output
//! directory. A missing, unreadable or outdated manifest silently starts an
//! empty cache.

use crate::artifact::write_if_changed;
use crate::imaging::{CompressParams, ImageKind};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the cache manifest file within the image output directory.
pub const MANIFEST_FILENAME: &str = ".webpipe-cache.json";

/// Version of the cache manifest format. Bump this to invalidate all
/// existing caches when the format or key computation changes.
const MANIFEST_VERSION: u32 = 1;

/// A single cached output file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_hash: String,
    pub params_hash: String,
}

impl CacheEntry {
    fn content_key(&self) -> String {
        format!("{}:{}", self.source_hash, self.params_hash)
    }
}

/// On-disk cache manifest mapping output paths to their cache entries.
///
/// Lookups go through a runtime `content_index` that maps
/// `"{source_hash}:{params_hash}"` to one stored output path. Entries are
/// ordered so an unchanged manifest serializes to the same bytes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
    /// Built at load time, maintained on insert. Never serialized.
    #[serde(skip)]
    content_index: HashMap<String, String>,
}

impl CacheManifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
            content_index: HashMap::new(),
        }
    }

    /// Load from the image output directory. Returns an empty manifest if
    /// the file doesn't exist or can't be parsed.
    pub fn load(output_dir: &Path) -> Self {
        let path = manifest_path(output_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let mut manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignoring corrupt cache manifest");
                return Self::empty();
            }
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest.content_index = build_content_index(&manifest.entries);
        manifest
    }

    /// Returns whether the file on disk changed.
    pub fn save(&self, output_dir: &Path) -> io::Result<bool> {
        let json = serde_json::to_string_pretty(self)?;
        write_if_changed(&manifest_path(output_dir), json.as_bytes())
    }

    /// Look up a cached output file by content hashes.
    ///
    /// Returns the stored output path (relative to `output_dir`) if an entry
    /// matches **and** the file is still on disk. `wanted` is returned when
    /// its own entry matches; otherwise any path with the same content, which
    /// the caller copies over.
    pub fn find_cached(
        &self,
        source_hash: &str,
        params_hash: &str,
        wanted: &str,
        output_dir: &Path,
    ) -> Option<String> {
        let exact = self
            .entries
            .get(wanted)
            .is_some_and(|e| e.source_hash == source_hash && e.params_hash == params_hash);
        if exact && output_dir.join(wanted).exists() {
            return Some(wanted.to_string());
        }
        let content_key = format!("{}:{}", source_hash, params_hash);
        let stored_path = self.content_index.get(&content_key)?;
        if output_dir.join(stored_path).exists() {
            Some(stored_path.clone())
        } else {
            None
        }
    }

    /// Record a cache entry for an output file. Other paths holding the same
    /// content keep their entries.
    pub fn insert(&mut self, output_path: String, source_hash: String, params_hash: String) {
        let entry = CacheEntry {
            source_hash,
            params_hash,
        };
        let key = entry.content_key();
        match self.entries.insert(output_path.clone(), entry) {
            Some(previous) if previous.content_key() != key => {
                self.content_index = build_content_index(&self.entries);
            }
            _ => {
                self.content_index.entry(key).or_insert(output_path);
            }
        }
    }

    /// Drop entries whose output path fails `keep`. Returns how many went.
    pub fn retain_outputs(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep(path));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.content_index = build_content_index(&self.entries);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// First path in sorted order wins for content held in several places.
fn build_content_index(entries: &BTreeMap<String, CacheEntry>) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for (output_path, entry) in entries {
        index
            .entry(entry.content_key())
            .or_insert_with(|| output_path.clone());
    }
    index
}

/// SHA-256 of a byte slice, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of the settings that shape one kind's compressed output.
pub fn hash_compress_params(kind: ImageKind, params: &CompressParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"compress\0");
    hasher.update(kind.name().as_bytes());
    hasher.update(b"\0");
    if kind == ImageKind::Jpeg {
        hasher.update(params.jpeg_quality.value().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Summary of cache performance for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub copies: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn copy(&mut self) {
        self.copies += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.copies + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 || self.copies > 0 {
            if self.copies > 0 {
                write!(
                    f,
                    "{} cached, {} copied, {} compressed ({} total)",
                    self.hits,
                    self.copies,
                    self.misses,
                    self.total()
                )
            } else {
                write!(
                    f,
                    "{} cached, {} compressed ({} total)",
                    self.hits,
                    self.misses,
                    self.total()
                )
            }
        } else {
            write!(f, "{} compressed", self.misses)
        }
    }
}

pub fn manifest_path(output_dir: &Path) -> PathBuf {
    output_dir.join(MANIFEST_FILENAME)
}
