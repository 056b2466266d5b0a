//! Image tasks: WebP derivatives and cached recompression.
//!
//! | Task | Input | Output |
//! |---|---|---|
//! | [`convert_to_webp`] | `<images>/**/*.{jpg,jpeg,png}` | `<output>/img/<rel>.webp` |
//! | [`compress_images`] | `<images>/**/*.{jpg,jpeg,png,svg,webp}` | `<output>/img/<rel>` |
//!
//! Encoding runs on the rayon pool; the manifest update and the report are
//! assembled sequentially afterwards. Compression consults the
//! [content-addressed cache](crate::cache) so unchanged images cost one hash.

use crate::artifact::{relative_display, walk_files, write_if_changed};
use crate::cache::{self, CacheManifest, CacheStats};
use crate::config::Project;
use crate::imaging::{BackendError, CompressParams, ImageBackend, ImageKind, Quality, RustBackend};
use crate::task::{TaskKind, TaskReport};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Raster formats that get a WebP derivative.
pub const WEBP_SOURCES: &[&str] = &["jpg", "jpeg", "png"];

/// Formats the compression task copies into the output tree.
pub const COMPRESSIBLE: &[&str] = &["jpg", "jpeg", "png", "svg", "webp"];

/// `<output>/img/<rel>` with the extension replaced by `.webp`.
pub fn webp_output_path(project: &Project, source: &Path) -> PathBuf {
    let layout = &project.layout;
    let rel = source.strip_prefix(&layout.images).unwrap_or(source);
    layout.output_img().join(rel).with_extension("webp")
}

pub fn convert_to_webp(project: &Project) -> Result<TaskReport, ImageError> {
    convert_to_webp_with(project, &RustBackend::new())
}

/// WebP conversion against a specific backend (allows testing with mock).
pub fn convert_to_webp_with(
    project: &Project,
    backend: &impl ImageBackend,
) -> Result<TaskReport, ImageError> {
    let mut report = TaskReport::new(TaskKind::Webp);
    let sources = walk_files(&project.layout.images, WEBP_SOURCES)?;

    let encoded: Vec<(PathBuf, Result<Vec<u8>, ImageError>)> = sources
        .into_par_iter()
        .map(|source| {
            let result = fs::read(&source)
                .map_err(ImageError::from)
                .and_then(|bytes| Ok(backend.to_webp(&bytes)?));
            (source, result)
        })
        .collect();

    for (source, result) in encoded {
        match result {
            Ok(webp) => {
                let out = webp_output_path(project, &source);
                if write_if_changed(&out, &webp)? {
                    report.written.push(out);
                } else {
                    report.unchanged.push(out);
                }
            }
            Err(ImageError::Io(e)) => return Err(e.into()),
            Err(e) => report.fail(source, e.to_string()),
        }
    }
    Ok(report)
}

/// What happened to one source during compression.
enum Outcome {
    /// Output already current.
    Hit,
    /// Same content was cached elsewhere; output copied from there. `true`
    /// when the copy changed the file on disk.
    Copied(bool),
    /// Recompressed; the bytes to write.
    Compressed(Vec<u8>),
}

struct Job {
    source: PathBuf,
    /// Output path relative to `<output>/img`, the cache key.
    rel: String,
    source_hash: String,
    params_hash: String,
    outcome: Result<Outcome, ImageError>,
}

fn compress_one(
    source: PathBuf,
    manifest: &CacheManifest,
    project: &Project,
    params: &CompressParams,
    backend: &impl ImageBackend,
) -> Job {
    let out_dir = project.layout.output_img();
    let rel = relative_display(&source, &project.layout.images);
    let mut job = Job {
        source,
        rel,
        source_hash: String::new(),
        params_hash: String::new(),
        outcome: Ok(Outcome::Hit),
    };
    let Some(kind) = ImageKind::from_path(&job.source) else {
        job.outcome = Err(BackendError::ProcessingFailed("unsupported image type".into()).into());
        return job;
    };
    let bytes = match fs::read(&job.source) {
        Ok(b) => b,
        Err(e) => {
            job.outcome = Err(e.into());
            return job;
        }
    };
    job.source_hash = cache::hash_bytes(&bytes);
    job.params_hash = cache::hash_compress_params(kind, params);

    job.outcome = match manifest.find_cached(&job.source_hash, &job.params_hash, &job.rel, &out_dir) {
        Some(stored) if stored == job.rel => Ok(Outcome::Hit),
        Some(stored) => copy_cached(&out_dir.join(stored), &out_dir.join(&job.rel)),
        None => backend
            .compress(kind, &bytes, params)
            .map(|packed| Outcome::Compressed(smaller(packed, bytes)))
            .map_err(ImageError::from),
    };
    job
}

fn copy_cached(from: &Path, to: &Path) -> Result<Outcome, ImageError> {
    let bytes = fs::read(from)?;
    Ok(Outcome::Copied(write_if_changed(to, &bytes)?))
}

/// Keep the recompressed bytes only when they actually save space.
fn smaller(packed: Vec<u8>, original: Vec<u8>) -> Vec<u8> {
    if packed.len() < original.len() {
        packed
    } else {
        original
    }
}

pub fn compress_images(project: &Project) -> Result<TaskReport, ImageError> {
    compress_images_with(project, &RustBackend::new())
}

/// Compression against a specific backend (allows testing with mock).
pub fn compress_images_with(
    project: &Project,
    backend: &impl ImageBackend,
) -> Result<TaskReport, ImageError> {
    let out_dir = project.layout.output_img();
    let mut report = TaskReport::new(TaskKind::Images);
    let params = CompressParams {
        jpeg_quality: Quality::new(project.config.images.jpeg_quality),
    };

    let sources = walk_files(&project.layout.images, COMPRESSIBLE)?;
    let mut manifest = CacheManifest::load(&out_dir);
    let jobs: Vec<Job> = sources
        .into_par_iter()
        .map(|source| compress_one(source, &manifest, project, &params, backend))
        .collect();

    let sources: HashSet<String> = jobs.iter().map(|job| job.rel.clone()).collect();
    let mut stats = CacheStats::default();
    for job in jobs {
        let out = out_dir.join(&job.rel);
        match job.outcome {
            Ok(Outcome::Hit) => {
                stats.hit();
                report.unchanged.push(out);
            }
            Ok(Outcome::Copied(changed)) => {
                stats.copy();
                if changed {
                    report.written.push(out);
                } else {
                    report.unchanged.push(out);
                }
            }
            Ok(Outcome::Compressed(bytes)) => {
                stats.miss();
                if write_if_changed(&out, &bytes)? {
                    report.written.push(out);
                } else {
                    report.unchanged.push(out);
                }
            }
            Err(ImageError::Io(e)) => return Err(e.into()),
            Err(e) => {
                report.fail(job.source, e.to_string());
                continue;
            }
        }
        manifest.insert(job.rel, job.source_hash, job.params_hash);
    }

    let pruned = manifest.retain_outputs(|rel| sources.contains(rel));
    if (stats.total() > 0 || pruned > 0) && manifest.save(&out_dir)? {
        tracing::debug!(entries = manifest.len(), pruned, "saved image cache");
    }
    tracing::debug!(%stats, "image cache");
    report.summary = Some(stats.to_string());
    Ok(report)
}
