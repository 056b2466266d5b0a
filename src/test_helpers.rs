//! Shared test utilities for the webpipe test suite.
//!
//! Provides a throwaway project root with the default layout and a few
//! file helpers, so task tests read as "these sources in, these artifacts
//! out".
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let fixture = ProjectFixture::new();
//! fixture.write("src/scss/style.scss", ".a { color: red; }");
//!
//! let report = compile_sass(&fixture.project()).unwrap();
//! assert!(report.is_success());
//! assert!(fixture.exists("build/css/style.css"));
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{PipelineConfig, Project};

// =========================================================================
// Fixture setup
// =========================================================================

/// A temporary project root, removed on drop.
pub struct ProjectFixture {
    dir: TempDir,
}

impl ProjectFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a project-relative path.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write a text file, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        self.write_bytes(rel, content.as_bytes());
    }

    pub fn write_bytes(&self, rel: &str, bytes: &[u8]) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    /// Read a text file. Panics with the path on a miss.
    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel))
            .unwrap_or_else(|e| panic!("cannot read '{rel}': {e}"))
    }

    pub fn read_bytes(&self, rel: &str) -> Vec<u8> {
        fs::read(self.path(rel)).unwrap_or_else(|e| panic!("cannot read '{rel}': {e}"))
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    /// Project with the stock configuration.
    pub fn project(&self) -> Project {
        Project::new(self.root(), PipelineConfig::default())
    }

    /// Project with a tweaked stock configuration.
    pub fn project_with(&self, tweak: impl FnOnce(&mut PipelineConfig)) -> Project {
        let mut config = PipelineConfig::default();
        tweak(&mut config);
        Project::new(self.root(), config)
    }
}

// =========================================================================
// Image fixtures
// =========================================================================

/// Encode a small gradient as `format`, for image and WebP tests.
pub fn sample_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
    });
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

// =========================================================================
// Font fixtures
// =========================================================================

/// Build a minimal but structurally valid TrueType file with the given
/// tables. Tags are sorted and checksums computed the way a font tool would.
pub fn sample_sfnt(tables: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut tables: Vec<_> = tables.to_vec();
    tables.sort_by_key(|(tag, _)| **tag);
    let num_tables = tables.len() as u16;

    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&[0u8; 6]);

    let mut offset = 12 + 16 * tables.len();
    let mut directory = Vec::new();
    let mut data = Vec::new();
    for (tag, bytes) in &tables {
        let checksum = bytes
            .chunks(4)
            .map(|c| {
                let mut word = [0u8; 4];
                word[..c.len()].copy_from_slice(c);
                u32::from_be_bytes(word)
            })
            .fold(0u32, u32::wrapping_add);
        directory.extend_from_slice(*tag);
        directory.extend_from_slice(&checksum.to_be_bytes());
        directory.extend_from_slice(&(offset as u32).to_be_bytes());
        directory.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        data.extend_from_slice(bytes);
        while data.len() % 4 != 0 {
            data.push(0);
        }
        offset = 12 + 16 * tables.len() + data.len();
    }
    out.extend_from_slice(&directory);
    out.extend_from_slice(&data);
    out
}

/// A fake font with a handful of realistic-looking tables.
pub fn default_sfnt() -> Vec<u8> {
    let head = [0u8; 54];
    let name = b"webpipe test font name table padding padding padding".repeat(4);
    let glyf = [0x11u8; 120];
    sample_sfnt(&[
        (b"head", &head),
        (b"name", &name),
        (b"glyf", &glyf),
        (b"loca", &[0, 0, 0, 60, 0, 120]),
        (b"zzzz", &[1, 2, 3]),
    ])
}
