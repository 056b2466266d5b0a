//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the image tasks
//! need: lossless WebP conversion and same-format recompression. Both take
//! and return bytes; reading sources and writing artifacts stays with the
//! caller.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::{CompressParams, ImageKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Trait for image processing backends.
///
/// `Sync` so the image tasks can share one backend across rayon workers.
pub trait ImageBackend: Sync {
    /// Decode a raster image and encode it as lossless WebP.
    fn to_webp(&self, source: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Recompress an image in its own format.
    ///
    /// The result may be larger than the input; choosing between the two is
    /// the caller's job.
    fn compress(
        &self,
        kind: ImageKind,
        source: &[u8],
        params: &CompressParams,
    ) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend that records operations and returns canned bytes.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        /// When set, `compress` returns this instead of the input.
        pub compressed: Option<Vec<u8>>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        ToWebp {
            len: usize,
        },
        Compress {
            kind: ImageKind,
            len: usize,
            quality: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn compressing_to(bytes: &[u8]) -> Self {
            Self {
                compressed: Some(bytes.to_vec()),
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl ImageBackend for MockBackend {
        fn to_webp(&self, source: &[u8]) -> Result<Vec<u8>, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::ToWebp { len: source.len() });
            if source.is_empty() {
                return Err(BackendError::ProcessingFailed("empty image".to_string()));
            }
            Ok(b"RIFFmockWEBP".to_vec())
        }

        fn compress(
            &self,
            kind: ImageKind,
            source: &[u8],
            params: &CompressParams,
        ) -> Result<Vec<u8>, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Compress {
                kind,
                len: source.len(),
                quality: params.jpeg_quality.value(),
            });
            Ok(self.compressed.clone().unwrap_or_else(|| source.to_vec()))
        }
    }

    #[test]
    fn mock_records_compress() {
        let backend = MockBackend::compressing_to(b"tiny");
        let params = CompressParams {
            jpeg_quality: crate::imaging::Quality::new(60),
        };

        let out = backend.compress(ImageKind::Jpeg, b"original", &params).unwrap();
        assert_eq!(out, b"tiny");

        let ops = backend.get_operations();
        assert_eq!(
            ops,
            vec![RecordedOp::Compress {
                kind: ImageKind::Jpeg,
                len: 8,
                quality: 60
            }]
        );
    }

    #[test]
    fn mock_rejects_empty_webp_source() {
        let backend = MockBackend::new();
        assert!(backend.to_webp(b"").is_err());
        assert!(matches!(
            backend.get_operations()[0],
            RecordedOp::ToWebp { len: 0 }
        ));
    }
}
