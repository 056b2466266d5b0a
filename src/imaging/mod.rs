//! Image encoding, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **To WebP** | `image` decoders + lossless `WebPEncoder` |
//! | **Compress** | `PngEncoder` / `JpegEncoder` re-encode, SVG minifier, WebP passthrough |
//!
//! The module is split into:
//! - **Parameters**: what to produce ([`ImageKind`], [`CompressParams`])
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//!
//! Deciding which files to encode, caching and writing artifacts lives in
//! [`crate::images`].

pub mod backend;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use params::{CompressParams, ImageKind, Quality};
pub use rust_backend::RustBackend;
