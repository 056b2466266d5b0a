//! # webpipe
//!
//! A front-end asset pipeline in one binary. It builds a site from a fixed
//! source layout into an output tree, serves the output with live reload, and
//! re-runs the affected tasks when sources change.
//!
//! # Architecture: Independent Tasks Over a Shared Tree
//!
//! ```text
//! src/scss/*.scss        → styles      → build/css/*.css
//! src/css/*.css          → css-bundle  → build/css/bundle.css
//! src/pages/*.html       → pages       → build/*.html
//! src/js/script.js       → scripts     → build/js/all.js
//! src/fonts/*.ttf        → font-files  → build/fonts/*.woff, *.woff2
//! src/fonts/*            → font-styles → src/scss/_fonts.scss (appended)
//! src/img/**             → webp        → build/img/**/*.webp
//! src/img/**             → images      → build/img/** (compressed, cached)
//! build/css/*.css        → purge-css   → build/css/*.css (manual)
//! build/*.html           → webp-html   → build/*.html (manual)
//! ```
//!
//! Tasks never call each other. Each is an idempotent function from part of
//! the source tree to part of the output tree, run by [`task::TaskKind::run`].
//! The only coupling is the file system, which is also what the
//! [`watch`]er observes: a task's output landing in `build/` is what triggers
//! a browser reload.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `webpipe.toml` loading, merging over stock defaults, validation, resolved [`config::Layout`] |
//! | [`task`] | Task kinds, reports, series/parallel composition |
//! | [`artifact`] | Atomic writes and sorted file listings shared by every task |
//! | [`styles`] | Sass compilation, CSS bundling, autoprefix/minify, unused-selector purge |
//! | [`markup`] | `@@include` expansion, HTML beautification, `<picture>` WebP rewrite |
//! | [`script`] | Script bundling behind the [`script::Bundler`] trait, resident watch mode |
//! | [`fonts`] | TTF → WOFF/WOFF2 encoders and `font-face` declaration generation |
//! | [`images`] | WebP derivatives and cached image recompression |
//! | [`imaging`] | Pure-Rust image encoding backend |
//! | [`cache`] | Content-addressed compression cache |
//! | [`server`] | Dev server: static files, Server-Sent Events live reload, ghost mode |
//! | [`watch`] | Glob bindings and the per-binding rebuild scheduler |
//! | [`output`] | CLI summaries of task runs |
//!
//! # Design Decisions
//!
//! ## No Node Toolchain
//!
//! Sass is compiled by `grass`, prefixing and minification are done by
//! `lightningcss`, the web font encoders and HTML tooling live in this crate.
//! A project needs the binary and nothing else. An external script bundler
//! can still be plugged in through `scripts.command`.
//!
//! ## Atomic Artifacts
//!
//! Every output goes through [`artifact::write_artifact`]: temp file, flush,
//! rename. The dev server and the watcher never observe half-written files,
//! and a task that returned has nothing left in flight.
//!
//! ## One Extra Run, Never Two at Once
//!
//! Each watch binding has its own tiny state machine with a depth-1 queue.
//! A burst of saves runs the binding's tasks at most twice, and two runs of the
//! same binding never overlap. Bindings do not wait for each other.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod fonts;
pub mod images;
pub mod imaging;
pub mod markup;
pub mod output;
pub mod script;
pub mod server;
pub mod styles;
pub mod task;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
