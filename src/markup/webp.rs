//! `<picture>` rewrite for built pages.
//!
//! Wraps every JPEG/PNG `<img>` in the output root's HTML with a WebP
//! `<source>`:
//!
//! ```html
//! <picture><source srcset="img/a.webp" type="image/webp"><img src="img/a.jpg"></picture>
//! ```
//!
//! Only images whose WebP derivative exists in the output tree are wrapped,
//! and an `<img>` already inside a `<picture>` is left alone, so the pass can
//! run any number of times.

use super::MarkupError;
use crate::artifact::{list_files, write_if_changed};
use crate::config::Project;
use crate::task::{TaskKind, TaskReport};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("valid regex"));
static SRC_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});
static PICTURE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<picture\b").expect("valid regex"));
static PICTURE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</picture\s*>").expect("valid regex"));

/// `src` with its JPEG/PNG extension swapped for `.webp`, or `None` when the
/// reference is not a local raster image.
pub fn webp_src(src: &str) -> Option<String> {
    let lower = src.to_ascii_lowercase();
    if lower.contains("://") || lower.starts_with("//") || lower.starts_with("data:") {
        return None;
    }
    if src.contains(['?', '#']) {
        return None;
    }
    let dot = src.rfind('.')?;
    match &lower[dot + 1..] {
        "jpg" | "jpeg" | "png" => Some(format!("{}.webp", &src[..dot])),
        _ => None,
    }
}

/// Where a page-relative or root-relative `src` lives in the output tree.
fn resolve(src: &str, page_dir: &Path, output_root: &Path) -> PathBuf {
    match src.strip_prefix('/') {
        Some(rooted) => output_root.join(rooted),
        None => page_dir.join(src),
    }
}

/// Byte offsets covered by `<picture>...</picture>` elements.
fn picture_spans(html: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(open) = PICTURE_OPEN.find_at(html, from) {
        let end = PICTURE_CLOSE
            .find_at(html, open.end())
            .map_or(html.len(), |m| m.end());
        spans.push((open.start(), end));
        from = end;
    }
    spans
}

/// Rewrite one page. `exists` decides whether a WebP reference would
/// resolve; returns the new text and the number of images wrapped.
pub fn wrap_images(html: &str, exists: impl Fn(&str) -> bool) -> (String, usize) {
    let pictures = picture_spans(html);
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    let mut wrapped = 0;

    for tag in IMG_TAG.find_iter(html) {
        let inside_picture = pictures
            .iter()
            .any(|&(start, end)| tag.start() >= start && tag.start() < end);
        if inside_picture {
            continue;
        }
        let Some(src) = SRC_ATTR
            .captures(tag.as_str())
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str())
        else {
            continue;
        };
        let Some(webp) = webp_src(src) else {
            continue;
        };
        if !exists(&webp) {
            continue;
        }
        out.push_str(&html[cursor..tag.start()]);
        out.push_str(&format!(
            r#"<picture><source srcset="{webp}" type="image/webp">{}</picture>"#,
            tag.as_str()
        ));
        cursor = tag.end();
        wrapped += 1;
    }
    out.push_str(&html[cursor..]);
    (out, wrapped)
}

/// Add WebP sources to every page in the output root.
pub fn rewrite_pages(project: &Project) -> Result<TaskReport, MarkupError> {
    let output = &project.layout.output;
    let mut report = TaskReport::new(TaskKind::WebpHtml);
    let mut total = 0;

    for page in list_files(output, &["html"])? {
        let html = fs::read_to_string(&page)?;
        let page_dir = page.parent().unwrap_or(output);
        let (rewritten, wrapped) =
            wrap_images(&html, |webp| resolve(webp, page_dir, output).is_file());
        total += wrapped;
        if write_if_changed(&page, rewritten.as_bytes())? {
            report.written.push(page);
        } else {
            report.unchanged.push(page);
        }
    }
    report.summary = Some(format!("{total} images wrapped"));
    Ok(report)
}
