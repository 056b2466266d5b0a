//! `@include font-face(...)` declarations for the Sass tree.
//!
//! The font-face file is a source file, so it is only ever extended: the
//! current content is read, families already declared there are skipped, and
//! the missing lines are appended in one write. Running twice over the same
//! fonts directory changes nothing.

use super::weight::infer_weight;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

static DECLARED_FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@include\s+font-face\(\s*["']([^"']+)["']"#).expect("valid regex")
});

/// Font file extensions the listing considers.
pub const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "woff", "woff2", "eot"];

/// Family name of a font file: everything before the first `.`.
pub fn family_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Whether `family` can sit inside a quoted Sass string as is.
fn quotable(family: &str) -> bool {
    !family.contains(['"', '\'', '\\']) && !family.chars().any(char::is_control)
}

/// Distinct family names of `files`, in listing order. Names that cannot be
/// quoted are skipped with a warning.
pub fn families<'a>(files: impl IntoIterator<Item = &'a Path>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for file in files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let family = family_name(name);
        if !quotable(family) {
            tracing::warn!(file = %file.display(), "font name needs quoting, skipped");
            continue;
        }
        if !family.is_empty() && seen.insert(family.to_string()) {
            out.push(family.to_string());
        }
    }
    out
}

/// Families already declared in a font-face file.
pub fn declared_families(content: &str) -> HashSet<String> {
    DECLARED_FAMILY
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect()
}

pub fn declaration(family: &str, weight: u16) -> String {
    format!("@include font-face(\"{family}\", \"{family}\", {weight});\n")
}

/// New content for the font-face file, or `None` when every family is
/// already declared.
pub fn extend_declarations(
    existing: &str,
    families: &[String],
    default_weight: u16,
) -> Option<(String, Vec<String>)> {
    let declared = declared_families(existing);
    let added: Vec<String> = families
        .iter()
        .filter(|f| !declared.contains(*f))
        .cloned()
        .collect();
    if added.is_empty() {
        return None;
    }

    let mut content = existing.to_string();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for family in &added {
        content.push_str(&declaration(family, infer_weight(family, default_weight)));
    }
    Some((content, added))
}
