//! Purge pass over built CSS.
//!
//! Runs after a full build and reads build output only:
//!
//! 1. Collect every token (`[A-Za-z0-9_-]+`) from the built HTML and JS. This
//!    is deliberately generous: a class name built from a string in a script
//!    still counts as used.
//! 2. Collect the class and id symbols each stylesheet's selectors declare.
//! 3. Hand the declared-but-never-seen symbols to `lightningcss` as
//!    `unused_symbols`; it drops the selectors that reference them, and rules
//!    left with no selector.
//!
//! The sheet is parsed with error recovery. Every recovered error becomes a
//! lint warning and the invalid rule or declaration is dropped from the output,
//! which is the auto-fix.

use super::{StyleError, browser_targets};
use crate::artifact::{list_files, walk_files, write_if_changed};
use crate::config::Project;
use crate::task::{TaskKind, TaskReport};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::Targets;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::sync::{Arc, RwLock};

/// Add every extractor token in `text` to `tokens`.
pub fn collect_tokens(text: &str, tokens: &mut HashSet<String>) {
    for token in text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-')) {
        if !token.is_empty() {
            tokens.insert(token.to_string());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Block {
    /// Contains rules: top level, `@media`, `@supports`, ...
    Rules,
    /// Contains declarations (and possibly nested rules).
    Declarations,
    /// Anything else: `@keyframes`, `@font-face`, `@page`.
    Other,
}

const GROUPING_AT_RULES: &[&str] = &[
    "media",
    "supports",
    "layer",
    "container",
    "document",
    "scope",
    "starting-style",
];

fn classify(prelude: &str, parent: Block) -> (Block, bool) {
    if let Some(rest) = prelude.strip_prefix('@') {
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect::<String>()
            .to_ascii_lowercase();
        let kind = if GROUPING_AT_RULES.contains(&name.as_str()) {
            Block::Rules
        } else {
            Block::Other
        };
        return (kind, false);
    }
    match parent {
        Block::Rules | Block::Declarations => (Block::Declarations, true),
        Block::Other => (Block::Other, false),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Class and id names referenced by one selector list.
fn selector_symbols(selector: &str, out: &mut BTreeSet<String>) {
    let mut chars = selector.chars().peekable();
    let mut bracket_depth = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            '.' | '#' if bracket_depth == 0 => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '\\' {
                        chars.next();
                        if let Some(escaped) = chars.next() {
                            name.push(escaped);
                        }
                    } else if is_ident_char(next) {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let starts_like_ident = name
                    .chars()
                    .next()
                    .is_some_and(|first| !first.is_ascii_digit());
                if starts_like_ident {
                    out.insert(name);
                }
            }
            _ => {}
        }
    }
}

/// Every class and id name declared in the selectors of `css`.
pub fn declared_symbols(css: &str) -> BTreeSet<String> {
    let mut symbols = BTreeSet::new();
    let mut stack = vec![Block::Rules];
    let mut prelude = String::new();
    let mut chars = css.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == quote {
                        break;
                    }
                }
                prelude.push(' ');
            }
            '{' => {
                let parent = stack.last().copied().unwrap_or(Block::Rules);
                let (kind, is_selector) = classify(prelude.trim(), parent);
                if is_selector {
                    selector_symbols(&prelude, &mut symbols);
                }
                stack.push(kind);
                prelude.clear();
            }
            '}' => {
                if stack.len() > 1 {
                    stack.pop();
                }
                prelude.clear();
            }
            ';' => prelude.clear(),
            _ => prelude.push(c),
        }
    }
    symbols
}

/// Result of purging one stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub css: String,
    /// Symbols removed because nothing in the content referenced them.
    pub removed: Vec<String>,
    /// Lint warnings for rules that were invalid and dropped.
    pub warnings: Vec<String>,
}

/// Purge, lint-fix, and minify a stylesheet against the `used` token set.
pub fn purge_stylesheet(
    css: &str,
    filename: &str,
    used: &HashSet<String>,
    targets: &Targets,
) -> Result<PurgeOutcome, String> {
    let removed: Vec<String> = declared_symbols(css)
        .into_iter()
        .filter(|s| !used.contains(s))
        .collect();

    let warnings = Arc::new(RwLock::new(Vec::new()));
    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            error_recovery: true,
            warnings: Some(warnings.clone()),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;

    sheet
        .minify(MinifyOptions {
            targets: targets.clone(),
            unused_symbols: removed.iter().cloned().collect(),
        })
        .map_err(|e| e.to_string())?;
    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            targets: targets.clone(),
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let lint = match warnings.read() {
        Ok(list) => list
            .iter()
            .map(|w| match &w.loc {
                Some(loc) => format!("{}:{}:{}: {}", filename, loc.line + 1, loc.column, w.kind),
                None => format!("{}: {}", filename, w.kind),
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    Ok(PurgeOutcome {
        css: printed.code,
        removed,
        warnings: lint,
    })
}

/// Purge every stylesheet in `<output>/css` in place.
pub fn purge_css(project: &Project) -> Result<TaskReport, StyleError> {
    let layout = &project.layout;
    let targets = browser_targets(&project.config.styles.browsers)?;
    let mut report = TaskReport::new(TaskKind::PurgeCss);

    let mut used = HashSet::new();
    for path in walk_files(&layout.output, &["html", "js"])? {
        collect_tokens(&fs::read_to_string(&path)?, &mut used);
    }

    let mut removed_total = 0usize;
    for path in list_files(&layout.output_css(), &["css"])? {
        let css = fs::read_to_string(&path)?;
        let name = path.display().to_string();
        match purge_stylesheet(&css, &name, &used, &targets) {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    tracing::warn!("lint: {warning}");
                }
                tracing::debug!(path = %name, removed = ?outcome.removed, "purged");
                removed_total += outcome.removed.len();
                if write_if_changed(&path, outcome.css.as_bytes())? {
                    report.written.push(path);
                } else {
                    report.unchanged.push(path);
                }
            }
            Err(message) => report.fail(path, message),
        }
    }
    report.summary = Some(format!("{removed_total} unused symbols removed"));
    Ok(report)
}
