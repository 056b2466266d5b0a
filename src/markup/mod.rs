//! Page assembly: include expansion and beautification.
//!
//! Every `*.html` directly under the pages root is a page. A page may pull in
//! partials with an include directive:
//!
//! ```text
//! @@include('partials/header.html')
//! @@include('partials/card.html', {"title": "Hello", "count": 3})
//! ```
//!
//! Paths are relative to the file containing the directive. The optional JSON
//! object defines variables: inside the included text every `@@title` becomes
//! `Hello`. Variables are inherited by nested includes, which may override
//! them. Expansion is purely textual; there are no conditionals or loops.
//!
//! The expanded page is re-indented by [`beautify`] and written flat into the
//! output root. A page whose includes cannot be resolved fails alone; the
//! other pages are still written.

pub mod beautify;
pub mod webp;

use crate::artifact::{list_files, write_if_changed};
use crate::config::Project;
use crate::task::{TaskKind, TaskReport};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Includes nested deeper than this are treated as runaway recursion.
pub const MAX_INCLUDE_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum MarkupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{file}: cannot include '{target}': {source}")]
    MissingInclude {
        file: PathBuf,
        target: String,
        source: std::io::Error,
    },
    #[error("{file}: malformed include directive at byte {offset}: {message}")]
    Syntax {
        file: PathBuf,
        offset: usize,
        message: String,
    },
    #[error("include cycle: {}", display_chain(.chain))]
    Cycle { chain: Vec<PathBuf> },
    #[error("{file}: includes nested deeper than {}", MAX_INCLUDE_DEPTH)]
    TooDeep { file: PathBuf },
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One parsed include directive.
#[derive(Debug, Clone, PartialEq)]
struct Directive {
    /// Byte range of the whole directive in the source text.
    start: usize,
    end: usize,
    target: String,
    vars: Map<String, Value>,
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Index just past the JSON object starting at `start` (which is `{`).
fn json_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the directive whose keyword begins at `start`.
fn parse_directive(
    text: &str,
    start: usize,
    keyword_len: usize,
    file: &Path,
) -> Result<Directive, MarkupError> {
    let bytes = text.as_bytes();
    let syntax = |offset: usize, message: &str| MarkupError::Syntax {
        file: file.to_path_buf(),
        offset,
        message: message.to_string(),
    };

    let mut i = skip_ws(bytes, start + keyword_len);
    if bytes.get(i) != Some(&b'(') {
        return Err(syntax(i, "expected '('"));
    }
    i = skip_ws(bytes, i + 1);
    let quote = match bytes.get(i) {
        Some(&q @ (b'\'' | b'"')) => q,
        _ => return Err(syntax(i, "expected a quoted path")),
    };
    let path_start = i + 1;
    let path_len = bytes[path_start..]
        .iter()
        .position(|&b| b == quote)
        .ok_or_else(|| syntax(i, "unterminated path"))?;
    let target = text[path_start..path_start + path_len].to_string();
    i = skip_ws(bytes, path_start + path_len + 1);

    let mut vars = Map::new();
    if bytes.get(i) == Some(&b',') {
        i = skip_ws(bytes, i + 1);
        if bytes.get(i) != Some(&b'{') {
            return Err(syntax(i, "expected a JSON object"));
        }
        let end = json_object_end(bytes, i).ok_or_else(|| syntax(i, "unterminated JSON object"))?;
        vars = serde_json::from_str(&text[i..end]).map_err(|e| syntax(i, &e.to_string()))?;
        i = skip_ws(bytes, end);
    }
    if bytes.get(i) != Some(&b')') {
        return Err(syntax(i, "expected ')'"));
    }
    Ok(Directive {
        start,
        end: i + 1,
        target,
        vars,
    })
}

/// Whether `rest` (the text right after a prefix) opens an include directive.
fn opens_directive(rest: &str) -> bool {
    rest.strip_prefix("include")
        .is_some_and(|after| after.trim_start().starts_with('('))
}

/// Replace `<prefix><key>` with each variable's value in one left-to-right
/// pass. The longest key wins, so `@@titleLong` is not clobbered by
/// `@@title`. Nested include directives are left intact whatever the
/// variable names, and substituted values are not rescanned.
fn substitute(text: &str, prefix: &str, vars: &Map<String, Value>) -> String {
    if vars.is_empty() {
        return text.to_string();
    }
    let mut keys: Vec<&String> = vars.keys().filter(|k| !k.is_empty()).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(prefix) {
        let at = cursor + found;
        let rest = &text[at + prefix.len()..];
        out.push_str(&text[cursor..at]);
        cursor = at + prefix.len();
        if opens_directive(rest) {
            out.push_str(prefix);
            continue;
        }
        match keys.iter().find(|k| rest.starts_with(k.as_str())) {
            Some(key) => {
                match &vars[key.as_str()] {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
                cursor += key.len();
            }
            None => out.push_str(prefix),
        }
    }
    out.push_str(&text[cursor..]);
    out
}

/// Expands include directives with a fixed prefix.
pub struct Includer<'a> {
    prefix: &'a str,
}

impl<'a> Includer<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    /// Expand `text`, which was read from `file`.
    pub fn expand(&self, text: &str, file: &Path) -> Result<String, MarkupError> {
        let mut stack = vec![file.to_path_buf()];
        self.expand_inner(text, file, &Map::new(), &mut stack)
    }

    fn expand_inner(
        &self,
        text: &str,
        file: &Path,
        vars: &Map<String, Value>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<String, MarkupError> {
        let keyword = format!("{}include", self.prefix);
        let base = file.parent().unwrap_or(Path::new("."));
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        while let Some(found) = text[cursor..].find(&keyword) {
            let start = cursor + found;
            let directive = parse_directive(text, start, keyword.len(), file)?;
            out.push_str(&text[cursor..directive.start]);

            let target = base.join(&directive.target);
            let included =
                fs::read_to_string(&target).map_err(|source| MarkupError::MissingInclude {
                    file: file.to_path_buf(),
                    target: directive.target.clone(),
                    source,
                })?;
            let canonical = fs::canonicalize(&target).unwrap_or_else(|_| target.clone());
            if stack.contains(&canonical) {
                let mut chain = stack.clone();
                chain.push(canonical);
                return Err(MarkupError::Cycle { chain });
            }
            if stack.len() > MAX_INCLUDE_DEPTH {
                return Err(MarkupError::TooDeep {
                    file: file.to_path_buf(),
                });
            }

            let mut scope = vars.clone();
            scope.extend(directive.vars);
            let substituted = substitute(&included, self.prefix, &scope);

            stack.push(canonical);
            let expanded = self.expand_inner(&substituted, &target, &scope, stack)?;
            stack.pop();

            out.push_str(expanded.trim_end_matches(['\r', '\n']));
            cursor = directive.end;
        }
        out.push_str(&text[cursor..]);
        Ok(out)
    }
}

/// Expand and beautify one page.
pub fn render_page(path: &Path, project: &Project) -> Result<String, MarkupError> {
    let markup = &project.config.markup;
    let source = fs::read_to_string(path)?;
    let canonical = fs::canonicalize(path)?;
    let expanded = Includer::new(&markup.include_prefix).expand(&source, &canonical)?;
    let indent = if markup.indent_with_tabs {
        "\t".to_string()
    } else {
        " ".repeat(markup.indent_size)
    };
    Ok(beautify::beautify(&expanded, &indent))
}

/// Assemble every page under the pages root into the output root.
pub fn assemble_pages(project: &Project) -> Result<TaskReport, MarkupError> {
    let layout = &project.layout;
    let mut report = TaskReport::new(TaskKind::Pages);

    for page in list_files(&layout.pages, &["html"])? {
        let Some(name) = page.file_name() else {
            continue;
        };
        match render_page(&page, project) {
            Ok(html) => {
                let out = layout.output.join(name);
                if write_if_changed(&out, html.as_bytes())? {
                    report.written.push(out);
                } else {
                    report.unchanged.push(out);
                }
            }
            Err(e) => report.fail(page, e.to_string()),
        }
    }
    Ok(report)
}
