//! Style tasks: Sass compilation, library bundling, and the purge pass.
//!
//! | Task | Input | Output |
//! |---|---|---|
//! | [`compile_sass`] | `<scss>/*.scss` (partials skipped) | `<output>/css/<stem>.css` |
//! | [`concat_css`] | `<css>/*.css` minus `styles.exclude` | `<output>/css/<bundle_name>` |
//! | [`purge::purge_css`] | `<output>/css/*.css` + built HTML/JS | same files, in place |
//!
//! Sass goes through `grass`; prefixing and minification through
//! `lightningcss` with targets from the `styles.browsers` browserslist
//! queries. Both are deterministic, so reruns over unchanged sources produce
//! byte-identical CSS and [`write_if_changed`] skips the write.

pub mod purge;

use crate::artifact::{list_files, write_if_changed};
use crate::config::Project;
use crate::task::{TaskKind, TaskReport};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid browser targets: {0}")]
    Targets(String),
}

/// Resolve browserslist queries into `lightningcss` targets.
pub fn browser_targets(queries: &[String]) -> Result<Targets, StyleError> {
    let browsers =
        Browsers::from_browserslist(queries).map_err(|e| StyleError::Targets(e.to_string()))?;
    Ok(Targets {
        browsers,
        ..Targets::default()
    })
}

/// Parse, prefix for `targets`, and print minified.
pub fn prefix_and_minify(code: &str, filename: &str, targets: &Targets) -> Result<String, String> {
    let mut sheet = StyleSheet::parse(
        code,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;
    sheet
        .minify(MinifyOptions {
            targets: targets.clone(),
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;
    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            targets: targets.clone(),
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;
    Ok(printed.code)
}

/// Sass partials (`_name.scss`) are only ever imported, never compiled alone.
fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

fn compile_entry(path: &Path, include_path: &Path, targets: &Targets) -> Result<String, String> {
    let options = grass::Options::default()
        .style(grass::OutputStyle::Compressed)
        .load_path(include_path);
    let css = grass::from_path(path, &options).map_err(|e| e.to_string())?;
    prefix_and_minify(&css, &path.display().to_string(), targets)
}

/// Compile every Sass entry file directly under the scss root.
///
/// A syntax error is recorded against its file and that file's output is
/// left untouched; the remaining entries still compile.
pub fn compile_sass(project: &Project) -> Result<TaskReport, StyleError> {
    let layout = &project.layout;
    let targets = browser_targets(&project.config.styles.browsers)?;
    let mut report = TaskReport::new(TaskKind::Styles);

    let out_dir = layout.output_css();
    for entry in list_files(&layout.scss, &["scss"])? {
        if is_partial(&entry) {
            continue;
        }
        let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match compile_entry(&entry, &layout.scss, &targets) {
            Ok(css) => {
                let out = out_dir.join(format!("{stem}.css"));
                if write_if_changed(&out, css.as_bytes())? {
                    report.written.push(out);
                } else {
                    report.unchanged.push(out);
                }
            }
            Err(message) => report.fail(entry, message),
        }
    }
    Ok(report)
}

static IMPORT_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*@import\s[^;]+;[ \t]*\r?\n?"#).expect("valid regex")
});
static CHARSET_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*@charset\s[^;]+;[ \t]*\r?\n?"#).expect("valid regex")
});

/// Concatenate stylesheets in order, hoisting `@import` rules to the top
/// (they are only valid before any other rule) and dropping `@charset`.
pub fn concatenate(sources: &[String]) -> String {
    let mut imports = Vec::new();
    let mut bodies = Vec::new();
    for source in sources {
        for m in IMPORT_RULE.find_iter(source) {
            imports.push(m.as_str().trim().to_string());
        }
        let body = IMPORT_RULE.replace_all(source, "");
        let body = CHARSET_RULE.replace_all(&body, "");
        bodies.push(body.trim().to_string());
    }
    let mut out = String::new();
    for import in imports {
        out.push_str(&import);
        out.push('\n');
    }
    out.push_str(&bodies.join("\n"));
    out
}

/// Bundle the css-root libraries into one prefixed, minified file.
///
/// The exclusion list is explicit: `styles.exclude` names files handled
/// elsewhere and their content never reaches the bundle.
pub fn concat_css(project: &Project) -> Result<TaskReport, StyleError> {
    let layout = &project.layout;
    let styles = &project.config.styles;
    let targets = browser_targets(&styles.browsers)?;
    let mut report = TaskReport::new(TaskKind::CssBundle);

    let mut sources = Vec::new();
    for path in list_files(&layout.css, &["css"])? {
        let excluded = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| styles.exclude.iter().any(|x| x == n));
        if excluded {
            tracing::debug!(path = %path.display(), "excluded from bundle");
            continue;
        }
        sources.push(fs::read_to_string(&path)?);
    }

    let out = layout.output_css().join(&styles.bundle_name);
    let bundle = concatenate(&sources);
    match prefix_and_minify(&bundle, &styles.bundle_name, &targets) {
        Ok(css) => {
            if write_if_changed(&out, css.as_bytes())? {
                report.written.push(out);
            } else {
                report.unchanged.push(out);
            }
        }
        Err(message) => report.fail(out, message),
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ProjectFixture;

    fn default_targets() -> Targets {
        browser_targets(&crate::config::StylesConfig::default().browsers).unwrap()
    }

    #[test]
    fn prefix_and_minify_minifies() {
        let css = prefix_and_minify(".a {\n  color: red;\n}\n", "a.css", &default_targets())
            .unwrap();
        assert_eq!(css, ".a{color:red}");
    }

    #[test]
    fn prefix_and_minify_adds_prefixes_for_old_targets() {
        let targets = browser_targets(&["safari 6".to_string()]).unwrap();
        let css = prefix_and_minify(".a{display:flex}", "a.css", &targets).unwrap();
        assert!(css.contains("-webkit-"), "expected a webkit prefix in {css}");
        assert!(css.contains("display:flex"));
    }

    #[test]
    fn prefix_and_minify_reports_syntax_errors() {
        assert!(prefix_and_minify("..a{color:red}", "a.css", &default_targets()).is_err());
    }

    #[test]
    fn concatenate_hoists_imports_and_drops_charset() {
        let out = concatenate(&[
            ".a{color:red}".to_string(),
            "@charset \"utf-8\";\n@import url(\"x.css\");\n.b{color:blue}".to_string(),
        ]);
        assert!(out.starts_with("@import url(\"x.css\");"));
        assert!(!out.contains("@charset"));
        assert!(out.find(".a{").unwrap() < out.find(".b{").unwrap());
    }

    #[test]
    fn compile_sass_writes_one_file_per_entry_and_skips_partials() {
        let fixture = ProjectFixture::new();
        fixture.write("src/scss/_vars.scss", "$accent: red;");
        fixture.write(
            "src/scss/style.scss",
            "@import 'vars';\n.a { .b { color: $accent; } }\n",
        );
        fixture.write("src/scss/print.scss", "body { margin: 0; }");

        let report = compile_sass(&fixture.project()).unwrap();
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.written.len(), 2);
        assert!(fixture.read("build/css/style.css").contains(".a .b{color:red}"));
        assert!(fixture.exists("build/css/print.css"));
        assert!(!fixture.exists("build/css/_vars.css"));
    }

    #[test]
    fn compile_sass_is_idempotent() {
        let fixture = ProjectFixture::new();
        fixture.write(
            "src/scss/style.scss",
            ".grid { display: grid; grid-template-columns: 1fr 1fr; .cell { user-select: none; } }",
        );
        let project = fixture.project();

        compile_sass(&project).unwrap();
        let first = fixture.read("build/css/style.css");
        let second_report = compile_sass(&project).unwrap();
        let second = fixture.read("build/css/style.css");

        assert_eq!(first, second);
        assert!(second_report.written.is_empty());
        assert_eq!(second_report.unchanged.len(), 1);
    }

    #[test]
    fn compile_sass_syntax_error_is_scoped_to_the_file() {
        let fixture = ProjectFixture::new();
        fixture.write("src/scss/broken.scss", ".a { color: ; ");
        fixture.write("src/scss/fine.scss", ".ok { color: blue; }");

        let report = compile_sass(&fixture.project()).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("broken.scss"));
        assert!(fixture.exists("build/css/fine.css"));
        assert!(!fixture.exists("build/css/broken.css"));
    }

    #[test]
    fn concat_css_never_includes_the_excluded_stylesheet() {
        let fixture = ProjectFixture::new();
        fixture.write("src/css/style.css", ".primary-only{color:green}");
        fixture.write("src/css/normalize.css", "html { line-height: 1.15; }");
        fixture.write("src/css/slider.css", ".slider { opacity: 1; }");

        let report = concat_css(&fixture.project()).unwrap();
        assert!(report.is_success());
        let bundle = fixture.read("build/css/bundle.css");
        assert!(!bundle.contains("primary-only"));
        assert!(bundle.contains("line-height:1.15"));
        assert!(bundle.contains(".slider"));
        // directory-listing order: normalize before slider
        assert!(bundle.find("html").unwrap() < bundle.find(".slider").unwrap());
    }

    #[test]
    fn concat_css_with_only_excluded_files_writes_empty_bundle() {
        let fixture = ProjectFixture::new();
        fixture.write("src/css/style.css", ".primary-only{color:green}");

        concat_css(&fixture.project()).unwrap();
        assert_eq!(fixture.read("build/css/bundle.css"), "");
    }

    #[test]
    fn concat_css_respects_custom_exclusions() {
        let fixture = ProjectFixture::new();
        fixture.write("src/css/a.css", ".a{color:red}");
        fixture.write("src/css/b.css", ".b{color:blue}");
        let project = fixture.project_with(|c| {
            c.styles.exclude = vec!["a.css".to_string()];
            c.styles.bundle_name = "libs.css".to_string();
        });

        concat_css(&project).unwrap();
        let bundle = fixture.read("build/css/libs.css");
        assert!(!bundle.contains(".a"));
        assert!(bundle.contains(".b"));
    }
}
