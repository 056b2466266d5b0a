//! Task model and composition.
//!
//! A task is a named, idempotent function from part of the source tree to
//! part of the output tree. Tasks never talk to each other; the only shared
//! state is the file system.
//!
//! Failures come in two levels:
//!
//! - **Per-file** ([`FileFailure`]): one stylesheet has a syntax error, one page
//!   includes a missing partial. Recorded in the [`TaskReport`], the rest of the
//!   task's inputs are still processed.
//! - **Fatal** ([`TaskError`]): the task cannot proceed at all (unreadable font
//!   directory, broken bundle). Returned as `Err`.
//!
//! Neither level is retried. Under the watcher, the next matching change is
//! the retry.

use crate::config::Project;
use crate::fonts::FontError;
use crate::images::ImageError;
use crate::markup::MarkupError;
use crate::script::ScriptError;
use crate::styles::StyleError;
use crate::{fonts, images, markup, script, styles};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Style(#[from] StyleError),
    #[error(transparent)]
    Markup(#[from] MarkupError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Font(#[from] FontError),
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Every task the pipeline knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Sass entry files → `<output>/css/*.css`.
    Styles,
    /// css/*.css libraries (minus exclusions) → one minified bundle.
    CssBundle,
    /// Remove unreferenced selectors from built CSS. Manual.
    PurgeCss,
    /// Page templates with includes → beautified HTML in the output root.
    Pages,
    /// Wrap built `<img>` tags in `<picture>` with WebP sources. Manual.
    WebpHtml,
    /// Script entry module → single bundle.
    Scripts,
    /// `.ttf` → `.woff` + `.woff2`.
    FontFiles,
    /// Font files → `@include font-face(...)` lines in the scss tree.
    FontStyles,
    /// Raster images → `.webp` derivatives.
    Webp,
    /// Images → compressed copies, cached.
    Images,
}

impl TaskKind {
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Styles => "styles",
            TaskKind::CssBundle => "css-bundle",
            TaskKind::PurgeCss => "purge-css",
            TaskKind::Pages => "pages",
            TaskKind::WebpHtml => "webp-html",
            TaskKind::Scripts => "scripts",
            TaskKind::FontFiles => "font-files",
            TaskKind::FontStyles => "font-styles",
            TaskKind::Webp => "webp",
            TaskKind::Images => "images",
        }
    }

    /// Run the task once and time it.
    pub fn run(self, project: &Project) -> Result<TaskReport, TaskError> {
        let started = Instant::now();
        tracing::debug!(task = self.name(), "starting");
        let mut report = match self {
            TaskKind::Styles => styles::compile_sass(project)?,
            TaskKind::CssBundle => styles::concat_css(project)?,
            TaskKind::PurgeCss => styles::purge::purge_css(project)?,
            TaskKind::Pages => markup::assemble_pages(project)?,
            TaskKind::WebpHtml => markup::webp::rewrite_pages(project)?,
            TaskKind::Scripts => script::build_bundle(project)?,
            TaskKind::FontFiles => fonts::convert_fonts(project)?,
            TaskKind::FontStyles => fonts::generate_font_styles(project)?,
            TaskKind::Webp => images::convert_to_webp(project)?,
            TaskKind::Images => images::compress_images(project)?,
        };
        report.elapsed = started.elapsed();
        for failure in &report.failures {
            tracing::warn!(task = self.name(), path = %failure.path.display(), "{}", failure.message);
        }
        tracing::info!(
            task = self.name(),
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "finished"
        );
        Ok(report)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One input that could not be transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// What one task run did.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: TaskKind,
    /// Artifacts written (or source files written, for font styles).
    pub written: Vec<PathBuf>,
    /// Inputs skipped because their output is already current.
    pub unchanged: Vec<PathBuf>,
    /// Per-file transformation errors.
    pub failures: Vec<FileFailure>,
    /// Extra one-line summary, e.g. cache statistics.
    pub summary: Option<String>,
    pub elapsed: Duration,
}

impl TaskReport {
    pub fn new(task: TaskKind) -> Self {
        Self {
            task,
            written: Vec::new(),
            unchanged: Vec::new(),
            failures: Vec::new(),
            summary: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn fail(&mut self, path: impl Into<PathBuf>, message: impl Into<String>) {
        self.failures.push(FileFailure {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run tasks one after another, stopping at the first fatal error.
///
/// Per-file failures do not stop the series: `series(FontFiles, FontStyles)`
/// still generates declarations when one font failed to convert.
pub fn run_series(tasks: &[TaskKind], project: &Project) -> Result<Vec<TaskReport>, TaskError> {
    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        reports.push(task.run(project)?);
    }
    Ok(reports)
}

/// Run tasks concurrently, one thread each, and wait for all of them.
///
/// Results are returned in the order of `tasks`.
pub fn run_parallel(
    tasks: &[TaskKind],
    project: &Project,
) -> Vec<(TaskKind, Result<TaskReport, TaskError>)> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|&task| (task, scope.spawn(move || task.run(project))))
            .collect();
        handles
            .into_iter()
            .map(|(task, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(TaskError::Io(std::io::Error::other(format!(
                        "task {task} panicked"
                    ))))
                });
                (task, result)
            })
            .collect()
    })
}

/// Tasks the default entry point starts alongside the server and watcher.
pub const DEFAULT_BATCH: &[TaskKind] = &[
    TaskKind::CssBundle,
    TaskKind::Images,
    TaskKind::Scripts,
    TaskKind::Pages,
    TaskKind::Styles,
];

/// First stage of a one-shot build: tasks whose outputs feed later tasks
/// (font declarations feed Sass, WebP derivatives feed compression).
pub const BUILD_PREPARE: &[TaskKind] = &[TaskKind::FontFiles, TaskKind::FontStyles, TaskKind::Webp];

/// Second stage of a one-shot build.
pub const BUILD_MAIN: &[TaskKind] = &[
    TaskKind::Styles,
    TaskKind::CssBundle,
    TaskKind::Pages,
    TaskKind::Scripts,
    TaskKind::Images,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ProjectFixture;

    #[test]
    fn task_names_are_unique() {
        let all = [
            TaskKind::Styles,
            TaskKind::CssBundle,
            TaskKind::PurgeCss,
            TaskKind::Pages,
            TaskKind::WebpHtml,
            TaskKind::Scripts,
            TaskKind::FontFiles,
            TaskKind::FontStyles,
            TaskKind::Webp,
            TaskKind::Images,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn default_batch_excludes_manual_tasks() {
        assert!(!DEFAULT_BATCH.contains(&TaskKind::PurgeCss));
        assert!(!DEFAULT_BATCH.contains(&TaskKind::WebpHtml));
    }

    #[test]
    fn report_records_failures() {
        let mut report = TaskReport::new(TaskKind::Pages);
        assert!(report.is_success());
        report.fail("index.html", "missing include");
        assert!(!report.is_success());
        assert_eq!(report.failures[0].message, "missing include");
    }

    #[test]
    fn run_parallel_returns_results_in_task_order() {
        let fixture = ProjectFixture::new();
        fixture.write("src/css/a.css", ".a{color:red}");
        fixture.write("src/pages/index.html", "<p>hi</p>");
        let project = fixture.project();

        let results = run_parallel(&[TaskKind::Pages, TaskKind::CssBundle], &project);
        assert_eq!(results[0].0, TaskKind::Pages);
        assert_eq!(results[1].0, TaskKind::CssBundle);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(fixture.exists("build/index.html"));
        assert!(fixture.exists("build/css/bundle.css"));
    }

    #[test]
    fn run_series_keeps_order() {
        let fixture = ProjectFixture::new();
        fixture.write("src/pages/index.html", "<p>hi</p>");
        let project = fixture.project();

        let reports = run_series(&[TaskKind::Pages, TaskKind::WebpHtml], &project).unwrap();
        let order: Vec<_> = reports.iter().map(|r| r.task).collect();
        assert_eq!(order, vec![TaskKind::Pages, TaskKind::WebpHtml]);
    }
}
