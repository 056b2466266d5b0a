//! CLI output formatting for task runs.
//!
//! Logs (`tracing`) go to stderr and carry the detail; this module prints
//! the short human summary to stdout.
//!
//! # Output Format
//!
//! ## One task
//!
//! ```text
//! styles: 2 written, 1 unchanged (41 ms)
//!     main.css
//!     print.css
//!     failed: broken.scss: expected "}".
//! ```
//!
//! ## Build
//!
//! ```text
//! Built 9 tasks: 31 written, 12 unchanged, 1 failed
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::task::{TaskError, TaskKind, TaskReport};
use std::path::Path;

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn counts(written: usize, unchanged: usize, failed: usize) -> String {
    let mut parts = vec![
        format!("{written} written"),
        format!("{unchanged} unchanged"),
    ];
    if failed > 0 {
        parts.push(format!("{failed} failed"));
    }
    parts.join(", ")
}

pub fn format_task_report(report: &TaskReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} ({} ms)",
        report.task,
        counts(
            report.written.len(),
            report.unchanged.len(),
            report.failures.len()
        ),
        report.elapsed.as_millis()
    )];
    for path in &report.written {
        lines.push(format!("{}{}", indent(1), file_label(path)));
    }
    for failure in &report.failures {
        lines.push(format!(
            "{}failed: {}: {}",
            indent(1),
            file_label(&failure.path),
            failure.message
        ));
    }
    if let Some(summary) = &report.summary {
        lines.push(format!("{}{}", indent(1), summary));
    }
    lines
}

pub fn print_task_report(report: &TaskReport) {
    for line in format_task_report(report) {
        println!("{}", line);
    }
}

/// Totals over a batch of task results; fatal errors count as failures.
pub fn format_build_summary(results: &[(TaskKind, Result<TaskReport, TaskError>)]) -> Vec<String> {
    let mut lines = Vec::new();
    let (mut written, mut unchanged, mut failed) = (0, 0, 0);
    for (task, result) in results {
        match result {
            Ok(report) => {
                written += report.written.len();
                unchanged += report.unchanged.len();
                failed += report.failures.len();
            }
            Err(e) => {
                failed += 1;
                lines.push(format!("{task} failed: {e}"));
            }
        }
    }
    let noun = if results.len() == 1 { "task" } else { "tasks" };
    lines.push(format!(
        "Built {} {}: {}",
        results.len(),
        noun,
        counts(written, unchanged, failed)
    ));
    lines
}

pub fn print_build_summary(results: &[(TaskKind, Result<TaskReport, TaskError>)]) {
    for line in format_build_summary(results) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn report() -> TaskReport {
        let mut report = TaskReport::new(TaskKind::Styles);
        report.written = vec![
            PathBuf::from("/p/build/css/main.css"),
            PathBuf::from("/p/build/css/print.css"),
        ];
        report.unchanged = vec![PathBuf::from("/p/build/css/old.css")];
        report.elapsed = Duration::from_millis(41);
        report
    }

    #[test]
    fn task_report_lists_written_files() {
        assert_eq!(
            format_task_report(&report()),
            vec![
                "styles: 2 written, 1 unchanged (41 ms)",
                "    main.css",
                "    print.css",
            ]
        );
    }

    #[test]
    fn task_report_shows_failures_and_summary() {
        let mut r = report();
        r.written.clear();
        r.fail("/p/src/scss/broken.scss", "expected \"}\".");
        r.summary = Some("3 cached".to_string());
        assert_eq!(
            format_task_report(&r),
            vec![
                "styles: 0 written, 1 unchanged, 1 failed (41 ms)",
                "    failed: broken.scss: expected \"}\".",
                "    3 cached",
            ]
        );
    }

    #[test]
    fn build_summary_totals_and_fatal_errors() {
        let fatal = TaskError::Io(std::io::Error::other("disk full"));
        let results = vec![
            (TaskKind::Styles, Ok(report())),
            (TaskKind::FontStyles, Err(fatal)),
        ];
        assert_eq!(
            format_build_summary(&results),
            vec![
                "font-styles failed: IO error: disk full",
                "Built 2 tasks: 2 written, 1 unchanged, 1 failed",
            ]
        );
    }

    #[test]
    fn build_summary_singular() {
        let results = vec![(TaskKind::Pages, Ok(TaskReport::new(TaskKind::Pages)))];
        assert_eq!(
            format_build_summary(&results),
            vec!["Built 1 task: 0 written, 0 unchanged"]
        );
    }
}
