//! Script bundling.
//!
//! One entry module (`<js>/<scripts.entry>`) and everything it statically
//! imports becomes one file at `<output>/js/<scripts.output>`. The work is
//! done by a [`Bundler`]:
//!
//! - [`ModuleBundler`] (default) rewrites ES module syntax into a small
//!   CommonJS-style runtime. Development mode wraps each module in `eval` with
//!   a `sourceURL` so browser devtools show the original files.
//! - [`CommandBundler`] hands the job to an external tool when
//!   `scripts.command` is set.
//!
//! In development mode the bundler can keep itself resident and rebuild on
//! change, see [`resident`].

pub mod command;
pub mod module;
pub mod resident;

pub use command::CommandBundler;
pub use module::ModuleBundler;

use crate::artifact::write_if_changed;
use crate::config::{Mode, Project, ScriptsConfig};
use crate::task::{TaskKind, TaskReport};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{file}: cannot resolve '{specifier}'")]
    Unresolved { file: PathBuf, specifier: String },
    #[error("{file}: package import '{specifier}' is not supported, use a relative path")]
    BareSpecifier { file: PathBuf, specifier: String },
    #[error("{file}:{line}: unsupported module syntax: {statement}")]
    Unsupported {
        file: PathBuf,
        line: usize,
        statement: String,
    },
    #[error("bundler command failed ({status}): {stderr}")]
    Command { status: String, stderr: String },
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl ScriptError {
    /// The source file an error is about, when there is one.
    pub fn file(&self) -> Option<&Path> {
        match self {
            ScriptError::Unresolved { file, .. }
            | ScriptError::BareSpecifier { file, .. }
            | ScriptError::Unsupported { file, .. } => Some(file),
            _ => None,
        }
    }
}

/// A finished bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub code: String,
    /// Every source file that went into the bundle, sorted.
    pub inputs: Vec<PathBuf>,
}

/// Turns an entry module into a single script.
pub trait Bundler: Send + Sync {
    fn bundle(&self, entry: &Path, mode: Mode) -> Result<Bundle, ScriptError>;
}

/// The bundler `scripts` asks for.
pub fn bundler_for(root: &Path, scripts: &ScriptsConfig) -> Box<dyn Bundler> {
    if scripts.command.is_empty() {
        Box::new(ModuleBundler::new(root))
    } else {
        Box::new(CommandBundler::new(scripts.command.clone()))
    }
}

/// Bundle the entry module and write the result.
///
/// Returns the bundle inputs alongside the report so a resident bundler knows
/// which directories to watch.
pub fn build_with(
    project: &Project,
    bundler: &dyn Bundler,
) -> Result<(TaskReport, Vec<PathBuf>), ScriptError> {
    let layout = &project.layout;
    let scripts = &project.config.scripts;
    let mut report = TaskReport::new(TaskKind::Scripts);

    let entry = layout.js.join(&scripts.entry);
    if !entry.is_file() {
        tracing::debug!(entry = %entry.display(), "no script entry, nothing to bundle");
        report.summary = Some("no entry module".to_string());
        return Ok((report, Vec::new()));
    }

    match bundler.bundle(&entry, project.config.mode) {
        Ok(bundle) => {
            let out = layout.output_js().join(&scripts.output);
            if write_if_changed(&out, bundle.code.as_bytes())? {
                report.written.push(out);
            } else {
                report.unchanged.push(out);
            }
            report.summary = Some(format!(
                "{} modules, {} mode",
                bundle.inputs.len(),
                project.config.mode.as_str()
            ));
            Ok((report, bundle.inputs))
        }
        Err(ScriptError::Io(e)) => Err(ScriptError::Io(e)),
        Err(e) => {
            let path = e.file().map_or_else(|| entry.clone(), Path::to_path_buf);
            report.fail(path, e.to_string());
            Ok((report, vec![entry]))
        }
    }
}

/// Bundle with the configured bundler.
pub fn build_bundle(project: &Project) -> Result<TaskReport, ScriptError> {
    let bundler = bundler_for(&project.layout.root, &project.config.scripts);
    build_with(project, bundler.as_ref()).map(|(report, _)| report)
}
