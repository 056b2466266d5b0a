//! Self-watching bundler.
//!
//! With `scripts.watch` on (the development default) the bundler stays
//! resident in its own thread: it builds once, watches the js root plus every
//! directory that contributed a module, and rebuilds 100 ms after the last
//! change to a `.js` file. The watch scheduler then has no js binding.

use super::{Bundler, ScriptError, bundler_for, build_with};
use crate::artifact::has_extension;
use crate::config::Project;
use crate::output;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Quiet period after the last change before rebuilding.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Trailing-edge debounce: fires once `quiet` has passed since the last
/// `touch`.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    quiet: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, last: None }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// `true` exactly once per burst of touches.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) >= self.quiet => {
                self.last = None;
                true
            }
            _ => false,
        }
    }
}

/// Directories to watch for a set of bundle inputs: the js root
/// (recursively) and every input directory outside it.
pub fn watch_dirs(js_root: &Path, inputs: &[PathBuf]) -> BTreeSet<PathBuf> {
    let root = js_root.canonicalize().unwrap_or_else(|_| js_root.to_path_buf());
    inputs
        .iter()
        .filter_map(|p| p.parent())
        .filter(|dir| !dir.starts_with(&root))
        .map(Path::to_path_buf)
        .collect()
}

fn is_relevant(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_))
        && event.paths.iter().any(|p| has_extension(p, &["js", "mjs"]))
}

fn rebuild(project: &Project, bundler: &dyn Bundler) -> Vec<PathBuf> {
    let started = Instant::now();
    match build_with(project, bundler) {
        Ok((mut report, inputs)) => {
            report.elapsed = started.elapsed();
            for failure in &report.failures {
                tracing::warn!(task = "scripts", path = %failure.path.display(), "{}", failure.message);
            }
            output::print_task_report(&report);
            inputs
        }
        Err(e) => {
            tracing::error!(task = "scripts", "{e}");
            Vec::new()
        }
    }
}

/// Build now, then keep rebuilding on change until `running` clears.
pub fn spawn(project: Project, running: Arc<AtomicBool>) -> Result<JoinHandle<()>, ScriptError> {
    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        Config::default(),
    )?;
    std::fs::create_dir_all(&project.layout.js)?;
    watcher.watch(&project.layout.js, RecursiveMode::Recursive)?;

    let handle = thread::Builder::new()
        .name("webpipe-scripts".to_string())
        .spawn(move || {
            let bundler = bundler_for(&project.layout.root, &project.config.scripts);
            let mut extra: BTreeSet<PathBuf> = BTreeSet::new();
            let mut track = |watcher: &mut RecommendedWatcher, inputs: &[PathBuf]| {
                for dir in watch_dirs(&project.layout.js, inputs) {
                    if extra.insert(dir.clone())
                        && let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive)
                    {
                        tracing::warn!(dir = %dir.display(), "cannot watch: {e}");
                    }
                }
            };

            let inputs = rebuild(&project, bundler.as_ref());
            track(&mut watcher, &inputs);
            tracing::info!(dir = %project.layout.js.display(), "script bundler watching");

            let mut debounce = Debounce::new(DEBOUNCE);
            while running.load(Ordering::SeqCst) {
                if let Ok(event) = rx.recv_timeout(Duration::from_millis(50))
                    && is_relevant(&event)
                {
                    debounce.touch(Instant::now());
                }
                if debounce.ready(Instant::now()) {
                    let inputs = rebuild(&project, bundler.as_ref());
                    track(&mut watcher, &inputs);
                }
            }
            tracing::debug!("script bundler stopped");
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut d = Debounce::new(Duration::from_millis(100));
        assert!(!d.ready(start));

        d.touch(start);
        d.touch(start + Duration::from_millis(60));
        assert!(!d.ready(start + Duration::from_millis(120)));
        assert!(d.ready(start + Duration::from_millis(160)));
        assert!(!d.ready(start + Duration::from_millis(500)));
    }

    #[test]
    fn watch_dirs_adds_only_directories_outside_the_js_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("src/js/lib")).unwrap();
        std::fs::create_dir_all(root.join("shared")).unwrap();

        let dirs = watch_dirs(
            &root.join("src/js"),
            &[
                root.join("src/js/script.js"),
                root.join("src/js/lib/a.js"),
                root.join("shared/util.js"),
            ],
        );
        assert_eq!(dirs.into_iter().collect::<Vec<_>>(), vec![root.join("shared")]);
    }

    #[test]
    fn access_events_are_ignored() {
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("a.js"));
        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("a.js"));
        let other = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("a.css"));
        assert!(!is_relevant(&access));
        assert!(is_relevant(&modify));
        assert!(!is_relevant(&other));
    }
}
