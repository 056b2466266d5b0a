//! File watching and rebuild scheduling.
//!
//! A [`Binding`] maps file globs (relative to the project root) to an
//! [`Action`]: run tasks in series, or tell browsers to reload. One file
//! change triggers every binding it matches.
//!
//! Each binding runs independently under a small state machine:
//!
//! ```text
//! Idle ──change──▶ Running ──done──▶ Idle
//!                   │   ▲
//!              change   │ done (one more run)
//!                   ▼   │
//!               RunningDirty
//! ```
//!
//! Changes arriving during a run collapse into a single follow-up run, so a
//! burst of saves never queues more than one extra rebuild and never runs the
//! same binding twice at once. Nothing is cancelled.

use crate::artifact::relative_display;
use crate::config::Project;
use crate::output;
use crate::server::{LiveHub, ReloadKind, served_path};
use crate::task::{TaskKind, run_series};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("invalid watch glob: {0}")]
    Glob(#[from] globset::Error),
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run these tasks one after another.
    Run(Vec<TaskKind>),
    /// Push a browser event for the changed artifact.
    Reload(ReloadKind),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: &'static str,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub action: Action,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

fn glob_set(patterns: &[String]) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    Ok(builder.build()?)
}

impl Binding {
    pub fn new(
        name: &'static str,
        include: Vec<String>,
        exclude: Vec<String>,
        action: Action,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            name,
            include_set: glob_set(&include)?,
            exclude_set: glob_set(&exclude)?,
            include,
            exclude,
            action,
        })
    }

    /// `rel` is a `/`-separated path relative to the project root.
    pub fn matches(&self, rel: &str) -> bool {
        self.include_set.is_match(rel) && !self.exclude_set.is_match(rel)
    }
}

/// Glob prefix for a directory under the project root.
fn dir_glob(dir: &Path, root: &Path) -> String {
    let rel = relative_display(dir, root);
    if rel.is_empty() {
        String::new()
    } else {
        format!("{}/", globset::escape(&rel))
    }
}

#[derive(Debug, Clone)]
pub struct Bindings {
    bindings: Vec<Binding>,
}

impl Bindings {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self { bindings }
    }

    /// The standard table for a project.
    ///
    /// The script binding is left out when the bundler watches its own
    /// inputs.
    pub fn standard(project: &Project) -> Result<Self, WatchError> {
        let layout = &project.layout;
        let root = &layout.root;
        let dir = |d: &Path| dir_glob(d, root);
        let one = |pattern: String| vec![pattern];

        let mut bindings = vec![
            Binding::new(
                "pages",
                one(format!("{}**/*.html", dir(&layout.pages))),
                vec![],
                Action::Run(vec![TaskKind::Pages]),
            )?,
            Binding::new(
                "styles",
                one(format!("{}**/*.scss", dir(&layout.scss))),
                vec![],
                Action::Run(vec![TaskKind::Styles]),
            )?,
            Binding::new(
                "fonts",
                one(format!("{}*.ttf", dir(&layout.fonts))),
                vec![],
                Action::Run(vec![TaskKind::FontFiles, TaskKind::FontStyles]),
            )?,
            Binding::new(
                "images",
                one(format!("{}**/*", dir(&layout.images))),
                vec![],
                Action::Run(vec![TaskKind::Webp, TaskKind::Images]),
            )?,
        ];
        if !project.config.scripts_self_watch() {
            bindings.push(Binding::new(
                "scripts",
                one(format!("{}*.js", dir(&layout.js))),
                vec![],
                Action::Run(vec![TaskKind::Scripts]),
            )?);
        }
        let css = dir(&layout.css);
        let excluded = project
            .config
            .styles
            .exclude
            .iter()
            .map(|name| format!("{css}{}", globset::escape(name)))
            .collect();
        bindings.push(Binding::new(
            "css-bundle",
            one(format!("{css}*.css")),
            excluded,
            Action::Run(vec![TaskKind::CssBundle]),
        )?);

        let out = dir(&layout.output);
        bindings.push(Binding::new(
            "reload-html",
            one(format!("{out}*.html")),
            vec![],
            Action::Reload(ReloadKind::Reload),
        )?);
        bindings.push(Binding::new(
            "inject-css",
            one(format!("{}*.css", dir(&layout.output_css()))),
            vec![],
            Action::Reload(ReloadKind::Inject),
        )?);
        bindings.push(Binding::new(
            "reload-js",
            one(format!("{}*.js", dir(&layout.output_js()))),
            vec![],
            Action::Reload(ReloadKind::Reload),
        )?);
        Ok(Self { bindings })
    }

    /// Indices of every binding `rel` matches.
    pub fn matching(&self, rel: &str) -> Vec<usize> {
        self.bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.matches(rel))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// What the scheduler does when a binding fires.
pub trait Dispatch: Send + Sync + 'static {
    fn run(&self, tasks: &[TaskKind]);
    /// `path` is relative to the output root.
    fn reload(&self, kind: ReloadKind, path: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Running, and another change arrived meanwhile.
    RunningDirty,
}

pub struct Scheduler<D: Dispatch> {
    bindings: Arc<Bindings>,
    states: Arc<Mutex<Vec<RunState>>>,
    dispatch: Arc<D>,
}

fn lock_states(states: &Mutex<Vec<RunState>>) -> MutexGuard<'_, Vec<RunState>> {
    states.lock().unwrap_or_else(|e| e.into_inner())
}

impl<D: Dispatch> Scheduler<D> {
    pub fn new(bindings: Bindings, dispatch: D) -> Self {
        let states = vec![RunState::Idle; bindings.len()];
        Self {
            bindings: Arc::new(bindings),
            states: Arc::new(Mutex::new(states)),
            dispatch: Arc::new(dispatch),
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn state(&self, index: usize) -> Option<RunState> {
        lock_states(&self.states).get(index).copied()
    }

    /// Fire a `Run` binding. Returns the worker handle when a new run
    /// started; `None` when the change was folded into the current run.
    pub fn trigger(&self, index: usize) -> Option<JoinHandle<()>> {
        let tasks = match &self.bindings.get(index)?.action {
            Action::Run(tasks) => tasks.clone(),
            Action::Reload(_) => return None,
        };
        {
            let mut states = lock_states(&self.states);
            match states[index] {
                RunState::Idle => states[index] = RunState::Running,
                RunState::Running | RunState::RunningDirty => {
                    states[index] = RunState::RunningDirty;
                    return None;
                }
            }
        }

        let states = Arc::clone(&self.states);
        let dispatch = Arc::clone(&self.dispatch);
        let name = self.bindings.get(index).map_or("?", |b| b.name);
        let spawned = thread::Builder::new()
            .name(format!("webpipe-{name}"))
            .spawn(move || {
                loop {
                    dispatch.run(&tasks);
                    let mut states = lock_states(&states);
                    if states[index] == RunState::RunningDirty {
                        states[index] = RunState::Running;
                        continue;
                    }
                    states[index] = RunState::Idle;
                    break;
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(binding = name, "cannot start worker: {e}");
                lock_states(&self.states)[index] = RunState::Idle;
                None
            }
        }
    }

    /// Handle one batch of changed paths, given relative to the project
    /// root. Each matching `Run` binding is triggered once per batch;
    /// `Reload` bindings fire once per path.
    pub fn on_change(&self, rel_paths: &[(String, String)]) -> Vec<JoinHandle<()>> {
        let mut to_run = BTreeSet::new();
        for (rel, served) in rel_paths {
            for index in self.bindings.matching(rel) {
                let Some(binding) = self.bindings.get(index) else {
                    continue;
                };
                tracing::debug!(binding = binding.name, path = %rel, "changed");
                match binding.action {
                    Action::Run(_) => {
                        to_run.insert(index);
                    }
                    Action::Reload(kind) => self.dispatch.reload(kind, served),
                }
            }
        }
        to_run
            .into_iter()
            .filter_map(|index| self.trigger(index))
            .collect()
    }
}

/// Production dispatch: run the pipeline tasks, notify the dev server.
pub struct PipelineDispatch {
    project: Project,
    hub: Option<Arc<LiveHub>>,
}

impl PipelineDispatch {
    pub fn new(project: Project, hub: Option<Arc<LiveHub>>) -> Self {
        Self { project, hub }
    }
}

impl Dispatch for PipelineDispatch {
    fn run(&self, tasks: &[TaskKind]) {
        match run_series(tasks, &self.project) {
            Ok(reports) => {
                for report in &reports {
                    output::print_task_report(report);
                }
            }
            Err(e) => tracing::error!(tasks = ?tasks, "{e}"),
        }
    }

    fn reload(&self, kind: ReloadKind, path: &str) {
        if let Some(hub) = &self.hub {
            hub.notify(kind, path);
        }
    }
}

/// Paths of an event as (relative to root, relative to output root).
/// Paths outside the root are dropped.
fn relative_paths(event: &Event, roots: &[PathBuf], output: &Path) -> Vec<(String, String)> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let root = roots.iter().find(|r| path.starts_with(r))?;
            let rel = relative_display(path, root);
            let out_dir = root.join(output.strip_prefix(&roots[0]).unwrap_or(output));
            Some((rel, served_path(path, &out_dir)))
        })
        .collect()
}

/// Watch the project root until `running` clears.
pub fn watch<D: Dispatch>(
    project: &Project,
    scheduler: &Scheduler<D>,
    running: Arc<AtomicBool>,
) -> Result<(), WatchError> {
    let root = project.layout.root.clone();
    let mut roots = vec![root.clone()];
    if let Ok(canonical) = root.canonicalize()
        && canonical != root
    {
        roots.push(canonical);
    }

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!("watch error: {e}"),
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), bindings = scheduler.bindings().len(), "watching");

    while running.load(Ordering::SeqCst) {
        let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) else {
            continue;
        };
        if matches!(event.kind, EventKind::Access(_)) {
            continue;
        }
        let paths = relative_paths(&event, &roots, &project.layout.output);
        // Workers are detached; each finishes its current run on its own.
        drop(scheduler.on_change(&paths));
    }
    tracing::debug!("watcher stopped");
    Ok(())
}
