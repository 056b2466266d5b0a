use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use webpipe::config::{self, Project};
use webpipe::server::DevServer;
use webpipe::task::{self, TaskKind};
use webpipe::watch::{self, Bindings, PipelineDispatch, Scheduler};
use webpipe::{output, script};

fn version_string() -> &'static str {
    let on_tag = env!("WEBPIPE_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("WEBPIPE_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "webpipe")]
#[command(about = "Front-end asset pipeline with a live-reload dev server")]
#[command(long_about = "\
Front-end asset pipeline with a live-reload dev server

Builds a site from a fixed source layout into an output tree:

  src/
  ├── pages/      *.html with @@include('partial.html', {\"var\": \"value\"})
  ├── scss/       *.scss entry files (_partials skipped)
  ├── css/        *.css libraries, bundled into build/css/bundle.css
  ├── js/         script.js entry module → build/js/all.js
  ├── fonts/      *.ttf → build/fonts/*.woff, *.woff2 + scss font-face lines
  └── img/        images → build/img (compressed, plus .webp derivatives)

Without a subcommand, runs the dev pipeline: serve build/, watch the
sources and rebuild what changed.

Settings live in an optional webpipe.toml at the project root. Run
'webpipe gen-config' to print a documented one.")]
#[command(version = version_string())]
struct Cli {
    /// Project directory
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve, watch and rebuild (default)
    Dev,
    /// Remove unused selectors from built stylesheets
    Perfect,
    /// Wrap built <img> tags in <picture> with WebP sources
    WebpHtml,
    /// Convert fonts and generate font-face declarations
    Fonts,
    /// Build everything once; non-zero exit on any failure
    Build,
    /// Print a stock webpipe.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging();

    let command = cli.command.unwrap_or(Command::Dev);
    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let root = cli.root.canonicalize()?;
    let project = Project::load(&root)?;
    tracing::debug!(root = %root.display(), mode = project.config.mode.as_str(), "project loaded");
    init_thread_pool(&project.config.processing);

    match command {
        Command::Dev => dev(project)?,
        Command::Perfect => run_single(TaskKind::PurgeCss, &project)?,
        Command::WebpHtml => run_single(TaskKind::WebpHtml, &project)?,
        Command::Fonts => {
            for report in task::run_series(&[TaskKind::FontFiles, TaskKind::FontStyles], &project)? {
                output::print_task_report(&report);
            }
        }
        Command::Build => {
            if !build(&project) {
                std::process::exit(1);
            }
        }
        Command::GenConfig => unreachable!("handled above"),
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides the default `webpipe=info`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webpipe=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn run_single(kind: TaskKind, project: &Project) -> Result<(), task::TaskError> {
    let report = kind.run(project)?;
    output::print_task_report(&report);
    Ok(())
}

/// Two stages: fonts and WebP derivatives first, then everything else.
/// Returns `false` when any task or file failed.
fn build(project: &Project) -> bool {
    let mut results = Vec::new();
    for (label, stage) in [("prepare", task::BUILD_PREPARE), ("main", task::BUILD_MAIN)] {
        println!("==> Stage {label}");
        for (kind, result) in task::run_parallel(stage, project) {
            match &result {
                Ok(report) => output::print_task_report(report),
                Err(e) => tracing::error!(task = kind.name(), "{e}"),
            }
            results.push((kind, result));
        }
    }
    output::print_build_summary(&results);
    results
        .iter()
        .all(|(_, result)| result.as_ref().is_ok_and(|r| r.is_success()))
}

fn dev(project: Project) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let server = DevServer::bind(&project)?;
    let hub = server.hub();
    let mut workers = vec![server.spawn(Arc::clone(&running))?];

    // A self-watching bundler builds on start, so the batch skips it.
    let self_watch = project.config.scripts_self_watch();
    if self_watch {
        workers.push(script::resident::spawn(project.clone(), Arc::clone(&running))?);
    }
    let batch: Vec<TaskKind> = task::DEFAULT_BATCH
        .iter()
        .copied()
        .filter(|kind| !(self_watch && *kind == TaskKind::Scripts))
        .collect();

    let scheduler = Scheduler::new(
        Bindings::standard(&project)?,
        PipelineDispatch::new(project.clone(), Some(hub)),
    );

    let batch_project = project.clone();
    workers.push(std::thread::spawn(move || {
        for (kind, result) in task::run_parallel(&batch, &batch_project) {
            match result {
                Ok(report) => output::print_task_report(&report),
                Err(e) => tracing::error!(task = kind.name(), "{e}"),
            }
        }
    }));

    watch::watch(&project, &scheduler, Arc::clone(&running))?;

    println!("Stopping");
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
