//! `mutate4swift`: inject plausible bugs into Swift packages and see if the
//! tests catch them.

mod config;
mod console;
mod copy_tree;
mod coverage;
mod custodian;
mod error;
mod exit_code;
mod index;
mod interrupt;
mod lab;
mod list;
mod log_file;
mod mutant;
mod options;
mod orchestrator;
mod outcome;
mod plan;
mod process;
mod queue;
mod scope;
mod span;
mod swift;
mod timeouts;
mod visit;
mod workspace;

use std::io;
use std::process::exit;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

pub use anyhow::Result;

use crate::config::Config;
use crate::console::Console;
use crate::error::EngineError;
use crate::lab::{LabOptions, SchedulerMode};
use crate::options::{Options, OutputMode};
use crate::orchestrator::MutationSession;
use crate::scope::ScopeResolver;
use crate::swift::{runner_for, RunnerKind};
use crate::workspace::{
    ensure_clean_working_tree, find_package_root, list_source_files, validate_source_file,
};

/// Inject plausible bugs into Swift packages and see if the tests catch them.
#[derive(Parser, Debug)]
#[command(name = "mutate4swift", version, about)]
pub struct Args {
    /// Swift source file to mutate.
    pub file: Option<Utf8PathBuf>,

    /// Mutate every source file under Sources/.
    #[arg(long, conflicts_with = "file")]
    pub all_files: bool,

    /// Package directory to examine.
    #[arg(short = 'd', long, default_value = ".")]
    pub dir: Utf8PathBuf,

    /// Just list possible mutants, don't run them.
    #[arg(long)]
    pub list: bool,

    /// Output json (for --list and reports).
    #[arg(long)]
    pub json: bool,

    /// Show the mutation diffs while listing.
    #[arg(long)]
    pub diff: bool,

    /// Number of parallel workers.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// How workloads are handed to workers.
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerMode>,

    /// Build-and-test backend.
    #[arg(long, value_enum)]
    pub runner: Option<RunnerKind>,

    /// Test filter to use for every file, instead of scope resolution.
    #[arg(long)]
    pub test_filter: Option<String>,

    /// Only mutate sites on this 1-based line; may be repeated.
    #[arg(long)]
    pub line: Vec<u32>,

    /// Per-mutant timeout as a multiple of the baseline duration.
    #[arg(long)]
    pub timeout_multiplier: Option<f64>,

    /// Extra attempts for a mutant that times out.
    #[arg(long)]
    pub timeout_retries: Option<usize>,

    /// Sample size for the build-first heuristic.
    #[arg(long)]
    pub build_first_sample_size: Option<usize>,

    /// Build-error ratio within the sample that enables build-first mode.
    #[arg(long)]
    pub build_first_error_ratio: Option<f64>,

    /// Fail the run when more than this ratio of mutants don't compile.
    #[arg(long)]
    pub max_build_error_ratio: Option<f64>,

    /// Refuse to run with uncommitted changes in the package.
    #[arg(long)]
    pub require_clean: bool,

    /// Report format on stdout.
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputMode,

    /// Extra Sources/ directory names to exclude; may be repeated.
    #[arg(long)]
    pub exclude_dir: Vec<String>,

    /// Log filter, like `debug` or `mutate4swift=trace`.
    #[arg(short = 'L', long, default_value = "info")]
    pub level: String,

    /// Print a line for every tested mutant.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    interrupt::install_handler();
    match run(&args) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = match err.downcast_ref::<EngineError>() {
                Some(EngineError::BaselineTestsFailed | EngineError::NoTestsExecuted(_)) => {
                    exit_code::BASELINE_FAILED
                }
                Some(EngineError::BuildErrorRatioExceeded { .. }) => exit_code::FOUND_PROBLEMS,
                _ => exit_code::SOFTWARE,
            };
            exit(code);
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    let console = Console::new(args.verbose);
    if let Some(file) = &args.file {
        if !file.exists() {
            return Err(EngineError::SourceFileNotFound(file.clone()).into());
        }
    }
    let start = args.file.clone().unwrap_or_else(|| args.dir.clone());
    let root = find_package_root(&start)?;
    let config = Config::read_tree_config(&root)?;
    let options = Options::new(args, &config)?;

    if args.list {
        let files = match &args.file {
            Some(file) => vec![tree_relative(&root, file)?],
            None => list_source_files(&root, &options.exclude_dirs)?,
        };
        let stdout = io::stdout();
        let mut out = io::BufWriter::new(stdout.lock());
        list::list_mutants(&mut out, &root, &files, args.json, args.diff)?;
        return Ok(exit_code::SUCCESS);
    }

    if options.require_clean {
        ensure_clean_working_tree(&root)?;
    }
    let runner = runner_for(options.runner_kind);
    let resolver = ScopeResolver::production();

    if let Some(file) = &args.file {
        validate_source_file(&root, file)?;
        let source_path = file
            .canonicalize_utf8()
            .map_err(EngineError::IoFailure)?;
        let display_path = tree_relative(&root, &source_path)?;
        let test_filter = match &options.test_filter {
            Some(filter) => Some(filter.clone()),
            None => resolver.resolve(&source_path).unwrap_or_else(|err| {
                warn!(?err, "scope resolution failed; running the whole suite");
                None
            }),
        };
        let session = MutationSession {
            source_path,
            display_path,
            package_path: root.clone(),
            test_filter,
            line_filter: options.lines.clone(),
            baseline_override: None,
            config: options.orchestrator,
        };
        let report = orchestrator::run_mutation_session(&session, &*runner, None, &console)?;
        match options.output {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputMode::Text => console.file_summary(&report),
        }
        let total = report.total_mutations();
        let ratio = if total == 0 {
            0.0
        } else {
            report.build_errors() as f64 / total as f64
        };
        finish(&root, report.survived(), ratio, options.max_build_error_ratio)
    } else if args.all_files {
        let lab_options = LabOptions {
            jobs: options.jobs,
            scheduler: options.scheduler,
            test_filter: options.test_filter.clone(),
            exclude_dirs: options.exclude_dirs.clone(),
            orchestrator: options.orchestrator,
        };
        let (report, metrics) =
            lab::run_repository(&root, &lab_options, &*runner, Some(&resolver), None, &console)?;
        match options.output {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputMode::Text => console.repository_summary(&report, metrics),
        }
        finish(
            &root,
            report.survived(),
            report.build_error_ratio(),
            options.max_build_error_ratio,
        )
    } else {
        eprintln!("error: name a source file, or pass --all-files");
        Ok(exit_code::USAGE)
    }
}

/// Final safeguards: a stale backup or a blown build-error budget turns an
/// otherwise quiet run into a failure.
fn finish(
    root: &Utf8Path,
    survivors: usize,
    build_error_ratio: f64,
    max_build_error_ratio: f64,
) -> Result<i32> {
    if let Some(stale) = find_stale_backup(root) {
        anyhow::bail!("stale backup left behind: {stale}");
    }
    if build_error_ratio > max_build_error_ratio {
        return Err(EngineError::BuildErrorRatioExceeded {
            actual: build_error_ratio,
            limit: max_build_error_ratio,
        }
        .into());
    }
    Ok(if survivors > 0 {
        exit_code::FOUND_PROBLEMS
    } else {
        exit_code::SUCCESS
    })
}

fn find_stale_backup(root: &Utf8Path) -> Option<Utf8PathBuf> {
    let walker = ignore::WalkBuilder::new(root.join("Sources"))
        .standard_filters(false)
        .build();
    for entry in walker.flatten() {
        if let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) {
            if path.as_str().ends_with(".backup") {
                return Some(path);
            }
        }
    }
    None
}

fn tree_relative(root: &Utf8Path, file: &Utf8Path) -> Result<Utf8PathBuf> {
    let canonical = file.canonicalize_utf8().unwrap_or_else(|_| file.to_owned());
    let canonical_root = root.canonicalize_utf8().unwrap_or_else(|_| root.to_owned());
    Ok(canonical
        .strip_prefix(&canonical_root)
        .map(Utf8Path::to_owned)
        .unwrap_or(canonical))
}
