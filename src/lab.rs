//! Drive mutation over a whole repository: enumerate sources, plan buckets,
//! fan out isolated worker workspaces, and merge per-file reports.
//!
//! Workers are OS threads under a scoped spawn; each one blocks freely on
//! its own subprocesses and file copies but never on another worker. The
//! work queue is the only shared mutable state.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use camino::Utf8Path;
use serde::Deserialize;
use tracing::{debug, info};

use crate::console::Console;
use crate::copy_tree::WorkerWorkspace;
use crate::coverage::CoverageProvider;
use crate::interrupt::check_interrupted;
use crate::orchestrator::{run_mutation_session, MutationSession, OrchestratorConfig};
use crate::outcome::{MutationReport, RepositoryReport};
use crate::plan::{assemble_plan, make_workloads, MutationWorkload, StrategyPlan, WorkloadSources};
use crate::queue::{QueueMetrics, WorkQueue};
use crate::scope::ScopeResolver;
use crate::swift::TestRunner;
use crate::timeouts::BaselineResult;
use crate::workspace::list_source_files;
use crate::Result;

#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Each worker drains exactly its planned bucket.
    Static,
    /// Workers drain their bucket first, then steal from the heaviest.
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct LabOptions {
    pub jobs: usize,
    pub scheduler: SchedulerMode,
    /// Overrides scope resolution for every file when set.
    pub test_filter: Option<String>,
    pub exclude_dirs: Vec<String>,
    pub orchestrator: OrchestratorConfig,
}

/// Run mutation testing over every mutable file in the package.
pub fn run_repository(
    root: &Utf8Path,
    options: &LabOptions,
    runner: &dyn TestRunner,
    resolver: Option<&ScopeResolver>,
    coverage: Option<&dyn CoverageProvider>,
    console: &Console,
) -> Result<(RepositoryReport, Option<QueueMetrics>)> {
    let files = list_source_files(root, &options.exclude_dirs)?;
    info!(files = files.len(), %root, "planning repository run");
    let sources = WorkloadSources {
        package: root,
        filter_override: options.test_filter.as_deref(),
        resolver,
        coverage,
    };
    let workloads = make_workloads(&files, &sources)?;
    let plan = assemble_plan(workloads, options.jobs.max(1));
    debug!(
        jobs_planned = plan.jobs_planned,
        total = plan.total_candidate_mutations(),
        lower_bound = plan.theoretical_lower_bound(),
        speedup_bound = plan.estimated_speedup_upper_bound(),
        "assembled plan"
    );

    // Files with nothing to execute still appear in the report.
    let mut reports: Vec<MutationReport> = plan
        .workloads
        .iter()
        .filter(|w| w.candidate_mutations == 0)
        .map(|w| {
            if w.is_uncovered() {
                console.message(&format!(
                    "{}: {} mutable sites but none are covered by tests",
                    w.source_file, w.potential_mutations
                ));
            }
            MutationReport {
                source_file: w.source_file.clone(),
                baseline_duration: Duration::ZERO,
                results: Vec::new(),
            }
        })
        .collect();

    let mut metrics = None;
    if plan.jobs_planned <= 1 {
        reports.extend(run_serial(root, &plan, options, runner, coverage, console)?);
    } else {
        let (worker_reports, queue_metrics) =
            run_parallel(root, &plan, options, runner, coverage, console)?;
        reports.extend(worker_reports);
        metrics = queue_metrics;
    }

    reports.sort_by(|a, b| a.source_file.cmp(&b.source_file));
    Ok((
        RepositoryReport {
            package_path: root.to_owned(),
            file_reports: reports,
        },
        metrics,
    ))
}

fn run_serial(
    root: &Utf8Path,
    plan: &StrategyPlan,
    options: &LabOptions,
    runner: &dyn TestRunner,
    coverage: Option<&dyn CoverageProvider>,
    console: &Console,
) -> Result<Vec<MutationReport>> {
    let workspace = WorkerWorkspace::create(root, 0)?;
    let mut baseline_cache: HashMap<String, BaselineResult> = HashMap::new();
    let mut reports = Vec::new();
    for workload in plan.buckets.iter().flat_map(|b| &b.workloads) {
        check_interrupted()?;
        reports.push(run_workload(
            workspace.path(),
            workload,
            options,
            runner,
            coverage,
            console,
            &mut baseline_cache,
        )?);
    }
    Ok(reports)
}

fn run_parallel(
    root: &Utf8Path,
    plan: &StrategyPlan,
    options: &LabOptions,
    runner: &dyn TestRunner,
    coverage: Option<&dyn CoverageProvider>,
    console: &Console,
) -> Result<(Vec<MutationReport>, Option<QueueMetrics>)> {
    let queue = WorkQueue::new(plan);
    let worker_results: Vec<Result<Vec<MutationReport>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..plan.jobs_planned)
            .map(|worker_index| {
                let queue = &queue;
                scope.spawn(move || {
                    worker_loop(
                        root,
                        plan,
                        worker_index,
                        options,
                        runner,
                        coverage,
                        console,
                        queue,
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("worker thread panicked")))
            })
            .collect()
    });
    let mut reports = Vec::new();
    for result in worker_results {
        reports.extend(result?);
    }
    let metrics = match options.scheduler {
        SchedulerMode::Dynamic => Some(queue.metrics()),
        SchedulerMode::Static => None,
    };
    Ok((reports, metrics))
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    root: &Utf8Path,
    plan: &StrategyPlan,
    worker_index: usize,
    options: &LabOptions,
    runner: &dyn TestRunner,
    coverage: Option<&dyn CoverageProvider>,
    console: &Console,
    queue: &WorkQueue,
) -> Result<Vec<MutationReport>> {
    // The workspace is removed when this function returns, by any path.
    let workspace = WorkerWorkspace::create(root, worker_index)?;
    let mut baseline_cache: HashMap<String, BaselineResult> = HashMap::new();
    let mut reports = Vec::new();
    match options.scheduler {
        SchedulerMode::Static => {
            for workload in &plan.buckets[worker_index].workloads {
                check_interrupted()?;
                reports.push(run_workload(
                    workspace.path(),
                    workload,
                    options,
                    runner,
                    coverage,
                    console,
                    &mut baseline_cache,
                )?);
            }
        }
        SchedulerMode::Dynamic => loop {
            check_interrupted()?;
            let warmed: HashSet<String> = baseline_cache.keys().cloned().collect();
            let Some(workload) = queue.next(worker_index, &warmed) else {
                break;
            };
            reports.push(run_workload(
                workspace.path(),
                &workload,
                options,
                runner,
                coverage,
                console,
                &mut baseline_cache,
            )?);
        },
    }
    Ok(reports)
}

/// Run one file's mutation session in a workspace, paying the scope baseline
/// only the first time this worker touches the scope.
fn run_workload(
    workspace_path: &Utf8Path,
    workload: &MutationWorkload,
    options: &LabOptions,
    runner: &dyn TestRunner,
    coverage: Option<&dyn CoverageProvider>,
    console: &Console,
    baseline_cache: &mut HashMap<String, BaselineResult>,
) -> Result<MutationReport> {
    let scope_key = workload.scope_key();
    let baseline = match baseline_cache.get(&scope_key) {
        Some(baseline) => *baseline,
        None => {
            debug!(scope = %scope_key, "warming scope baseline");
            let duration =
                runner.run_baseline(workspace_path, workload.scope_filter.as_deref())?;
            let baseline = BaselineResult::new(duration, options.orchestrator.timeout_multiplier);
            baseline_cache.insert(scope_key, baseline);
            baseline
        }
    };
    let session = MutationSession {
        source_path: workspace_path.join(&workload.source_file),
        display_path: workload.source_file.clone(),
        package_path: workspace_path.to_owned(),
        test_filter: workload.scope_filter.clone(),
        line_filter: None,
        baseline_override: Some(baseline),
        config: options.orchestrator,
    };
    run_mutation_session(&session, runner, coverage, console)
}
