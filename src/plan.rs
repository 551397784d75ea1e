//! Plan repository-wide mutation work: per-file workloads, LPT assignment
//! into worker buckets, and scope-affinity refinement.
//!
//! Planning is a pure function of the workloads; all mutable scheduling
//! state lives in the work queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::coverage::{covered_lines_or_unavailable, CoverageProvider};
use crate::mutant::discard_identity_sites;
use crate::scope::ScopeResolver;
use crate::visit::discover;
use crate::Result;

/// Scope key for workloads whose filter could not be narrowed.
pub const ALL_TESTS_SCOPE: &str = "__all_tests__";

/// One source file's worth of mutation work.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct MutationWorkload {
    pub source_file: Utf8PathBuf,
    pub scope_filter: Option<String>,
    /// Sites discovered before coverage elimination.
    pub potential_mutations: usize,
    /// Sites remaining after coverage elimination; the workload's weight.
    pub candidate_mutations: usize,
}

impl MutationWorkload {
    pub fn scope_key(&self) -> String {
        self.scope_filter
            .clone()
            .unwrap_or_else(|| ALL_TESTS_SCOPE.to_owned())
    }

    /// Mutable but never exercised by tests: worth surfacing to the user.
    pub fn is_uncovered(&self) -> bool {
        self.potential_mutations > 0 && self.candidate_mutations == 0
    }
}

/// The workloads assigned to one worker.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ExecutionBucket {
    pub worker_index: usize,
    pub workloads: Vec<MutationWorkload>,
    pub total_weight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyPlan {
    pub jobs_requested: usize,
    pub jobs_planned: usize,
    pub workloads: Vec<MutationWorkload>,
    pub buckets: Vec<ExecutionBucket>,
    pub scope_weights: HashMap<String, usize>,
}

impl StrategyPlan {
    pub fn total_candidate_mutations(&self) -> usize {
        self.workloads.iter().map(|w| w.candidate_mutations).sum()
    }

    pub fn max_bucket_weight(&self) -> usize {
        self.buckets.iter().map(|b| b.total_weight).max().unwrap_or(0)
    }

    fn max_single_workload_weight(&self) -> usize {
        self.workloads
            .iter()
            .map(|w| w.candidate_mutations)
            .max()
            .unwrap_or(0)
    }

    /// No schedule can beat the heaviest file, nor an even split.
    pub fn theoretical_lower_bound(&self) -> usize {
        let serial = self.total_candidate_mutations();
        self.max_single_workload_weight()
            .max(serial.div_ceil(self.jobs_planned.max(1)))
    }

    pub fn estimated_speedup_upper_bound(&self) -> f64 {
        self.total_candidate_mutations() as f64 / self.max_bucket_weight().max(1) as f64
    }
}

/// Collaborators used to turn file paths into workloads.
pub struct WorkloadSources<'a> {
    pub package: &'a Utf8Path,
    pub filter_override: Option<&'a str>,
    pub resolver: Option<&'a ScopeResolver>,
    pub coverage: Option<&'a dyn CoverageProvider>,
}

/// Discover, filter, and scope each file, producing workloads in path order.
pub fn make_workloads(
    files: &[Utf8PathBuf],
    sources: &WorkloadSources<'_>,
) -> Result<Vec<MutationWorkload>> {
    let mut sorted: Vec<&Utf8PathBuf> = files.iter().collect();
    sorted.sort();
    let mut workloads = Vec::with_capacity(sorted.len());
    for file in sorted {
        let full_path = sources.package.join(file);
        let code = fs::read_to_string(&full_path)
            .with_context(|| format!("read source file {full_path}"))?;
        let sites = discard_identity_sites(discover(&code, file.as_str())?);
        let potential_mutations = sites.len();
        let candidate_mutations = match sources.coverage {
            Some(provider) => {
                match covered_lines_or_unavailable(provider, &full_path, sources.package) {
                    Ok(covered) => sites.iter().filter(|s| covered.contains(&s.line)).count(),
                    Err(err) => {
                        warn!(%file, %err, "keeping all sites");
                        potential_mutations
                    }
                }
            }
            None => potential_mutations,
        };
        let scope_filter = match (sources.filter_override, sources.resolver) {
            (Some(filter), _) => Some(filter.to_owned()),
            (None, Some(resolver)) => match resolver.resolve(&full_path) {
                Ok(filter) => filter,
                Err(err) => {
                    warn!(%file, ?err, "scope resolution failed; running the whole suite");
                    None
                }
            },
            (None, None) => None,
        };
        workloads.push(MutationWorkload {
            source_file: file.clone(),
            scope_filter,
            potential_mutations,
            candidate_mutations,
        });
    }
    Ok(workloads)
}

/// Assign workloads to `jobs_requested` buckets with LPT list scheduling and
/// scope-affinity refinement.
pub fn assemble_plan(workloads: Vec<MutationWorkload>, jobs_requested: usize) -> StrategyPlan {
    let mut scope_weights: HashMap<String, usize> = HashMap::new();
    for workload in &workloads {
        *scope_weights.entry(workload.scope_key()).or_default() += workload.candidate_mutations;
    }

    let mut candidates: Vec<MutationWorkload> = workloads
        .iter()
        .filter(|w| w.candidate_mutations > 0)
        .cloned()
        .collect();
    if candidates.is_empty() {
        return StrategyPlan {
            jobs_requested,
            jobs_planned: 1,
            workloads,
            buckets: vec![ExecutionBucket {
                worker_index: 0,
                workloads: Vec::new(),
                total_weight: 0,
            }],
            scope_weights,
        };
    }

    let jobs_planned = jobs_requested.min(candidates.len()).max(1);
    let serial_weight: usize = candidates.iter().map(|w| w.candidate_mutations).sum();
    let target_bucket_weight = serial_weight.div_ceil(jobs_planned);

    // Heaviest first; path order on equal weights keeps the plan stable.
    candidates.sort_by(|a, b| {
        b.candidate_mutations
            .cmp(&a.candidate_mutations)
            .then_with(|| a.source_file.cmp(&b.source_file))
    });

    let mut bucket_workloads: Vec<Vec<MutationWorkload>> = vec![Vec::new(); jobs_planned];
    let mut weights: Vec<usize> = vec![0; jobs_planned];
    let mut primary_worker: HashMap<String, usize> = HashMap::new();
    // Min-weight lookup backed by a priority queue; entries go stale when a
    // bucket is updated and are skipped lazily.
    let mut heap: BinaryHeap<Reverse<(usize, usize)>> =
        (0..jobs_planned).map(|i| Reverse((0, i))).collect();

    for workload in candidates {
        let lpt_choice = loop {
            let Reverse((weight, index)) = *heap.peek().expect("heap is never empty");
            if weight == weights[index] {
                heap.pop();
                break index;
            }
            heap.pop(); // stale entry
        };
        let scope = workload.scope_key();
        let chosen = match primary_worker.get(&scope) {
            Some(&primary) if primary != lpt_choice => {
                let expected_scope_share = scope_weights[&scope].div_ceil(jobs_planned);
                let split_threshold = (expected_scope_share * 2)
                    .max(target_bucket_weight.min(workload.candidate_mutations * 2));
                if weights[primary] > weights[lpt_choice] + split_threshold {
                    debug!(%scope, primary, "scope split: primary is overloaded");
                    lpt_choice
                } else {
                    primary
                }
            }
            Some(&primary) => primary,
            None => {
                primary_worker.insert(scope, lpt_choice);
                lpt_choice
            }
        };
        if chosen != lpt_choice {
            heap.push(Reverse((weights[lpt_choice], lpt_choice)));
        }
        weights[chosen] += workload.candidate_mutations;
        bucket_workloads[chosen].push(workload);
        heap.push(Reverse((weights[chosen], chosen)));
    }

    let buckets = bucket_workloads
        .into_iter()
        .enumerate()
        .map(|(worker_index, workloads)| ExecutionBucket {
            worker_index,
            total_weight: workloads.iter().map(|w| w.candidate_mutations).sum(),
            workloads,
        })
        .collect();
    StrategyPlan {
        jobs_requested,
        jobs_planned,
        workloads,
        buckets,
        scope_weights,
    }
}
