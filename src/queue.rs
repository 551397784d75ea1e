//! Dynamic scheduler: per-worker queues seeded from the plan, with
//! scope-aware dispatch and work stealing.
//!
//! The queue is the only shared mutable scheduling state; one lock
//! serializes dispatch and keeps the metrics consistent with it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;
use tracing::trace;

use crate::plan::{MutationWorkload, StrategyPlan};

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct QueueMetrics {
    pub dispatched_workloads: usize,
    pub stolen_workloads: usize,
    pub remaining_workloads: usize,
    pub remaining_weight: usize,
}

pub struct WorkQueue {
    inner: Mutex<QueueState>,
}

struct QueueState {
    queues: Vec<Vec<MutationWorkload>>,
    remaining_weight: Vec<usize>,
    /// The worker holding the majority of each scope's weight at seeding.
    scope_owner: HashMap<String, usize>,
    metrics: QueueMetrics,
}

impl WorkQueue {
    pub fn new(plan: &StrategyPlan) -> WorkQueue {
        let queues: Vec<Vec<MutationWorkload>> =
            plan.buckets.iter().map(|b| b.workloads.clone()).collect();
        let remaining_weight: Vec<usize> =
            plan.buckets.iter().map(|b| b.total_weight).collect();

        // Determine each scope's owner once, from the seeded buckets.
        let mut per_worker_scope_weight: HashMap<String, Vec<usize>> = HashMap::new();
        for (worker, queue) in queues.iter().enumerate() {
            for workload in queue {
                per_worker_scope_weight
                    .entry(workload.scope_key())
                    .or_insert_with(|| vec![0; queues.len()])[worker] +=
                    workload.candidate_mutations;
            }
        }
        let scope_owner = per_worker_scope_weight
            .into_iter()
            .map(|(scope, weights)| {
                let owner = weights
                    .iter()
                    .enumerate()
                    .max_by_key(|&(index, weight)| (*weight, std::cmp::Reverse(index)))
                    .map(|(index, _)| index)
                    .unwrap_or(0);
                (scope, owner)
            })
            .collect();

        let metrics = QueueMetrics {
            remaining_workloads: queues.iter().map(Vec::len).sum(),
            remaining_weight: remaining_weight.iter().sum(),
            ..QueueMetrics::default()
        };
        WorkQueue {
            inner: Mutex::new(QueueState {
                queues,
                remaining_weight,
                scope_owner,
                metrics,
            }),
        }
    }

    /// Dispatch the next workload for `worker`, draining its own queue
    /// before stealing from the heaviest donor. Returns `None` when no work
    /// remains anywhere.
    pub fn next(&self, worker: usize, warmed_scopes: &HashSet<String>) -> Option<MutationWorkload> {
        let mut state = self.inner.lock().unwrap();
        if !state.queues[worker].is_empty() {
            let index = best_index(&state.queues[worker], |w| {
                let scope = w.scope_key();
                if warmed_scopes.contains(&scope) {
                    3
                } else if state.scope_owner.get(&scope) == Some(&worker) {
                    2
                } else {
                    1
                }
            });
            return Some(state.take(worker, index, false));
        }
        // Steal from the donor with the heaviest remaining weight; break
        // ties by queue length, then by the smaller index.
        let donor = (0..state.queues.len())
            .filter(|&i| !state.queues[i].is_empty())
            .max_by_key(|&i| {
                (
                    state.remaining_weight[i],
                    state.queues[i].len(),
                    std::cmp::Reverse(i),
                )
            })?;
        let index = best_index(&state.queues[donor], |w| {
            let scope = w.scope_key();
            let owner = state.scope_owner.get(&scope).copied();
            if warmed_scopes.contains(&scope) {
                5
            } else if owner == Some(worker) {
                4
            } else if owner != Some(donor) {
                3
            } else if state.queues[donor]
                .iter()
                .filter(|other| other.scope_key() == scope)
                .count()
                > 1
            {
                2
            } else {
                1
            }
        });
        trace!(thief = worker, donor, "steal");
        Some(state.take(donor, index, true))
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.inner.lock().unwrap().metrics
    }
}

impl QueueState {
    fn take(&mut self, from: usize, index: usize, stolen: bool) -> MutationWorkload {
        let workload = self.queues[from].remove(index);
        self.remaining_weight[from] -= workload.candidate_mutations;
        self.metrics.dispatched_workloads += 1;
        if stolen {
            self.metrics.stolen_workloads += 1;
        }
        self.metrics.remaining_workloads -= 1;
        self.metrics.remaining_weight -= workload.candidate_mutations;
        workload
    }
}

/// Index of the best workload: highest tier, then heaviest, then the
/// lexicographically first path.
fn best_index<F: Fn(&MutationWorkload) -> u8>(queue: &[MutationWorkload], tier: F) -> usize {
    queue
        .iter()
        .enumerate()
        .max_by_key(|(_, w)| {
            (
                tier(w),
                w.candidate_mutations,
                std::cmp::Reverse(w.source_file.clone()),
            )
        })
        .map(|(index, _)| index)
        .expect("queue is non-empty")
}
