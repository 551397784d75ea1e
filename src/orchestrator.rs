//! The single-file mutation loop: baseline, then one
//! backup/apply/test/classify/restore cycle per site.
//!
//! The loop owns its file exclusively through the custodian; every exit path,
//! including unwinds, leaves the file byte-identical to its pre-session
//! content with no backup behind (the custodian's drop guard covers paths the
//! explicit restores cannot).

use std::collections::BTreeSet;
use std::fs;

use anyhow::Context;
use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use crate::console::Console;
use crate::coverage::{covered_lines_or_unavailable, CoverageProvider};
use crate::custodian::FileCustodian;
use crate::interrupt::check_interrupted;
use crate::log_file::LogFile;
use crate::mutant::discard_identity_sites;
use crate::outcome::{MutationOutcome, MutationReport, MutationResult};
use crate::swift::{TestOutcome, TestRunner};
use crate::timeouts::BaselineResult;
use crate::visit::discover;
use crate::workspace::TOOL_DIR;
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Per-mutant timeout is the baseline duration times this, floored.
    pub timeout_multiplier: f64,
    /// How many extra attempts a timing-out mutant gets.
    pub timeout_retries: usize,
    /// How many leading mutants the build-first heuristic samples.
    pub build_first_sample_size: usize,
    /// Build-error ratio within the sample that triggers build-first mode.
    pub build_first_error_ratio: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            timeout_multiplier: 5.0,
            timeout_retries: 1,
            build_first_sample_size: 10,
            build_first_error_ratio: 0.5,
        }
    }
}

/// Everything needed to mutate one file.
pub struct MutationSession {
    /// Path of the file to mutate, inside the active workspace.
    pub source_path: Utf8PathBuf,
    /// Tree-relative name used in reports and messages.
    pub display_path: Utf8PathBuf,
    pub package_path: Utf8PathBuf,
    pub test_filter: Option<String>,
    /// Only mutate sites on these lines, when set.
    pub line_filter: Option<BTreeSet<u32>>,
    /// Reuse a baseline paid for earlier in this scope.
    pub baseline_override: Option<BaselineResult>,
    pub config: OrchestratorConfig,
}

pub fn run_mutation_session(
    session: &MutationSession,
    runner: &dyn TestRunner,
    coverage: Option<&dyn CoverageProvider>,
    console: &Console,
) -> Result<MutationReport> {
    let custodian = FileCustodian::new(session.source_path.clone());
    if custodian.restore_if_needed()? {
        warn!(
            path = %session.source_path,
            "found and restored a stale backup from an earlier crash"
        );
    }

    let mut log = LogFile::create_in(
        &session.package_path.join(TOOL_DIR).join("log"),
        session.display_path.as_str(),
    )?;
    debug!(log = %log.path(), "scenario log");

    let baseline = match session.baseline_override {
        Some(baseline) => baseline,
        None => {
            let duration =
                runner.run_baseline(&session.package_path, session.test_filter.as_deref())?;
            BaselineResult::new(duration, session.config.timeout_multiplier)
        }
    };
    log.message(&format!(
        "baseline {:.2}s; per-mutant timeout {:.0}s",
        baseline.duration.as_secs_f64(),
        baseline.timeout.as_secs_f64()
    ));

    let original = fs::read_to_string(&session.source_path)
        .with_context(|| format!("read source file {}", session.source_path))?;
    let mut sites = discard_identity_sites(discover(&original, session.display_path.as_str())?);
    if let Some(lines) = &session.line_filter {
        sites.retain(|s| lines.contains(&s.line));
    }
    if let Some(provider) = coverage {
        match covered_lines_or_unavailable(provider, &session.source_path, &session.package_path)
        {
            Ok(covered) => sites.retain(|s| covered.contains(&s.line)),
            Err(err) => warn!(%err, "testing all sites"),
        }
    }
    debug!(sites = sites.len(), file = %session.display_path, "mutating");

    let capabilities = runner.capabilities();
    let mut build_first = false; // monotonic latch
    let mut results = Vec::with_capacity(sites.len());
    for site in sites {
        check_interrupted()?;
        custodian.backup()?;
        let mutated = site.apply(&original);
        let outcome = if mutated == original {
            warn!(?site, "site does not change the file; skipping");
            MutationOutcome::Skipped
        } else {
            custodian.write_mutated(&mutated)?;
            log.message(&site.describe_change());
            let outcome =
                test_one_mutant(session, runner, build_first, &baseline, &mut log);
            log.message(&format!("outcome: {outcome:?}"));
            outcome
        };
        custodian.restore()?;
        console.mutant_tested(session.display_path.as_str(), &site, outcome);
        results.push(MutationResult { site, outcome });

        if !build_first
            && capabilities.build_first
            && results.len() <= session.config.build_first_sample_size
        {
            let build_errors = results
                .iter()
                .filter(|r| r.outcome == MutationOutcome::BuildError)
                .count();
            let limit = session.config.build_first_error_ratio
                * session.config.build_first_sample_size as f64;
            if build_errors as f64 > limit {
                info!(
                    build_errors,
                    sample = session.config.build_first_sample_size,
                    "many unviable mutants; switching to build-first mode"
                );
                build_first = true;
            }
        }
    }

    Ok(MutationReport {
        source_file: session.display_path.clone(),
        baseline_duration: baseline.duration,
        results,
    })
}

/// Run the backend for one applied mutant and classify the result.
///
/// Backend errors are contained here: a mutant whose test invocation fails
/// outright counts as a build error and the run continues.
fn test_one_mutant(
    session: &MutationSession,
    runner: &dyn TestRunner,
    build_first: bool,
    baseline: &BaselineResult,
    log: &mut LogFile,
) -> MutationOutcome {
    let timeout = baseline.timeout;
    let filter = session.test_filter.as_deref();
    let run = || -> Result<TestOutcome> {
        if build_first {
            match runner.run_build(&session.package_path, timeout)? {
                TestOutcome::Passed => {
                    runner.run_tests_without_build(&session.package_path, filter, timeout)
                }
                failed_build => Ok(failed_build),
            }
        } else {
            runner.run_tests(&session.package_path, filter, timeout)
        }
    };
    let mut attempts = 0;
    loop {
        let outcome = match run() {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(?err, "test runner failed for this mutant");
                log.message(&format!("runner error: {err:#}"));
                return MutationOutcome::BuildError;
            }
        };
        return match outcome {
            TestOutcome::Passed => MutationOutcome::Survived,
            TestOutcome::Failed => MutationOutcome::Killed,
            TestOutcome::BuildError => MutationOutcome::BuildError,
            TestOutcome::NoTests => MutationOutcome::Skipped,
            TestOutcome::Timeout => {
                if attempts < session.config.timeout_retries {
                    attempts += 1;
                    debug!(attempts, "mutant timed out; retrying with the same deadline");
                    continue;
                }
                MutationOutcome::Timeout
            }
        };
    }
}
