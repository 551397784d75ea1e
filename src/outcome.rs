//! Per-mutant outcomes and the per-file / repository reports built from them.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use crate::mutant::MutationSite;

/// What happened when one mutant was tested.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationOutcome {
    /// Tests failed under the mutant: the suite caught it.
    Killed,
    /// Tests still passed: a weakness in the suite.
    Survived,
    /// Tests ran past the derived deadline, even after retries. Counted as a
    /// kill, since an infinite loop is certainly a behavior change.
    Timeout,
    /// The mutated source did not compile; excluded from the kill rate.
    BuildError,
    /// The backend executed no tests for this mutant; neither killed nor
    /// surviving.
    Skipped,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    pub site: MutationSite,
    pub outcome: MutationOutcome,
}

/// All results for one source file, plus the baseline cost of its scope.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationReport {
    pub source_file: Utf8PathBuf,
    pub baseline_duration: Duration,
    pub results: Vec<MutationResult>,
}

impl MutationReport {
    fn count(&self, outcome: MutationOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn killed(&self) -> usize {
        self.count(MutationOutcome::Killed)
    }

    pub fn survived(&self) -> usize {
        self.count(MutationOutcome::Survived)
    }

    pub fn timed_out(&self) -> usize {
        self.count(MutationOutcome::Timeout)
    }

    pub fn build_errors(&self) -> usize {
        self.count(MutationOutcome::BuildError)
    }

    pub fn skipped(&self) -> usize {
        self.count(MutationOutcome::Skipped)
    }

    pub fn total_mutations(&self) -> usize {
        self.results.len()
    }

    /// Percentage of decided mutants that were caught. Timeouts count as
    /// kills; build errors and skips never enter the denominator. An empty
    /// denominator reads as 100: nothing detectable was missed.
    pub fn kill_percentage(&self) -> f64 {
        kill_percentage(self.killed(), self.timed_out(), self.survived())
    }
}

impl Serialize for MutationReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ss = serializer.serialize_struct("MutationReport", 10)?;
        ss.serialize_field("sourceFile", &self.source_file)?;
        ss.serialize_field("baselineDuration", &self.baseline_duration.as_secs_f64())?;
        ss.serialize_field("results", &self.results)?;
        ss.serialize_field("killed", &self.killed())?;
        ss.serialize_field("survived", &self.survived())?;
        ss.serialize_field("timedOut", &self.timed_out())?;
        ss.serialize_field("buildErrors", &self.build_errors())?;
        ss.serialize_field("skipped", &self.skipped())?;
        ss.serialize_field("totalMutations", &self.total_mutations())?;
        ss.serialize_field("killPercentage", &self.kill_percentage())?;
        ss.end()
    }
}

/// Aggregated results across every analyzed file in a package.
#[derive(Clone, Debug, PartialEq)]
pub struct RepositoryReport {
    pub package_path: Utf8PathBuf,
    pub file_reports: Vec<MutationReport>,
}

impl RepositoryReport {
    pub fn files_analyzed(&self) -> usize {
        self.file_reports.len()
    }

    pub fn files_with_survivors(&self) -> usize {
        self.file_reports.iter().filter(|r| r.survived() > 0).count()
    }

    pub fn killed(&self) -> usize {
        self.file_reports.iter().map(MutationReport::killed).sum()
    }

    pub fn survived(&self) -> usize {
        self.file_reports.iter().map(MutationReport::survived).sum()
    }

    pub fn timed_out(&self) -> usize {
        self.file_reports.iter().map(MutationReport::timed_out).sum()
    }

    pub fn build_errors(&self) -> usize {
        self.file_reports
            .iter()
            .map(MutationReport::build_errors)
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.file_reports.iter().map(MutationReport::skipped).sum()
    }

    pub fn total_mutations(&self) -> usize {
        self.file_reports
            .iter()
            .map(MutationReport::total_mutations)
            .sum()
    }

    pub fn kill_percentage(&self) -> f64 {
        kill_percentage(self.killed(), self.timed_out(), self.survived())
    }

    /// Ratio of build errors to all mutants, for the budget safeguard.
    pub fn build_error_ratio(&self) -> f64 {
        let total = self.total_mutations();
        if total == 0 {
            0.0
        } else {
            self.build_errors() as f64 / total as f64
        }
    }
}

impl Serialize for RepositoryReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ss = serializer.serialize_struct("RepositoryReport", 11)?;
        ss.serialize_field("packagePath", &self.package_path)?;
        ss.serialize_field("fileReports", &self.file_reports)?;
        ss.serialize_field("filesAnalyzed", &self.files_analyzed())?;
        ss.serialize_field("filesWithSurvivors", &self.files_with_survivors())?;
        ss.serialize_field("killed", &self.killed())?;
        ss.serialize_field("survived", &self.survived())?;
        ss.serialize_field("timedOut", &self.timed_out())?;
        ss.serialize_field("buildErrors", &self.build_errors())?;
        ss.serialize_field("skipped", &self.skipped())?;
        ss.serialize_field("totalMutations", &self.total_mutations())?;
        ss.serialize_field("killPercentage", &self.kill_percentage())?;
        ss.end()
    }
}

fn kill_percentage(killed: usize, timed_out: usize, survived: usize) -> f64 {
    let caught = killed + timed_out;
    let denominator = caught + survived;
    if denominator == 0 {
        100.0
    } else {
        caught as f64 / denominator as f64 * 100.0
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::mutant::MutationOperator;

    use super::*;

    fn site(line: u32) -> MutationSite {
        MutationSite {
            operator: MutationOperator::Arithmetic,
            line,
            column: 1,
            byte_offset: 0,
            byte_length: 1,
            original: "+".into(),
            mutated: "-".into(),
        }
    }

    fn report(outcomes: &[MutationOutcome]) -> MutationReport {
        MutationReport {
            source_file: "Sources/App/Math.swift".into(),
            baseline_duration: Duration::from_secs_f64(1.5),
            results: outcomes
                .iter()
                .enumerate()
                .map(|(i, &outcome)| MutationResult {
                    site: site(i as u32 + 1),
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn counts_partition_the_total() {
        use MutationOutcome::*;
        let r = report(&[Killed, Killed, Survived, Timeout, BuildError, Skipped]);
        assert_eq!(r.killed(), 2);
        assert_eq!(r.survived(), 1);
        assert_eq!(r.timed_out(), 1);
        assert_eq!(r.build_errors(), 1);
        assert_eq!(r.skipped(), 1);
        assert_eq!(
            r.killed() + r.survived() + r.timed_out() + r.build_errors() + r.skipped(),
            r.total_mutations()
        );
    }

    #[test]
    fn kill_percentage_counts_timeouts_and_excludes_build_errors() {
        use MutationOutcome::*;
        let r = report(&[Killed, Timeout, Survived, BuildError, Skipped]);
        // (1 killed + 1 timeout) / (2 + 1 survived)
        assert!((r.kill_percentage() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_denominator_reads_as_one_hundred() {
        use MutationOutcome::*;
        assert_eq!(report(&[]).kill_percentage(), 100.0);
        assert_eq!(report(&[BuildError, Skipped]).kill_percentage(), 100.0);
    }

    #[test]
    fn report_serializes_with_normative_keys() {
        use MutationOutcome::*;
        let r = report(&[Killed, Survived]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["sourceFile"], "Sources/App/Math.swift");
        assert_eq!(json["baselineDuration"], 1.5);
        assert_eq!(json["killed"], 1);
        assert_eq!(json["survived"], 1);
        assert_eq!(json["timedOut"], 0);
        assert_eq!(json["buildErrors"], 0);
        assert_eq!(json["skipped"], 0);
        assert_eq!(json["totalMutations"], 2);
        assert_eq!(json["killPercentage"], 50.0);
        assert_eq!(json["results"][0]["outcome"], "killed");
        assert_eq!(json["results"][0]["site"]["mutationOperator"], "arithmetic");
    }

    #[test]
    fn decoded_report_re_derives_identical_counts() {
        use MutationOutcome::*;
        let r = report(&[Killed, Killed, Survived, Timeout]);
        let json = serde_json::to_value(&r).unwrap();
        // Re-derive the counts from the decoded results and compare with the
        // serialized derived fields.
        let results: Vec<MutationResult> =
            serde_json::from_value(json["results"].clone()).unwrap();
        let rebuilt = MutationReport {
            source_file: r.source_file.clone(),
            baseline_duration: r.baseline_duration,
            results,
        };
        assert_eq!(rebuilt, r);
        assert_eq!(json["killed"], rebuilt.killed() as u64);
        assert_eq!(json["killPercentage"], rebuilt.kill_percentage());
    }

    #[test]
    fn repository_report_aggregates_and_counts_survivor_files() {
        use MutationOutcome::*;
        let repo = RepositoryReport {
            package_path: "/tmp/pkg".into(),
            file_reports: vec![
                report(&[Killed, Killed]),
                report(&[Survived, Killed]),
                report(&[BuildError]),
            ],
        };
        assert_eq!(repo.files_analyzed(), 3);
        assert_eq!(repo.files_with_survivors(), 1);
        assert_eq!(repo.total_mutations(), 5);
        assert_eq!(repo.killed(), 3);
        assert_eq!(repo.build_errors(), 1);
        assert!((repo.build_error_ratio() - 0.2).abs() < 1e-9);
        let json = serde_json::to_value(&repo).unwrap();
        assert_eq!(json["packagePath"], "/tmp/pkg");
        assert_eq!(json["filesAnalyzed"], 3);
        assert_eq!(json["filesWithSurvivors"], 1);
        assert_eq!(json["fileReports"].as_array().unwrap().len(), 3);
    }
}
