//! Test-runner backends: build and test a Swift package, and interpret the
//! textual output into a coarse outcome.
//!
//! Two backends exist: the SwiftPM one (`swift test`), and an xcodebuild one
//! for projects that only build through Xcode. The orchestrator talks to them
//! through the [TestRunner] capability trait; backends that can compile
//! without testing additionally enable build-first mode.

use std::env;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;
use crate::process::{run_with_deadline, ExitKind, ProcessOutput};
use crate::timeouts::BASELINE_TIMEOUT;
use crate::Result;

/// Classification of one build-and-test invocation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TestOutcome {
    Passed,
    Failed,
    NoTests,
    Timeout,
    BuildError,
}

/// Optional abilities of a backend, detected by the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerCapabilities {
    /// The backend can compile without running tests, and run tests without
    /// rebuilding; required for build-first mode.
    pub build_first: bool,
}

/// External interface to a build-and-test backend.
pub trait TestRunner: Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities::default()
    }

    /// Build and run the tests matched by `filter`, within `timeout`.
    fn run_tests(
        &self,
        package: &Utf8Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<TestOutcome>;

    /// Compile only. Outcomes are limited to passed/buildError/timeout.
    fn run_build(&self, _package: &Utf8Path, _timeout: Duration) -> Result<TestOutcome> {
        Err(anyhow!("{} backend cannot build without testing", self.name()))
    }

    /// Run tests assuming the build is already up to date.
    fn run_tests_without_build(
        &self,
        package: &Utf8Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<TestOutcome> {
        self.run_tests(package, filter, timeout)
    }

    /// Run the unmutated suite with the fixed baseline ceiling; anything but
    /// a pass is an error.
    fn run_baseline(&self, package: &Utf8Path, filter: Option<&str>) -> Result<Duration> {
        let start = Instant::now();
        match self.run_tests(package, filter, BASELINE_TIMEOUT)? {
            TestOutcome::Passed => Ok(start.elapsed()),
            TestOutcome::NoTests => {
                Err(EngineError::NoTestsExecuted(filter.map(str::to_owned)).into())
            }
            outcome => {
                debug!(?outcome, "baseline did not pass");
                Err(EngineError::BaselineTestsFailed.into())
            }
        }
    }
}

/// Which backend to use, from the command line.
#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// `swift test` / `swift build` via SwiftPM.
    Swift,
    /// `xcodebuild` with build-for-testing / test-without-building.
    Xcode,
}

pub fn runner_for(kind: RunnerKind) -> Box<dyn TestRunner> {
    match kind {
        RunnerKind::Swift => Box::new(SwiftPackageRunner::new()),
        RunnerKind::Xcode => Box::new(XcodeRunner::new()),
    }
}

/// The SwiftPM backend.
pub struct SwiftPackageRunner {
    swift_bin: String,
}

impl SwiftPackageRunner {
    pub fn new() -> SwiftPackageRunner {
        // $SWIFT lets CI point at a specific toolchain.
        SwiftPackageRunner {
            swift_bin: env::var("SWIFT").unwrap_or_else(|_| "swift".to_owned()),
        }
    }

    fn test_argv(&self, package: &Utf8Path, filter: Option<&str>, skip_build: bool) -> Vec<String> {
        let mut argv = vec![
            self.swift_bin.clone(),
            "test".to_owned(),
            "--package-path".to_owned(),
            package.to_string(),
        ];
        if skip_build {
            argv.push("--skip-build".to_owned());
        }
        if let Some(filter) = filter {
            argv.push("--filter".to_owned());
            argv.push(filter.to_owned());
        }
        argv
    }

    fn build_argv(&self, package: &Utf8Path) -> Vec<String> {
        vec![
            self.swift_bin.clone(),
            "build".to_owned(),
            "--build-tests".to_owned(),
            "--package-path".to_owned(),
            package.to_string(),
        ]
    }
}

impl Default for SwiftPackageRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner for SwiftPackageRunner {
    fn name(&self) -> &'static str {
        "swift"
    }

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities { build_first: true }
    }

    fn run_tests(
        &self,
        package: &Utf8Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<TestOutcome> {
        let output = run_with_deadline(&self.test_argv(package, filter, false), package, timeout)?;
        debug!(duration = ?output.duration, "swift test finished");
        Ok(classify_swift_test(&output))
    }

    fn run_build(&self, package: &Utf8Path, timeout: Duration) -> Result<TestOutcome> {
        let output = run_with_deadline(&self.build_argv(package), package, timeout)?;
        Ok(classify_build(&output))
    }

    fn run_tests_without_build(
        &self,
        package: &Utf8Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<TestOutcome> {
        let output = run_with_deadline(&self.test_argv(package, filter, true), package, timeout)?;
        Ok(classify_swift_test(&output))
    }
}

/// The xcodebuild backend, for packages driven through an Xcode scheme.
pub struct XcodeRunner {
    scheme: Option<String>,
}

impl XcodeRunner {
    pub fn new() -> XcodeRunner {
        XcodeRunner {
            scheme: env::var("MUTATE4SWIFT_SCHEME").ok(),
        }
    }

    fn argv(&self, action: &str, filter: Option<&str>) -> Vec<String> {
        let mut argv = vec!["xcodebuild".to_owned(), action.to_owned()];
        if let Some(scheme) = &self.scheme {
            argv.push("-scheme".to_owned());
            argv.push(scheme.clone());
        }
        if let Some(filter) = filter {
            argv.push(format!("-only-testing:{filter}"));
        }
        argv
    }
}

impl Default for XcodeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner for XcodeRunner {
    fn name(&self) -> &'static str {
        "xcode"
    }

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities { build_first: true }
    }

    fn run_tests(
        &self,
        package: &Utf8Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<TestOutcome> {
        let output = run_with_deadline(&self.argv("test", filter), package, timeout)?;
        Ok(classify_xcodebuild(&output))
    }

    fn run_build(&self, package: &Utf8Path, timeout: Duration) -> Result<TestOutcome> {
        let output = run_with_deadline(&self.argv("build-for-testing", None), package, timeout)?;
        Ok(classify_build(&output))
    }

    fn run_tests_without_build(
        &self,
        package: &Utf8Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<TestOutcome> {
        let output =
            run_with_deadline(&self.argv("test-without-building", filter), package, timeout)?;
        Ok(classify_xcodebuild(&output))
    }
}

/// The largest "Executed N tests" count in the transcript; XCTest prints one
/// line per suite plus an overall total, so the maximum is the total.
fn executed_tests(text: &str) -> Option<u64> {
    static EXECUTED: OnceLock<Regex> = OnceLock::new();
    let re = EXECUTED.get_or_init(|| Regex::new(r"Executed (\d+) tests?").unwrap());
    re.captures_iter(text)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .max()
}

fn classify_swift_test(output: &ProcessOutput) -> TestOutcome {
    if output.kind == ExitKind::Timeout {
        return TestOutcome::Timeout;
    }
    let text = &output.output;
    let built = text.contains("Build complete!");
    if !built && text.contains("error:") {
        return TestOutcome::BuildError;
    }
    match output.kind {
        ExitKind::Success => match executed_tests(text) {
            Some(0) => TestOutcome::NoTests,
            _ => TestOutcome::Passed,
        },
        _ => TestOutcome::Failed,
    }
}

fn classify_build(output: &ProcessOutput) -> TestOutcome {
    match output.kind {
        ExitKind::Timeout => TestOutcome::Timeout,
        ExitKind::Success => TestOutcome::Passed,
        ExitKind::Failure => TestOutcome::BuildError,
    }
}

fn classify_xcodebuild(output: &ProcessOutput) -> TestOutcome {
    if output.kind == ExitKind::Timeout {
        return TestOutcome::Timeout;
    }
    let text = &output.output;
    if text.contains("** BUILD FAILED **") {
        return TestOutcome::BuildError;
    }
    if text.contains("** TEST SUCCEEDED **") && output.kind == ExitKind::Success {
        return match executed_tests(text) {
            Some(0) => TestOutcome::NoTests,
            _ => TestOutcome::Passed,
        };
    }
    TestOutcome::Failed
}
