//! Stable error kinds for the mutation engine.
//!
//! Most code propagates `anyhow::Error` with context attached; these variants
//! exist for the cases the driver needs to recognize, either to pick an exit
//! code or to fall back gracefully (coverage, scope resolution).

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source file not found: {0}")]
    SourceFileNotFound(Utf8PathBuf),

    #[error("no Package.swift found in {0} or any parent directory")]
    PackagePathNotFound(Utf8PathBuf),

    #[error("baseline tests failed in an unmutated tree")]
    BaselineTestsFailed,

    #[error("no tests were executed{}", filter_suffix(.0))]
    NoTestsExecuted(Option<String>),

    #[error("could not restore {0} from its backup")]
    BackupRestoreFailed(Utf8PathBuf),

    /// Recoverable: the caller keeps all sites when coverage can't be read.
    #[error("coverage data unavailable")]
    CoverageDataUnavailable,

    #[error("invalid source file {path}: {reason}")]
    InvalidSourceFile { path: Utf8PathBuf, reason: String },

    #[error("working tree at {0} has uncommitted changes")]
    WorkingTreeDirty(Utf8PathBuf),

    #[error("build error ratio {actual:.2} exceeded the limit {limit:.2}")]
    BuildErrorRatioExceeded { actual: f64, limit: f64 },

    #[error("I/O failure")]
    IoFailure(#[from] std::io::Error),
}

fn filter_suffix(filter: &Option<String>) -> String {
    match filter {
        Some(f) => format!(" for filter {f:?}"),
        None => String::new(),
    }
}
