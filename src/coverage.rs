//! Optional line-coverage capability.
//!
//! Coverage narrows discovery to mutants on executed lines. Parsing coverage
//! data is a collaborator concern; the engine only consumes this trait, and
//! treats every error from it as "coverage unavailable, keep all sites".

use std::collections::BTreeSet;

use camino::Utf8Path;
use tracing::debug;

use crate::error::EngineError;
use crate::Result;

pub trait CoverageProvider: Sync {
    /// The set of 1-based lines of `source` executed by the package's tests.
    ///
    /// Errors are recoverable by the caller and must not abort a run.
    fn covered_lines(&self, source: &Utf8Path, package: &Utf8Path) -> Result<BTreeSet<u32>>;
}

/// Query a provider, normalizing any failure to the stable
/// "coverage unavailable" kind so callers can fall back uniformly.
pub fn covered_lines_or_unavailable(
    provider: &dyn CoverageProvider,
    source: &Utf8Path,
    package: &Utf8Path,
) -> Result<BTreeSet<u32>> {
    provider.covered_lines(source, package).map_err(|err| {
        debug!(?err, %source, "coverage provider failed");
        EngineError::CoverageDataUnavailable.into()
    })
}
