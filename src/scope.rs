//! Map a source file to the narrowest test-filter pattern that still
//! exercises it, via the semantic index.
//!
//! Resolution is cached per package: the index is opened at most once, the
//! "store missing" and "store stale" builds each happen at most once, and
//! each (package, source) filter is computed once. A single lock per package
//! serializes index realization and filter computation, so concurrent
//! workers asking about the same package do not race builds.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use tracing::{debug, info};

use crate::index::{IndexStoreDb, SemanticIndex};
use crate::process::{run_with_deadline, ExitKind};
use crate::workspace::{find_package_root, TOOL_DIR};
use crate::Result;

/// Builds triggered to (re)generate the index store get this long.
const INDEX_BUILD_TIMEOUT: Duration = Duration::from_secs(600);

type IndexOpener =
    dyn Fn(&Utf8Path, &Utf8Path) -> Result<Arc<dyn SemanticIndex>> + Send + Sync;
type BuildTrigger = dyn Fn(&Utf8Path) -> Result<()> + Send + Sync;

pub struct ScopeResolver {
    opener: Box<IndexOpener>,
    build: Box<BuildTrigger>,
    packages: Mutex<HashMap<Utf8PathBuf, Arc<PackageScope>>>,
}

struct PackageScope {
    root: Utf8PathBuf,
    inner: Mutex<PackageScopeInner>,
}

#[derive(Default)]
struct PackageScopeInner {
    index: Option<Arc<dyn SemanticIndex>>,
    build_attempted: bool,
    refresh_attempted: bool,
    filters: HashMap<Utf8PathBuf, Option<String>>,
}

impl ScopeResolver {
    /// The production resolver: open stores through `libIndexStore`, and
    /// regenerate them with `swift build`.
    pub fn production() -> ScopeResolver {
        ScopeResolver::with_backends(
            |store, db| Ok(Arc::new(IndexStoreDb::open(store, db)?) as Arc<dyn SemanticIndex>),
            |root| {
                info!(%root, "building package to refresh the semantic index");
                let swift = std::env::var("SWIFT").unwrap_or_else(|_| "swift".to_owned());
                let argv = vec![
                    swift,
                    "build".to_owned(),
                    "--build-tests".to_owned(),
                    "--package-path".to_owned(),
                    root.to_string(),
                ];
                let output = run_with_deadline(&argv, root, INDEX_BUILD_TIMEOUT)?;
                if output.kind != ExitKind::Success {
                    bail!("index build in {root} failed");
                }
                Ok(())
            },
        )
    }

    pub fn with_backends(
        opener: impl Fn(&Utf8Path, &Utf8Path) -> Result<Arc<dyn SemanticIndex>>
            + Send
            + Sync
            + 'static,
        build: impl Fn(&Utf8Path) -> Result<()> + Send + Sync + 'static,
    ) -> ScopeResolver {
        ScopeResolver {
            opener: Box::new(opener),
            build: Box::new(build),
            packages: Mutex::new(HashMap::new()),
        }
    }

    /// The narrowest test-filter pattern that still exercises `source`, or
    /// `None` meaning "run the entire suite".
    pub fn resolve(&self, source: &Utf8Path) -> Result<Option<String>> {
        let root = find_package_root(source)?;
        let package = {
            let mut packages = self.packages.lock().unwrap();
            Arc::clone(packages.entry(root.clone()).or_insert_with(|| {
                Arc::new(PackageScope {
                    root,
                    inner: Mutex::new(PackageScopeInner::default()),
                })
            }))
        };
        package.filter_for(source, &*self.opener, &*self.build)
    }
}

impl PackageScope {
    fn filter_for(
        &self,
        source: &Utf8Path,
        opener: &IndexOpener,
        build: &BuildTrigger,
    ) -> Result<Option<String>> {
        let source = source
            .canonicalize_utf8()
            .unwrap_or_else(|_| source.to_owned());
        let mut inner = self.inner.lock().unwrap();
        if let Some(cached) = inner.filters.get(&source) {
            return Ok(cached.clone());
        }
        let mut index = self.realized_index(&mut inner, opener, build)?;
        if !inner.refresh_attempted && self.index_is_stale(&source, &*index)? {
            inner.refresh_attempted = true;
            info!(%source, "index is older than the source; refreshing once");
            build(&self.root)?;
            inner.index = None;
            index = self.realized_index(&mut inner, opener, build)?;
        }
        let filter = compute_filter(&*index, &source)?;
        debug!(%source, ?filter, "resolved test scope");
        inner.filters.insert(source, filter.clone());
        Ok(filter)
    }

    fn realized_index(
        &self,
        inner: &mut PackageScopeInner,
        opener: &IndexOpener,
        build: &BuildTrigger,
    ) -> Result<Arc<dyn SemanticIndex>> {
        if let Some(index) = &inner.index {
            return Ok(Arc::clone(index));
        }
        let store = match find_index_store(&self.root) {
            Some(store) => store,
            None if !inner.build_attempted => {
                inner.build_attempted = true;
                info!(root = %self.root, "no index store found; building once");
                build(&self.root)?;
                find_index_store(&self.root).ok_or_else(|| {
                    anyhow!("no index store under {}/.build even after building", self.root)
                })?
            }
            None => bail!("no index store under {}/.build", self.root),
        };
        let database = self.root.join(TOOL_DIR).join("indexdb");
        let index = opener(&store, &database)?;
        inner.index = Some(Arc::clone(&index));
        Ok(index)
    }

    fn index_is_stale(&self, source: &Utf8Path, index: &dyn SemanticIndex) -> Result<bool> {
        let source_mtime = fs::metadata(source).and_then(|m| m.modified()).ok();
        let unit_time = index.latest_unit_time(source)?;
        Ok(match (source_mtime, unit_time) {
            (Some(source_mtime), Some(unit_time)) => source_mtime > unit_time,
            (Some(_), None) => true, // never indexed
            (None, _) => false,
        })
    }
}

/// Find the compiler's index store under the package's build directory.
///
/// SwiftPM lays the store out as `.build/<config-or-triple>/index/store`,
/// with one extra level for explicit triples. Candidates are checked in
/// sorted order so the choice is deterministic.
fn find_index_store(root: &Utf8Path) -> Option<Utf8PathBuf> {
    let build_dir = root.join(".build");
    let mut candidates = vec![build_dir.join("index/store")];
    if let Ok(entries) = fs::read_dir(&build_dir) {
        let mut children: Vec<Utf8PathBuf> = entries
            .flatten()
            .filter_map(|e| Utf8PathBuf::try_from(e.path()).ok())
            .collect();
        children.sort();
        for child in children {
            candidates.push(child.join("index/store"));
            if let Ok(grandchildren) = fs::read_dir(&child) {
                let mut nested: Vec<Utf8PathBuf> = grandchildren
                    .flatten()
                    .filter_map(|e| Utf8PathBuf::try_from(e.path()).ok())
                    .map(|p| p.join("index/store"))
                    .collect();
                nested.sort();
                candidates.extend(nested);
            }
        }
    }
    candidates.into_iter().find(|c| c.is_dir())
}

fn compute_filter(index: &dyn SemanticIndex, source: &Utf8Path) -> Result<Option<String>> {
    let mut files = index.test_files_referencing(source)?;
    if files.is_empty() {
        // Fall back to the symbol-reference sweep: anything that references
        // a symbol defined in this file.
        for usr in index.symbols_defined_in(source)? {
            files.extend(index.files_referencing(&usr)?);
        }
    }
    let targets: BTreeSet<String> = files.iter().filter_map(|f| test_target_of(f)).collect();
    Ok(filter_pattern(&targets))
}

/// The test target owning a file, from its `Tests/<Target>/...` path.
pub fn test_target_of(path: &Utf8Path) -> Option<String> {
    let mut components = path.components().map(|c| c.as_str());
    while let Some(component) = components.next() {
        if component == "Tests" {
            return components.next().map(str::to_owned);
        }
    }
    None
}

/// One target gives its bare name; several give an anchored alternation over
/// the escaped names, sorted lexicographically.
pub fn filter_pattern(targets: &BTreeSet<String>) -> Option<String> {
    match targets.len() {
        0 => None,
        1 => targets.iter().next().cloned(),
        _ => Some(format!(
            "^({})\\.",
            targets.iter().map(|t| regex::escape(t)).join("|")
        )),
    }
}

#[cfg(test)]
mod test {
    use std::fs::{create_dir_all, write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct FakeIndex {
        unit_time: Option<SystemTime>,
        test_files: Vec<Utf8PathBuf>,
        defined: Vec<String>,
        references: HashMap<String, Vec<Utf8PathBuf>>,
        queries: AtomicUsize,
    }

    impl SemanticIndex for FakeIndex {
        fn latest_unit_time(&self, _source: &Utf8Path) -> Result<Option<SystemTime>> {
            Ok(self.unit_time)
        }

        fn test_files_referencing(&self, _source: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.test_files.clone())
        }

        fn symbols_defined_in(&self, _source: &Utf8Path) -> Result<Vec<String>> {
            Ok(self.defined.clone())
        }

        fn files_referencing(&self, usr: &str) -> Result<Vec<Utf8PathBuf>> {
            Ok(self.references.get(usr).cloned().unwrap_or_default())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        source: Utf8PathBuf,
    }

    fn fixture(with_store: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        write(root.join("Package.swift"), "// swift-tools-version:5.9\n").unwrap();
        let source = root.join("Sources/App/Thing.swift");
        create_dir_all(source.parent().unwrap()).unwrap();
        write(&source, "func thing() {}\n").unwrap();
        if with_store {
            create_dir_all(root.join(".build/debug/index/store")).unwrap();
        }
        Fixture {
            _dir: dir,
            root,
            source,
        }
    }

    fn fresh(index: FakeIndex) -> FakeIndex {
        FakeIndex {
            // Far future: never considered stale by these tests.
            unit_time: Some(SystemTime::now() + Duration::from_secs(1_000_000)),
            ..index
        }
    }

    fn resolver_with(index: Arc<FakeIndex>, opens: Arc<AtomicUsize>) -> ScopeResolver {
        ScopeResolver::with_backends(
            move |_store, _db| {
                opens.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::clone(&index) as Arc<dyn SemanticIndex>)
            },
            |_root| panic!("no build should be triggered"),
        )
    }

    #[test]
    fn single_target_gives_bare_name() {
        let fx = fixture(true);
        let index = Arc::new(fresh(FakeIndex {
            test_files: vec![fx.root.join("Tests/AppTests/ThingTests.swift")],
            ..FakeIndex::default()
        }));
        let resolver = resolver_with(index, Arc::new(AtomicUsize::new(0)));
        assert_eq!(
            resolver.resolve(&fx.source).unwrap(),
            Some("AppTests".to_owned())
        );
    }

    #[test]
    fn multiple_targets_give_sorted_escaped_alternation() {
        let fx = fixture(true);
        let index = Arc::new(fresh(FakeIndex {
            test_files: vec![
                fx.root.join("Tests/CoreTests/A.swift"),
                fx.root.join("Tests/AppTests/B.swift"),
            ],
            ..FakeIndex::default()
        }));
        let resolver = resolver_with(index, Arc::new(AtomicUsize::new(0)));
        assert_eq!(
            resolver.resolve(&fx.source).unwrap(),
            Some("^(AppTests|CoreTests)\\.".to_owned())
        );
    }

    #[test]
    fn empty_query_falls_back_to_symbol_sweep() {
        let fx = fixture(true);
        let index = Arc::new(fresh(FakeIndex {
            defined: vec!["s:4App5thingyyF".to_owned()],
            references: HashMap::from([(
                "s:4App5thingyyF".to_owned(),
                vec![fx.root.join("Tests/AppTests/SweepTests.swift")],
            )]),
            ..FakeIndex::default()
        }));
        let resolver = resolver_with(index, Arc::new(AtomicUsize::new(0)));
        assert_eq!(
            resolver.resolve(&fx.source).unwrap(),
            Some("AppTests".to_owned())
        );
    }

    #[test]
    fn no_referencing_tests_means_whole_suite() {
        let fx = fixture(true);
        let index = Arc::new(fresh(FakeIndex::default()));
        let resolver = resolver_with(index, Arc::new(AtomicUsize::new(0)));
        assert_eq!(resolver.resolve(&fx.source).unwrap(), None);
    }

    #[test]
    fn missing_store_triggers_exactly_one_build() {
        let fx = fixture(false);
        let index = Arc::new(fresh(FakeIndex {
            test_files: vec![fx.root.join("Tests/AppTests/T.swift")],
            ..FakeIndex::default()
        }));
        let builds = Arc::new(AtomicUsize::new(0));
        let build_root = fx.root.clone();
        let builds_in_closure = Arc::clone(&builds);
        let resolver = ScopeResolver::with_backends(
            move |_store, _db| Ok(Arc::clone(&index) as Arc<dyn SemanticIndex>),
            move |_root| {
                builds_in_closure.fetch_add(1, Ordering::SeqCst);
                create_dir_all(build_root.join(".build/debug/index/store")).unwrap();
                Ok(())
            },
        );
        assert_eq!(
            resolver.resolve(&fx.source).unwrap(),
            Some("AppTests".to_owned())
        );
        // A second resolution reuses the realized index; no more builds.
        assert_eq!(resolver.resolve(&fx.source).unwrap(), Some("AppTests".to_owned()));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn store_still_missing_after_build_is_an_error_and_not_retried() {
        let fx = fixture(false);
        let builds = Arc::new(AtomicUsize::new(0));
        let builds_in_closure = Arc::clone(&builds);
        let resolver = ScopeResolver::with_backends(
            |_store, _db| panic!("no store, nothing to open"),
            move |_root| {
                builds_in_closure.fetch_add(1, Ordering::SeqCst);
                Ok(()) // builds, but produces no store
            },
        );
        assert!(resolver.resolve(&fx.source).is_err());
        assert!(resolver.resolve(&fx.source).is_err());
        assert_eq!(builds.load(Ordering::SeqCst), 1, "build attempt is bounded");
    }

    #[test]
    fn stale_index_refreshes_once_and_reopens() {
        let fx = fixture(true);
        // Unit time in the distant past: definitely older than the source.
        let index = Arc::new(FakeIndex {
            unit_time: Some(SystemTime::UNIX_EPOCH),
            test_files: vec![fx.root.join("Tests/AppTests/T.swift")],
            ..FakeIndex::default()
        });
        let opens = Arc::new(AtomicUsize::new(0));
        let builds = Arc::new(AtomicUsize::new(0));
        let opens_in_closure = Arc::clone(&opens);
        let builds_in_closure = Arc::clone(&builds);
        let resolver = ScopeResolver::with_backends(
            move |_store, _db| {
                opens_in_closure.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::clone(&index) as Arc<dyn SemanticIndex>)
            },
            move |_root| {
                builds_in_closure.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        assert_eq!(resolver.resolve(&fx.source).unwrap(), Some("AppTests".to_owned()));
        assert_eq!(builds.load(Ordering::SeqCst), 1, "one refresh build");
        assert_eq!(opens.load(Ordering::SeqCst), 2, "reopened after refresh");
        // Still stale by mtime, but the refresh is bounded to one attempt.
        let other = fx.root.join("Sources/App/Other.swift");
        write(&other, "func other() {}\n").unwrap();
        resolver.resolve(&other).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn per_source_filters_are_computed_once() {
        let fx = fixture(true);
        let index = Arc::new(fresh(FakeIndex {
            test_files: vec![fx.root.join("Tests/AppTests/T.swift")],
            ..FakeIndex::default()
        }));
        let index_for_queries = Arc::clone(&index);
        let resolver = resolver_with(index, Arc::new(AtomicUsize::new(0)));
        resolver.resolve(&fx.source).unwrap();
        resolver.resolve(&fx.source).unwrap();
        assert_eq!(index_for_queries.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn target_extraction_and_pattern_shapes() {
        assert_eq!(
            test_target_of(Utf8Path::new("/pkg/Tests/AppTests/Case.swift")),
            Some("AppTests".to_owned())
        );
        assert_eq!(test_target_of(Utf8Path::new("/pkg/Sources/App/A.swift")), None);

        assert_eq!(filter_pattern(&BTreeSet::new()), None);
        let one: BTreeSet<String> = ["AppTests".to_owned()].into();
        assert_eq!(filter_pattern(&one), Some("AppTests".to_owned()));
        let several: BTreeSet<String> =
            ["CoreTests".to_owned(), "App+Tests".to_owned()].into();
        assert_eq!(
            filter_pattern(&several),
            Some("^(App\\+Tests|CoreTests)\\.".to_owned())
        );
    }
}
