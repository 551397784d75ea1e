//! Access to the compiler-produced semantic index store.
//!
//! The scope resolver asks a small set of questions; they are expressed as
//! the [SemanticIndex] trait so tests can answer them from fixtures. The
//! production implementation loads `libIndexStore` (shipped with every Swift
//! toolchain) at runtime and walks the store's units and records through its
//! C interface. No Swift toolchain is needed at build time.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CString};
use std::fs;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context};
use camino::{Utf8Path, Utf8PathBuf};
use libloading::{Library, Symbol};
use serde::Serialize;
use tracing::{debug, warn};

use crate::Result;

/// The questions the scope resolver asks of the index.
pub trait SemanticIndex: Send + Sync {
    /// Modification time of the newest indexed unit whose main file is
    /// `source`, or `None` when the file has never been indexed.
    fn latest_unit_time(&self, source: &Utf8Path) -> Result<Option<SystemTime>>;

    /// Main files of test units that depend, transitively, on the unit(s)
    /// built from `source`.
    fn test_files_referencing(&self, source: &Utf8Path) -> Result<Vec<Utf8PathBuf>>;

    /// USRs of symbols defined in `source`.
    fn symbols_defined_in(&self, source: &Utf8Path) -> Result<Vec<String>>;

    /// Files containing reference occurrences of the given symbol.
    fn files_referencing(&self, usr: &str) -> Result<Vec<Utf8PathBuf>>;
}

// indexstore.h constants, stable across toolchains.
const SYMBOL_ROLE_DEFINITION: u64 = 1 << 1;
const SYMBOL_ROLE_REFERENCE: u64 = 1 << 2;
const DEPENDENCY_KIND_UNIT: c_int = 1;
const DEPENDENCY_KIND_RECORD: c_int = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct StringRef {
    data: *const c_char,
    length: usize,
}

impl StringRef {
    fn to_string_lossy(self) -> String {
        if self.data.is_null() || self.length == 0 {
            return String::new();
        }
        let bytes =
            unsafe { std::slice::from_raw_parts(self.data as *const u8, self.length) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

type StoreHandle = *mut c_void;
type ErrorHandle = *mut c_void;
type UnitReaderHandle = *mut c_void;
type RecordReaderHandle = *mut c_void;
type DependencyHandle = *mut c_void;
type OccurrenceHandle = *mut c_void;
type SymbolHandle = *mut c_void;

/// One unit in the store: the object produced from one main source file.
#[derive(Debug, Clone, Serialize)]
struct UnitInfo {
    name: String,
    main_file: Utf8PathBuf,
    modification_time: SystemTime,
    /// Names of units this one depends on.
    unit_dependencies: Vec<String>,
    /// Record name and source path of each file-level record.
    records: Vec<(String, Utf8PathBuf)>,
}

/// Production index backed by the on-disk store, via `libIndexStore`.
pub struct IndexStoreDb {
    library: Library,
    store: StoreHandle,
    units: Vec<UnitInfo>,
    by_main_file: HashMap<Utf8PathBuf, Vec<usize>>,
}

// The store handle is only used behind &self and libIndexStore documents the
// read API as thread-safe.
unsafe impl Send for IndexStoreDb {}
unsafe impl Sync for IndexStoreDb {}

impl IndexStoreDb {
    /// Open the store at `store_path` against a local database directory,
    /// created on demand. A snapshot of the unit graph is taken eagerly so
    /// later queries are pure lookups.
    pub fn open(store_path: &Utf8Path, database_path: &Utf8Path) -> Result<IndexStoreDb> {
        fs::create_dir_all(database_path)
            .with_context(|| format!("create index database directory {database_path}"))?;
        let library = load_libindexstore()?;
        let c_path = CString::new(store_path.as_str()).context("store path contains NUL")?;
        let store = unsafe {
            let create: Symbol<
                unsafe extern "C" fn(*const c_char, *mut ErrorHandle) -> StoreHandle,
            > = library
                .get(b"indexstore_store_create\0")
                .context("resolve indexstore_store_create")?;
            let mut error: ErrorHandle = std::ptr::null_mut();
            let store = create(c_path.as_ptr(), &mut error);
            if store.is_null() {
                return Err(describe_error(&library, error)
                    .context(format!("open index store {store_path}")));
            }
            store
        };
        let mut db = IndexStoreDb {
            library,
            store,
            units: Vec::new(),
            by_main_file: HashMap::new(),
        };
        db.snapshot_units()?;
        let mut by_main_file: HashMap<Utf8PathBuf, Vec<usize>> = HashMap::new();
        for (i, unit) in db.units.iter().enumerate() {
            by_main_file
                .entry(unit.main_file.clone())
                .or_default()
                .push(i);
        }
        db.by_main_file = by_main_file;
        // Materialize the snapshot for inspection; best-effort only.
        if let Ok(json) = serde_json::to_string_pretty(&db.units) {
            let _ = fs::write(database_path.join("units.json"), json);
        }
        debug!(units = db.units.len(), %store_path, "opened index store");
        Ok(db)
    }

    fn snapshot_units(&mut self) -> Result<()> {
        let names = self.unit_names()?;
        for name in names {
            match self.read_unit(&name) {
                Ok(unit) => self.units.push(unit),
                Err(err) => warn!(unit = %name, ?err, "skipping unreadable index unit"),
            }
        }
        Ok(())
    }

    fn unit_names(&self) -> Result<Vec<String>> {
        unsafe extern "C" fn collect(ctx: *mut c_void, name: StringRef) -> bool {
            let names = unsafe { &mut *(ctx as *mut Vec<String>) };
            names.push(name.to_string_lossy());
            true
        }
        let mut names: Vec<String> = Vec::new();
        unsafe {
            let apply: Symbol<
                unsafe extern "C" fn(
                    StoreHandle,
                    *mut c_void,
                    unsafe extern "C" fn(*mut c_void, StringRef) -> bool,
                ) -> bool,
            > = self
                .library
                .get(b"indexstore_store_units_sorted_by_output_name_f\0")
                .context("resolve unit enumeration entry point")?;
            apply(self.store, &mut names as *mut _ as *mut c_void, collect);
        }
        names.sort();
        Ok(names)
    }

    fn read_unit(&self, name: &str) -> Result<UnitInfo> {
        struct DepCollector<'l> {
            library: &'l Library,
            unit_dependencies: Vec<String>,
            records: Vec<(String, Utf8PathBuf)>,
        }
        unsafe extern "C" fn on_dependency(ctx: *mut c_void, dep: DependencyHandle) -> bool {
            let collector = unsafe { &mut *(ctx as *mut DepCollector) };
            let kind = unsafe {
                match collector
                    .library
                    .get::<unsafe extern "C" fn(DependencyHandle) -> c_int>(
                        b"indexstore_unit_dependency_get_kind\0",
                    ) {
                    Ok(f) => f(dep),
                    Err(_) => return false,
                }
            };
            let name = unsafe {
                match collector
                    .library
                    .get::<unsafe extern "C" fn(DependencyHandle) -> StringRef>(
                        b"indexstore_unit_dependency_get_name\0",
                    ) {
                    Ok(f) => f(dep).to_string_lossy(),
                    Err(_) => return false,
                }
            };
            if kind == DEPENDENCY_KIND_UNIT {
                collector.unit_dependencies.push(name);
            } else if kind == DEPENDENCY_KIND_RECORD {
                let path = unsafe {
                    match collector
                        .library
                        .get::<unsafe extern "C" fn(DependencyHandle) -> StringRef>(
                            b"indexstore_unit_dependency_get_filepath\0",
                        ) {
                        Ok(f) => f(dep).to_string_lossy(),
                        Err(_) => return false,
                    }
                };
                collector.records.push((name, Utf8PathBuf::from(path)));
            }
            true
        }

        let c_name = CString::new(name).context("unit name contains NUL")?;
        unsafe {
            let create: Symbol<
                unsafe extern "C" fn(
                    StoreHandle,
                    *const c_char,
                    *mut ErrorHandle,
                ) -> UnitReaderHandle,
            > = self
                .library
                .get(b"indexstore_unit_reader_create\0")
                .context("resolve indexstore_unit_reader_create")?;
            let mut error: ErrorHandle = std::ptr::null_mut();
            let reader = create(self.store, c_name.as_ptr(), &mut error);
            if reader.is_null() {
                return Err(
                    describe_error(&self.library, error).context(format!("read unit {name}"))
                );
            }
            let main_file = {
                let get: Symbol<unsafe extern "C" fn(UnitReaderHandle) -> StringRef> = self
                    .library
                    .get(b"indexstore_unit_reader_get_main_file\0")
                    .context("resolve main-file accessor")?;
                Utf8PathBuf::from(get(reader).to_string_lossy())
            };
            let modification_time = {
                let get: Symbol<
                    unsafe extern "C" fn(UnitReaderHandle, *mut i64, *mut i64),
                > = self
                    .library
                    .get(b"indexstore_unit_reader_get_modification_time\0")
                    .context("resolve modification-time accessor")?;
                let (mut seconds, mut nanos) = (0_i64, 0_i64);
                get(reader, &mut seconds, &mut nanos);
                SystemTime::UNIX_EPOCH
                    + Duration::new(seconds.max(0) as u64, nanos.max(0) as u32)
            };
            let mut collector = DepCollector {
                library: &self.library,
                unit_dependencies: Vec::new(),
                records: Vec::new(),
            };
            {
                let apply: Symbol<
                    unsafe extern "C" fn(
                        UnitReaderHandle,
                        *mut c_void,
                        unsafe extern "C" fn(*mut c_void, DependencyHandle) -> bool,
                    ) -> bool,
                > = self
                    .library
                    .get(b"indexstore_unit_reader_dependencies_apply_f\0")
                    .context("resolve dependency iteration entry point")?;
                apply(
                    reader,
                    &mut collector as *mut _ as *mut c_void,
                    on_dependency,
                );
            }
            let dispose: Symbol<unsafe extern "C" fn(UnitReaderHandle)> = self
                .library
                .get(b"indexstore_unit_reader_dispose\0")
                .context("resolve unit reader dispose")?;
            dispose(reader);
            Ok(UnitInfo {
                name: name.to_owned(),
                main_file,
                modification_time,
                unit_dependencies: collector.unit_dependencies,
                records: collector.records,
            })
        }
    }

    /// Walk one record, passing each (usr, roles) occurrence to `visit`.
    fn each_occurrence(
        &self,
        record_name: &str,
        visit: &mut dyn FnMut(String, u64),
    ) -> Result<()> {
        struct OccContext<'l, 'v> {
            library: &'l Library,
            visit: &'v mut dyn FnMut(String, u64),
        }
        unsafe extern "C" fn on_occurrence(ctx: *mut c_void, occ: OccurrenceHandle) -> bool {
            let context = unsafe { &mut *(ctx as *mut OccContext) };
            let (usr, roles) = unsafe {
                let get_symbol = context
                    .library
                    .get::<unsafe extern "C" fn(OccurrenceHandle) -> SymbolHandle>(
                        b"indexstore_occurrence_get_symbol\0",
                    );
                let get_roles = context
                    .library
                    .get::<unsafe extern "C" fn(OccurrenceHandle) -> u64>(
                        b"indexstore_occurrence_get_roles\0",
                    );
                let get_usr = context
                    .library
                    .get::<unsafe extern "C" fn(SymbolHandle) -> StringRef>(
                        b"indexstore_symbol_get_usr\0",
                    );
                match (get_symbol, get_roles, get_usr) {
                    (Ok(sym_of), Ok(roles_of), Ok(usr_of)) => {
                        let symbol = sym_of(occ);
                        (usr_of(symbol).to_string_lossy(), roles_of(occ))
                    }
                    _ => return false,
                }
            };
            (context.visit)(usr, roles);
            true
        }

        let c_name = CString::new(record_name).context("record name contains NUL")?;
        unsafe {
            let create: Symbol<
                unsafe extern "C" fn(
                    StoreHandle,
                    *const c_char,
                    *mut ErrorHandle,
                ) -> RecordReaderHandle,
            > = self
                .library
                .get(b"indexstore_record_reader_create\0")
                .context("resolve indexstore_record_reader_create")?;
            let mut error: ErrorHandle = std::ptr::null_mut();
            let reader = create(self.store, c_name.as_ptr(), &mut error);
            if reader.is_null() {
                return Err(describe_error(&self.library, error)
                    .context(format!("read record {record_name}")));
            }
            let mut context = OccContext {
                library: &self.library,
                visit,
            };
            let apply: Symbol<
                unsafe extern "C" fn(
                    RecordReaderHandle,
                    *mut c_void,
                    unsafe extern "C" fn(*mut c_void, OccurrenceHandle) -> bool,
                ) -> bool,
            > = self
                .library
                .get(b"indexstore_record_reader_occurrences_apply_f\0")
                .context("resolve occurrence iteration entry point")?;
            apply(reader, &mut context as *mut _ as *mut c_void, on_occurrence);
            let dispose: Symbol<unsafe extern "C" fn(RecordReaderHandle)> = self
                .library
                .get(b"indexstore_record_reader_dispose\0")
                .context("resolve record reader dispose")?;
            dispose(reader);
        }
        Ok(())
    }

    fn unit_indexes_for(&self, source: &Utf8Path) -> Vec<usize> {
        self.by_main_file.get(source).cloned().unwrap_or_default()
    }
}

impl Drop for IndexStoreDb {
    fn drop(&mut self) {
        unsafe {
            if let Ok(dispose) = self
                .library
                .get::<unsafe extern "C" fn(StoreHandle)>(b"indexstore_store_dispose\0")
            {
                dispose(self.store);
            }
        }
    }
}

impl SemanticIndex for IndexStoreDb {
    fn latest_unit_time(&self, source: &Utf8Path) -> Result<Option<SystemTime>> {
        Ok(self
            .unit_indexes_for(source)
            .into_iter()
            .map(|i| self.units[i].modification_time)
            .max())
    }

    fn test_files_referencing(&self, source: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
        // Reverse reachability over the unit dependency graph: a test unit
        // exercises `source` iff the source's units are in its closure.
        let target_names: Vec<&str> = self
            .unit_indexes_for(source)
            .into_iter()
            .map(|i| self.units[i].name.as_str())
            .collect();
        if target_names.is_empty() {
            return Ok(Vec::new());
        }
        let mut dependents: Vec<&UnitInfo> = Vec::new();
        let mut frontier: Vec<&str> = target_names.clone();
        let mut seen: Vec<&str> = target_names;
        while let Some(wanted) = frontier.pop() {
            for unit in &self.units {
                if seen.contains(&unit.name.as_str()) {
                    continue;
                }
                if unit.unit_dependencies.iter().any(|d| d.as_str() == wanted) {
                    seen.push(&unit.name);
                    frontier.push(&unit.name);
                    dependents.push(unit);
                }
            }
        }
        let mut files: Vec<Utf8PathBuf> = dependents
            .into_iter()
            .filter(|u| u.main_file.components().any(|c| c.as_str() == "Tests"))
            .map(|u| u.main_file.clone())
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn symbols_defined_in(&self, source: &Utf8Path) -> Result<Vec<String>> {
        let mut usrs = Vec::new();
        for i in self.unit_indexes_for(source) {
            for (record_name, path) in &self.units[i].records {
                if path != source {
                    continue;
                }
                self.each_occurrence(record_name, &mut |usr, roles| {
                    if roles & SYMBOL_ROLE_DEFINITION != 0 {
                        usrs.push(usr);
                    }
                })?;
            }
        }
        usrs.sort();
        usrs.dedup();
        Ok(usrs)
    }

    fn files_referencing(&self, usr: &str) -> Result<Vec<Utf8PathBuf>> {
        let mut files = Vec::new();
        for unit in &self.units {
            for (record_name, path) in &unit.records {
                let mut hit = false;
                self.each_occurrence(record_name, &mut |occurrence_usr, roles| {
                    if occurrence_usr == usr && roles & SYMBOL_ROLE_REFERENCE != 0 {
                        hit = true;
                    }
                })?;
                if hit {
                    files.push(path.clone());
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

fn describe_error(library: &Library, error: ErrorHandle) -> anyhow::Error {
    if error.is_null() {
        return anyhow!("libIndexStore reported an unspecified error");
    }
    unsafe {
        let message = match library
            .get::<unsafe extern "C" fn(ErrorHandle) -> *const c_char>(
                b"indexstore_error_get_description\0",
            ) {
            Ok(describe) => {
                let c = describe(error);
                if c.is_null() {
                    "unknown index store error".to_owned()
                } else {
                    std::ffi::CStr::from_ptr(c).to_string_lossy().into_owned()
                }
            }
            Err(_) => "unknown index store error".to_owned(),
        };
        if let Ok(dispose) =
            library.get::<unsafe extern "C" fn(ErrorHandle)>(b"indexstore_error_dispose\0")
        {
            dispose(error);
        }
        anyhow!(message)
    }
}

/// Find and load libIndexStore from the toolchain.
fn load_libindexstore() -> Result<Library> {
    let mut candidates: Vec<String> = Vec::new();
    if let Ok(explicit) = std::env::var("MUTATE4SWIFT_LIBINDEXSTORE") {
        candidates.push(explicit);
    }
    #[cfg(target_os = "macos")]
    candidates.push("libIndexStore.dylib".to_owned());
    #[cfg(not(target_os = "macos"))]
    candidates.push("libIndexStore.so".to_owned());
    let mut last_error = None;
    for candidate in &candidates {
        match unsafe { Library::new(candidate) } {
            Ok(library) => return Ok(library),
            Err(err) => last_error = Some(err),
        }
    }
    Err(anyhow!(
        "could not load libIndexStore (set MUTATE4SWIFT_LIBINDEXSTORE to its path): {:?}",
        last_error
    ))
}
