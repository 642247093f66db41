//! Loading datasets from a set of files.
//!
//! A [Reader] assigns files to the file types of its [ReaderConfig], resolves dataset
//! queries against its [Catalog], decodes the files required and merges the per-file
//! products for each dataset.
//!
//! Decoded files are cached until [Reader::release]. Files are decoded in parallel, but
//! each file is decoded at most once; concurrent requests for the same file wait for
//! the single in-flight decode.
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::catalog::{Catalog, DatasetId, DatasetQuery, QueryFilter};
use crate::config::{ReaderConfig, ReaderInfo};
use crate::geolocation::Interpolator;
use crate::handle::{EpsFile, Navigation};
use crate::matcher::{find_files, match_existing, match_file_types, pair_navigation, MatchedFile};
use crate::pattern::{FilePattern, FilenameInfo};
use crate::product::Product;
use crate::schema::Schema;
use crate::{Error, Result};

/// Sensing time range of interest. Unset bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct TimeWindow {
    #[builder(default, setter(strip_option))]
    pub start: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// True if a file covering `start` to `end` overlaps the window, including at the
    /// bounds.
    #[must_use]
    pub fn contains(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let ends_before = self.start.is_some_and(|ws| end < ws);
        let starts_after = self.end.is_some_and(|we| start > we);
        !(ends_before || starts_after)
    }
}

/// Restricts [Reader::select_files] to a reader name or a set of sensors. Unset
/// fields accept any reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct Selection {
    #[builder(default, setter(strip_option, into))]
    pub reader_name: Option<String>,
    /// Accepted if the reader supports any of these.
    #[builder(default, setter(into))]
    pub sensors: Vec<String>,
}

impl Selection {
    /// True if a reader described by `info` should claim files under this selection.
    #[must_use]
    pub fn accepts(&self, info: &ReaderInfo) -> bool {
        let name_ok = self.reader_name.as_ref().map_or(true, |n| *n == info.name);
        let sensor_ok =
            self.sensors.is_empty() || self.sensors.iter().any(|s| info.sensors.contains(s));
        name_ok && sensor_ok
    }
}

/// The outcome of [Reader::load].
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Merged product, or the error that prevented it, per resolved dataset.
    pub datasets: HashMap<DatasetId, Result<Product>>,
    /// Queries that did not resolve to a dataset.
    pub unresolved: Vec<(DatasetQuery, Error)>,
    /// Earliest start of the files used.
    pub start_time: Option<DateTime<Utc>>,
    /// Latest end of the files used.
    pub end_time: Option<DateTime<Utc>>,
}

impl LoadResult {
    #[must_use]
    pub fn get(&self, id: &DatasetId) -> Option<&Result<Product>> {
        self.datasets.get(id)
    }

    /// Result for the dataset named `name`, if exactly one was loaded.
    #[must_use]
    pub fn named(&self, name: &str) -> Option<&Result<Product>> {
        let mut found = self.datasets.iter().filter(|(id, _)| id.name() == name);
        match (found.next(), found.next()) {
            (Some((_, zult)), None) => Some(zult),
            _ => None,
        }
    }
}

type OpenResult = std::result::Result<Arc<EpsFile>, Arc<Error>>;

/// Decoded files by path. Each path is decoded at most once.
#[derive(Debug, Default)]
struct HandleCache {
    cells: Mutex<HashMap<PathBuf, Arc<OnceLock<OpenResult>>>>,
}

impl HandleCache {
    fn get_or_open(&self, path: &Path, info: &FilenameInfo, schema: &Arc<Schema>) -> OpenResult {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            cells.entry(path.to_path_buf()).or_default().clone()
        };
        cell.get_or_init(|| {
            EpsFile::open(path, info.clone(), schema.clone())
                .map(Arc::new)
                .map_err(|err| {
                    warn!(?path, "failed to decode: {err}");
                    Arc::new(err)
                })
        })
        .clone()
    }

    fn len(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn clear(&self) {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn file_err(path: &Path, err: &Arc<Error>) -> Error {
    Error::File {
        path: path.to_path_buf(),
        source: err.clone(),
    }
}

/// Loads datasets described by a [ReaderConfig] from files decoded with a [Schema].
pub struct Reader {
    config: ReaderConfig,
    catalog: Catalog,
    schema: Arc<Schema>,
    /// Compiled file patterns per file type, navigation file types first.
    patterns: Vec<(String, Vec<FilePattern>)>,
    /// Selected files per file type.
    files: HashMap<String, Vec<MatchedFile>>,
    cache: HandleCache,
    interpolator: Option<Arc<dyn Interpolator>>,
    num_threads: usize,
}

impl Reader {
    /// Create a reader, compiling its file patterns and building its dataset catalog.
    ///
    /// File types that provide navigation for other file types are matched first, so a
    /// navigation file is not claimed by a broader primary pattern.
    ///
    /// # Errors
    /// [Error::Pattern] for invalid file patterns, [Error::Config] for invalid dataset
    /// templates.
    pub fn new(config: ReaderConfig, schema: Arc<Schema>) -> Result<Self> {
        config.validate()?;
        let mut patterns = Vec::default();
        for (file_type, spec) in &config.file_types {
            let compiled = spec
                .file_patterns
                .iter()
                .map(|p| FilePattern::new(p))
                .collect::<Result<Vec<_>>>()?;
            patterns.push((file_type.clone(), compiled));
        }
        let nav_types: BTreeSet<&str> = config
            .file_types
            .values()
            .filter_map(|ft| ft.navigation.as_deref())
            .collect();
        patterns.sort_by_key(|(file_type, _)| !nav_types.contains(file_type.as_str()));
        let catalog = Catalog::build(&config.datasets)?;
        debug!(reader = %config.reader.name, datasets = catalog.len(), "created reader");

        Ok(Self {
            config,
            catalog,
            schema,
            patterns,
            files: HashMap::default(),
            cache: HandleCache::default(),
            interpolator: None,
            num_threads: 0,
        })
    }

    /// Use `interpolator` to compute full resolution swath areas for loaded products.
    #[must_use]
    pub fn with_interpolator(mut self, interpolator: Arc<dyn Interpolator>) -> Self {
        self.interpolator = Some(interpolator);
        self
    }

    /// Number of threads used to decode files. 0, the default, lets rayon decide.
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Selected files of `file_type` with their filename metadata.
    #[must_use]
    pub fn files(&self, file_type: &str) -> &[MatchedFile] {
        self.files
            .get(file_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All selected files, sorted.
    #[must_use]
    pub fn selected_files(&self) -> Vec<&Path> {
        let files: BTreeSet<&Path> = self
            .files
            .values()
            .flatten()
            .map(|(p, _)| p.as_path())
            .collect();
        files.into_iter().collect()
    }

    /// Number of decoded (or failed) files currently cached.
    #[must_use]
    pub fn num_open_files(&self) -> usize {
        self.cache.len()
    }

    fn all_patterns(&self) -> Vec<FilePattern> {
        self.patterns
            .iter()
            .flat_map(|(_, p)| p.iter().cloned())
            .collect()
    }

    /// Select the files in `dir` matching any file type, returning the number selected.
    ///
    /// Nothing is selected if `selection` does not accept this reader.
    ///
    /// # Errors
    /// [Error::Io] if `dir` cannot be read.
    pub fn select_files_from_dir<P: AsRef<Path>>(
        &mut self,
        dir: P,
        selection: &Selection,
    ) -> Result<usize> {
        if !selection.accepts(&self.config.reader) {
            debug!(reader = %self.config.reader.name, ?selection, "not selected");
            return Ok(0);
        }
        let found = find_files(dir, &self.all_patterns())?;
        let count = found.len();
        self.select_files(found, selection);
        Ok(count)
    }

    /// Select the files in `filenames` matching any file type, returning the rest.
    ///
    /// If `selection` does not accept this reader all of `filenames` are returned.
    pub fn select_files(&mut self, filenames: Vec<PathBuf>, selection: &Selection) -> Vec<PathBuf> {
        if !selection.accepts(&self.config.reader) {
            debug!(reader = %self.config.reader.name, ?selection, "not selected");
            return filenames;
        }
        let (matched, remaining) = match_existing(filenames, &self.all_patterns());
        if matched.is_empty() {
            warn!(reader = %self.config.reader.name, "no matching files found");
            return remaining;
        }
        for (file_type, mut found) in match_file_types(&matched, &self.patterns) {
            let selected = self.files.entry(file_type.clone()).or_default();
            found.retain(|(path, _)| !selected.iter().any(|(p, _)| p == path));
            debug!(%file_type, count = found.len(), "selected files");
            selected.extend(found);
        }
        remaining
    }

    /// Drop all decoded files.
    pub fn release(&self) {
        debug!(count = self.cache.len(), "releasing decoded files");
        self.cache.clear();
    }

    /// Resolve `queries` and load the datasets from the selected files overlapping
    /// `window`.
    ///
    /// Failures are scoped to the query or dataset they affect, so the result may be a
    /// partial success. A dataset whose file type has no files in the window produces an
    /// empty product.
    ///
    /// # Errors
    /// [Error::ThreadPool] if the decode thread pool cannot be created.
    pub fn load(&self, queries: &[DatasetQuery], window: &TimeWindow) -> Result<LoadResult> {
        self.load_filtered(queries, &QueryFilter::default(), window)
    }

    /// Like [Reader::load], applying `filter` when resolving `queries`.
    ///
    /// # Errors
    /// [Error::ThreadPool] if the decode thread pool cannot be created.
    pub fn load_filtered(
        &self,
        queries: &[DatasetQuery],
        filter: &QueryFilter,
        window: &TimeWindow,
    ) -> Result<LoadResult> {
        let mut result = LoadResult::default();

        let mut ids: Vec<DatasetId> = Vec::default();
        for query in queries {
            match self.catalog.resolve_one(query, filter) {
                Ok(id) if !ids.contains(&id) => ids.push(id),
                Ok(_) => {}
                Err(err) => {
                    warn!("could not resolve {query}: {err}");
                    result.unresolved.push((query.clone(), err));
                }
            }
        }

        let file_types: BTreeSet<&str> = ids
            .iter()
            .filter_map(|id| self.catalog.entry(id))
            .map(|e| e.file_type.as_str())
            .collect();

        // Pair navigation by filename before opening anything so shared navigation
        // files are opened once with the primaries.
        let mut to_open: HashMap<&Path, &FilenameInfo> = HashMap::default();
        let mut pairs: HashMap<&Path, Option<&MatchedFile>> = HashMap::default();
        for file_type in &file_types {
            let nav_type = self.config.navigation_type(file_type);
            for primary in self.files(file_type) {
                let (path, info) = primary;
                to_open.insert(path, info);
                let Some(nav_type) = nav_type else {
                    continue;
                };
                let nav = pair_navigation(info, self.files(nav_type));
                match nav {
                    Some((nav_path, nav_info)) => {
                        to_open.insert(nav_path, nav_info);
                    }
                    None => warn!(?path, nav_type, "no navigation file found"),
                }
                pairs.insert(path, nav);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()?;
        let opened: HashMap<&Path, OpenResult> = pool.install(|| {
            to_open
                .par_iter()
                .map(|(path, info)| (*path, self.cache.get_or_open(path, info, &self.schema)))
                .collect()
        });

        for (path, nav) in &pairs {
            let Some(Ok(primary)) = opened.get(path) else {
                continue;
            };
            let navigation = match nav {
                Some((nav_path, _)) if nav_path.as_path() == *path => Navigation::Internal,
                Some((nav_path, _)) => match opened.get(nav_path.as_path()) {
                    Some(Ok(handle)) => Navigation::Paired(handle.clone()),
                    Some(Err(err)) => Navigation::Failed(Arc::new(file_err(nav_path, err))),
                    None => Navigation::Missing,
                },
                None => Navigation::Missing,
            };
            primary.set_navigation(navigation);
        }

        let interpolator = self.interpolator.as_deref();
        for id in ids {
            let Some(entry) = self.catalog.entry(&id) else {
                continue;
            };
            let mut kept: Vec<&OpenResult> = Vec::default();
            let mut kept_paths: Vec<&Path> = Vec::default();
            for (path, _) in self.files(&entry.file_type) {
                let Some(zult) = opened.get(path.as_path()) else {
                    continue;
                };
                if let Ok(handle) = zult {
                    match (handle.start_time(), handle.end_time()) {
                        (Ok(start), Ok(end)) => {
                            if !window.contains(start, end) {
                                debug!(?path, %start, %end, "outside time window");
                                continue;
                            }
                            result.start_time = Some(result.start_time.map_or(start, |t| t.min(start)));
                            result.end_time = Some(result.end_time.map_or(end, |t| t.max(end)));
                        }
                        _ => warn!(?path, "no sensing times; not filtering by time"),
                    }
                }
                kept.push(zult);
                kept_paths.push(path);
            }

            let parts: Result<Vec<Product>> = pool.install(|| {
                kept.par_iter()
                    .zip(kept_paths.par_iter())
                    .map(|(zult, path)| match zult {
                        Ok(handle) => handle.get_dataset(&id, interpolator),
                        Err(err) => Err(file_err(path, err)),
                    })
                    .collect()
            });
            let product = parts.and_then(|parts| {
                if parts.is_empty() {
                    debug!("no files for {id}");
                }
                Product::merge(id.clone(), parts)
            });
            if let Err(err) = &product {
                warn!("failed to load {id}: {err}");
            }
            result.datasets.insert(id, product);
        }

        info!(
            datasets = result.datasets.len(),
            unresolved = result.unresolved.len(),
            files = opened.len(),
            "loaded"
        );
        Ok(result)
    }
}
