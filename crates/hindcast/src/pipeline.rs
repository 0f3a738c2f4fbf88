//! The `load_hindcast` request: locate, fetch, assemble, persist.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{instrument, warn};

use hindcast_common::{
    month_range, AssembledDataset, ColumnLayout, Coordinate, DatasetKind, DatasetMetadata,
    DatasetSelector, HindcastArchive, HindcastError, HindcastResult, LocationResolution,
    MonthlyRecord, Region, VariableName, YearMonth,
};
use storage::{CacheError, CacheKey, DatasetPersister, MonthlyCache, PersistedPaths};

use crate::assembler::{AssemblyError, AssemblyStrategy, DatasetAssembler, MonthlySource};
use crate::config::HindcastConfig;
use crate::fetcher::MonthlyFetcher;
use crate::locator::GridLocator;
use crate::scheduler::{FetchScheduler, MonthOutcome, MonthStore, ScheduleReport, WorkerPool};

/// Request progress at info level when verbose, debug otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub kind: DatasetKind,
    /// Gridded region; ignored for spectral (wind) requests
    pub region: Region,
    pub extra_variables: Vec<VariableName>,
    pub concurrent: bool,
    /// Worker cap; the configured default when None
    pub max_workers: Option<usize>,
    /// Override of the configured cache switch
    pub use_cache: Option<bool>,
    /// Override of the configured keep-cache switch
    pub keep_cache: Option<bool>,
    pub verbose: bool,
    /// Persist the dataset here when set
    pub output_dir: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            kind: DatasetKind::Wave,
            region: Region::Glob24m,
            extra_variables: Vec::new(),
            concurrent: true,
            max_workers: None,
            use_cache: None,
            keep_cache: None,
            verbose: false,
            output_dir: None,
        }
    }
}

/// Everything a request produced.
#[derive(Debug)]
pub struct HindcastOutput {
    pub dataset: AssembledDataset,
    pub metadata: DatasetMetadata,
    pub resolution: LocationResolution,
    pub report: ScheduleReport,
    pub strategy: AssemblyStrategy,
    pub persisted: Option<PersistedPaths>,
}

impl HindcastOutput {
    pub fn into_parts(self) -> (AssembledDataset, DatasetMetadata) {
        (self.dataset, self.metadata)
    }
}

/// Retrieve the point series nearest `target` for every month in
/// `start..=end`.
///
/// Months that fail to fetch become gaps listed in `missing_months`. Fails
/// with `LocationNotFound` when no grid cell or station qualifies and with
/// `EmptyDataset` when no month produced rows.
#[instrument(skip(archive, config, options), fields(target = %target, start = %start, end = %end, kind = %options.kind))]
pub fn load_hindcast(
    archive: &dyn HindcastArchive,
    config: &HindcastConfig,
    target: Coordinate,
    start: YearMonth,
    end: YearMonth,
    options: &LoadOptions,
) -> HindcastResult<HindcastOutput> {
    config.validate()?;
    let target = Coordinate::try_new(target.lon, target.lat)?;
    let months = month_range(start, end).map_err(|e| HindcastError::InvalidRequest(e.to_string()))?;
    let selector = DatasetSelector::for_kind(options.kind, options.region);
    let layout = ColumnLayout::for_request(options.kind, &options.extra_variables);
    let use_cache = options.use_cache.unwrap_or(config.cache.enabled);
    let keep_cache = options.keep_cache.unwrap_or(config.cache.keep);
    let verbose = options.verbose;

    progress!(verbose, months = months.len(), columns = layout.len(), "Starting hindcast request");

    let resolution = GridLocator::new(archive, config, &months).resolve(target, selector)?;
    progress!(
        verbose,
        resolved = %resolution.resolved(),
        offset_km = resolution.offset_km(),
        "Location resolved"
    );

    let fetcher = MonthlyFetcher::new(archive, config);
    let cache = MonthlyCache::new(&config.cache.dir);
    let cache_store = CacheStore {
        cache: &cache,
        resolution: &resolution,
        columns: layout.columns(),
    };
    let store: Option<&dyn MonthStore> = if use_cache { Some(&cache_store) } else { None };

    let pool = if options.concurrent && months.len() > 1 {
        let cap = options.max_workers.unwrap_or(config.fetch.max_workers);
        WorkerPool::or_sequential(WorkerPool::new(WorkerPool::width_for(cap, months.len())))
    } else {
        None
    };

    let schedule = FetchScheduler::run(
        &months,
        |month| fetcher.fetch_month(&resolution, month, layout.columns()),
        store,
        pool.as_ref(),
    );
    drop(pool);

    let mut source = RequestSource {
        cache: use_cache.then_some(&cache),
        resolution: &resolution,
        fetcher: &fetcher,
        columns: layout.columns(),
        held: HashMap::new(),
        failed: HashSet::new(),
    };
    for (month, outcome) in schedule.outcomes {
        match outcome {
            MonthOutcome::Held(record) => {
                source.held.insert(month, record);
            }
            MonthOutcome::Failed(_) => {
                source.failed.insert(month);
            }
            MonthOutcome::Cached | MonthOutcome::Stored => {}
        }
    }

    let assembler = DatasetAssembler::new(&layout, config.assembly.memory_budget_bytes());
    let (dataset, strategy) = assembler.assemble(&months, &source).map_err(|e| match e {
        AssemblyError::Empty => HindcastError::EmptyDataset { start, end },
        other => other.into(),
    })?;

    let metadata = DatasetMetadata::describe(
        &resolution,
        start,
        end,
        &layout,
        &dataset,
        config.archive.template_for(selector),
    );

    let persisted = match &options.output_dir {
        Some(dir) => Some(DatasetPersister::new(dir).persist(&dataset, &metadata)?),
        None => None,
    };

    if use_cache && !keep_cache && persisted.is_some() {
        match cache.purge_location(&CacheKey::for_month(&resolution, start)) {
            Ok(removed) => progress!(verbose, removed, "Removed cached months"),
            Err(e) => warn!(error = %e, "Failed to remove cached months"),
        }
    }

    progress!(
        verbose,
        rows = dataset.rows(),
        missing = dataset.missing_months.len(),
        fetched = schedule.report.fetched,
        skipped = schedule.report.skipped,
        "Hindcast request complete"
    );

    Ok(HindcastOutput {
        dataset,
        metadata,
        resolution,
        report: schedule.report,
        strategy,
        persisted,
    })
}

/// Scheduler store writing into the monthly cache. A cached month counts
/// only when its entry holds every requested column.
struct CacheStore<'a> {
    cache: &'a MonthlyCache,
    resolution: &'a LocationResolution,
    columns: &'a [VariableName],
}

impl MonthStore for CacheStore<'_> {
    fn has(&self, month: YearMonth) -> bool {
        self.cache
            .has_columns(&CacheKey::for_month(self.resolution, month), self.columns)
    }

    fn store(&self, month: YearMonth, record: &MonthlyRecord) -> Result<(), CacheError> {
        self.cache
            .store(&CacheKey::for_month(self.resolution, month), record)
            .map(|_| ())
    }
}

/// Assembly input: records kept in memory by the scheduler, then the cache.
/// A corrupt cache entry is discarded and its month fetched again.
struct RequestSource<'a> {
    cache: Option<&'a MonthlyCache>,
    resolution: &'a LocationResolution,
    fetcher: &'a MonthlyFetcher<'a>,
    columns: &'a [VariableName],
    held: HashMap<YearMonth, MonthlyRecord>,
    failed: HashSet<YearMonth>,
}

impl RequestSource<'_> {
    fn read(
        &self,
        month: YearMonth,
        wanted: Option<&[VariableName]>,
    ) -> Result<Option<MonthlyRecord>, AssemblyError> {
        if let Some(record) = self.held.get(&month) {
            return Ok(Some(record.clone()));
        }
        if self.failed.contains(&month) {
            return Ok(None);
        }
        let Some(cache) = self.cache else {
            return Ok(None);
        };

        let key = CacheKey::for_month(self.resolution, month);
        let loaded = match wanted {
            Some(names) => cache.load_columns(&key, names),
            None => cache.load(&key),
        };
        match loaded {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) if e.is_corrupt() => Ok(self.refetch(cache, &key, &e)),
            Err(e) => Err(AssemblyError::Source {
                month,
                message: e.to_string(),
            }),
        }
    }

    fn refetch(&self, cache: &MonthlyCache, key: &CacheKey, cause: &CacheError) -> Option<MonthlyRecord> {
        warn!(key = %key, error = %cause, "Discarding corrupt cache entry and refetching");
        if let Err(e) = cache.remove(key) {
            warn!(key = %key, error = %e, "Failed to remove corrupt cache entry");
        }
        match self.fetcher.fetch_month(self.resolution, key.month, self.columns) {
            Ok(record) => {
                if let Err(e) = cache.store(key, &record) {
                    warn!(key = %key, error = %e, "Failed to re-cache month");
                }
                Some(record)
            }
            Err(e) => {
                warn!(month = %key.month, error = %e, "Refetch failed");
                None
            }
        }
    }
}

impl MonthlySource for RequestSource<'_> {
    fn load(&self, month: YearMonth) -> Result<Option<MonthlyRecord>, AssemblyError> {
        self.read(month, None)
    }

    fn load_columns(
        &self,
        month: YearMonth,
        names: &[VariableName],
    ) -> Result<Option<MonthlyRecord>, AssemblyError> {
        self.read(month, Some(names))
    }
}
