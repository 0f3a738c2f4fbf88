//! Runtime configuration.
//!
//! Defaults match the public CAWCR wave hindcast archive. A YAML file can
//! override any subset of fields; `HINDCAST_*` environment variables override
//! the most commonly tuned ones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use hindcast_common::{DatasetSelector, HindcastError, Region, VariableName, YearMonth};

pub const DEFAULT_BASE_URL: &str = "https://data-cbr.csiro.au/thredds/dodsC/catch_all/CMAR_CAWCR-Wave_archive/CAWCR_Wave_Hindcast_aggregate";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {variable}: '{value}'")]
    Env { variable: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for HindcastError {
    fn from(e: ConfigError) -> Self {
        HindcastError::Config(e.to_string())
    }
}

/// Where monthly files live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub base_url: String,
    /// Placeholders: `{base}`, `{region}`, `{yyyymm}`
    pub gridded_template: String,
    /// Placeholders: `{base}`, `{yyyymm}`
    pub spectral_template: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            gridded_template: "{base}/gridded/ww3.{region}.{yyyymm}.nc".to_string(),
            spectral_template: "{base}/spec/ww3.{yyyymm}_spec.nc".to_string(),
        }
    }
}

impl ArchiveConfig {
    /// URL of the monthly file for a selector and month.
    pub fn month_url(&self, selector: DatasetSelector, month: YearMonth) -> String {
        let base = self.base_url.trim_end_matches('/');
        let yyyymm = month.to_string();
        match selector {
            DatasetSelector::Gridded { region } => self
                .gridded_template
                .replace("{base}", base)
                .replace("{region}", region.as_str())
                .replace("{yyyymm}", &yyyymm),
            DatasetSelector::Spectral => self
                .spectral_template
                .replace("{base}", base)
                .replace("{yyyymm}", &yyyymm),
        }
    }

    pub fn template_for(&self, selector: DatasetSelector) -> &str {
        match selector {
            DatasetSelector::Gridded { .. } => &self.gridded_template,
            DatasetSelector::Spectral => &self.spectral_template,
        }
    }
}

/// Monthly file opening and worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on concurrent month fetches
    pub max_workers: usize,
    /// Additional attempts after the first failed open
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles each retry)
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 6,
            max_retries: 2,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
        }
    }
}

impl FetchConfig {
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub enabled: bool,
    /// Keep monthly entries after the dataset has been persisted
    pub keep: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./hindcast-cache"),
            enabled: true,
            keep: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Largest dataset (MB) assembled fully in memory before switching to the
    /// streamed strategy
    pub memory_budget_mb: u64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: 1024,
        }
    }
}

impl AssemblyConfig {
    pub fn memory_budget_bytes(&self) -> usize {
        usize::try_from(self.memory_budget_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

/// Precomputed location tables. Regions without a table use a live scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub valid_points: HashMap<Region, PathBuf>,
    pub stations: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HindcastConfig {
    pub archive: ArchiveConfig,
    /// Canonical variable name -> alternative names tried in order
    pub aliases: BTreeMap<VariableName, Vec<String>>,
    /// Half-width (degrees) of the live-scan search box, and padding applied
    /// to lookup-table coverage
    pub search_radius_deg: f64,
    /// Variable whose first time step marks valid (ocean) grid cells
    pub reference_variable: String,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub assembly: AssemblyConfig,
    pub lookup: LookupConfig,
}

impl Default for HindcastConfig {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(VariableName::new("wnd"), vec!["u10m".to_string()]);
        aliases.insert(VariableName::new("t0m1"), vec!["tm0m1".to_string()]);
        Self {
            archive: ArchiveConfig::default(),
            aliases,
            search_radius_deg: 0.5,
            reference_variable: "hs".to_string(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            assembly: AssemblyConfig::default(),
            lookup: LookupConfig::default(),
        }
    }
}

impl HindcastConfig {
    /// Load from a YAML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: HindcastConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(path = %path.display(), "Loaded hindcast config");
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `HINDCAST_*` environment overrides:
    /// `HINDCAST_BASE_URL`, `HINDCAST_CACHE_DIR`, `HINDCAST_MAX_WORKERS`,
    /// `HINDCAST_SEARCH_RADIUS`, `HINDCAST_MAX_RETRIES`, `HINDCAST_MEMORY_BUDGET_MB`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(url) = std::env::var("HINDCAST_BASE_URL") {
            self.archive.base_url = url;
        }
        if let Ok(dir) = std::env::var("HINDCAST_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("HINDCAST_MAX_WORKERS")? {
            self.fetch.max_workers = v;
        }
        if let Some(v) = env_parse("HINDCAST_SEARCH_RADIUS")? {
            self.search_radius_deg = v;
        }
        if let Some(v) = env_parse("HINDCAST_MAX_RETRIES")? {
            self.fetch.max_retries = v;
        }
        if let Some(v) = env_parse("HINDCAST_MEMORY_BUDGET_MB")? {
            self.assembly.memory_budget_mb = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("archive.base_url is empty".to_string()));
        }
        if !self.archive.gridded_template.contains("{yyyymm}")
            || !self.archive.spectral_template.contains("{yyyymm}")
        {
            return Err(ConfigError::Invalid(
                "URL templates must contain {yyyymm}".to_string(),
            ));
        }
        if !(self.search_radius_deg.is_finite() && self.search_radius_deg > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "search_radius_deg must be positive, got {}",
                self.search_radius_deg
            )));
        }
        if self.fetch.max_workers == 0 {
            return Err(ConfigError::Invalid("fetch.max_workers must be at least 1".to_string()));
        }
        if self.fetch.initial_retry_delay_ms > self.fetch.max_retry_delay_ms {
            return Err(ConfigError::Invalid(
                "fetch.initial_retry_delay_ms exceeds fetch.max_retry_delay_ms".to_string(),
            ));
        }
        if self.reference_variable.trim().is_empty() {
            return Err(ConfigError::Invalid("reference_variable is empty".to_string()));
        }
        Ok(())
    }

    /// Names to try for `canonical`, canonical first.
    pub fn candidates(&self, canonical: &VariableName) -> Vec<String> {
        let mut names = vec![canonical.as_str().to_string()];
        if let Some(aliases) = self.aliases.get(canonical) {
            names.extend(aliases.iter().filter(|a| *a != canonical.as_str()).cloned());
        }
        names
    }
}

fn env_parse<T: std::str::FromStr>(variable: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(variable) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                variable: variable.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = HindcastConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fetch.max_workers, 6);
        assert_eq!(
            config.candidates(&VariableName::new("wnd")),
            vec!["wnd".to_string(), "u10m".to_string()]
        );
        assert_eq!(config.candidates(&VariableName::new("hs")), vec!["hs".to_string()]);
    }

    #[test]
    fn test_month_url() {
        let archive = ArchiveConfig {
            base_url: "https://example.org/archive/".to_string(),
            ..ArchiveConfig::default()
        };
        let month = YearMonth::new(2015, 1).unwrap();
        assert_eq!(
            archive.month_url(DatasetSelector::Gridded { region: Region::Aus4m }, month),
            "https://example.org/archive/gridded/ww3.aus_4m.201501.nc"
        );
        assert_eq!(
            archive.month_url(DatasetSelector::Spectral, month),
            "https://example.org/archive/spec/ww3.201501_spec.nc"
        );
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
search_radius_deg: 0.25
fetch:
  max_workers: 2
aliases:
  fp: [peak_freq]
lookup:
  valid_points:
    aus_4m: /data/aus_4m_points.csv
"#;
        let config: HindcastConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.search_radius_deg, 0.25);
        assert_eq!(config.fetch.max_workers, 2);
        assert_eq!(config.fetch.max_retries, 2);
        assert_eq!(config.cache.dir, PathBuf::from("./hindcast-cache"));
        assert_eq!(
            config.lookup.valid_points.get(&Region::Aus4m),
            Some(&PathBuf::from("/data/aus_4m_points.csv"))
        );
        assert_eq!(
            config.candidates(&VariableName::new("fp")),
            vec!["fp".to_string(), "peak_freq".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = HindcastConfig::default();
        config.fetch.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = HindcastConfig::default();
        config.search_radius_deg = -1.0;
        assert!(config.validate().is_err());

        let mut config = HindcastConfig::default();
        config.archive.gridded_template = "{base}/static.nc".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = HindcastConfig::load(Path::new("/nonexistent/hindcast.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
