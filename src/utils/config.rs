//! Application configuration: run tunables and defaults in one place.

use serde::Deserialize;
use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    config_filename: String,
    default_index_dir: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                config_filename: format!(".{pkg}.toml"),
                default_index_dir: format!(".{pkg}_indexes"),
            }
        })
    }

    /// Per-data-directory settings file, e.g. `.massindex.toml`.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Where the CLI writes segment indexes when `--index-dir` is not given.
    pub fn default_index_dir(&self) -> &str {
        &self.default_index_dir
    }
}

// ---- Worker threads ----

/// Limits for the entity-loader pool size.
#[derive(Clone, Copy, Debug)]
pub struct LoaderThreadLimits {
    /// Available threads (from rayon).
    pub all_threads: usize,
    pub floor: usize,
    pub max: usize,
}

impl LoaderThreadLimits {
    pub const FLOOR_THREADS: usize = 1;
    pub const MAX_DEFAULT_THREADS: usize = 6;

    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            floor: Self::FLOOR_THREADS,
            max: Self::MAX_DEFAULT_THREADS,
        }
    }

    /// Default loader thread count: available threads minus one for the identifier loader, clamped.
    pub fn default_threads(&self) -> usize {
        self.all_threads
            .saturating_sub(1)
            .clamp(self.floor, self.max)
    }
}

// ---- Result assessment ----

/// Status classification bounds for per-item backend results.
pub struct StatusConsts;

impl StatusConsts {
    pub const SUCCESS_MIN: u16 = 200;
    /// First status counted as a generic failure.
    pub const FAILURE_MIN: u16 = 300;
    pub const TIMEOUT: u16 = 408;
    pub const NOT_FOUND: u16 = 404;
}

// ---- Failure reporting ----

/// Entity-level failures the default (logging) handler forwards before it only counts.
pub const DEFAULT_FAILURE_FLOODING_THRESHOLD: u64 = 100;

// ---- Run configuration ----

/// Tunables for one mass-indexing run. Deserializable so it can come from `.massindex.toml`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MassIndexingConfig {
    /// Identifiers fetched per `next_batch` call.
    pub id_fetch_size: usize,
    /// Identifiers handed to one entity-loader call (size of one handoff-queue batch).
    pub batch_size_to_load_objects: usize,
    /// Entity-loader threads per type group.
    pub threads_to_load_objects: usize,
    /// Type groups indexed concurrently.
    pub type_group_parallelism: usize,
    /// Handoff queue capacity in batches. `None` means twice the loader thread count.
    pub queue_capacity: Option<usize>,
    /// Bulk submissions that may wait for the backend thread before loaders block.
    pub orchestrator_queue_capacity: usize,
    /// Upper bound on items coalesced into one backend call.
    pub max_bulk_items: usize,
    /// Retries for items the backend reported as timed out.
    pub max_timeout_retries: u32,
    pub purge_all_on_start: bool,
    pub merge_segments_after_purge: bool,
    pub merge_segments_on_finish: bool,
    pub drop_and_create_schema_on_start: bool,
    /// `None` asks the failure handler.
    pub failure_flooding_threshold: Option<u64>,
    /// Item statuses counted as success even though they are outside the success window.
    pub ignored_statuses: Vec<u16>,
    /// Backend error types counted as success.
    pub ignored_error_types: Vec<String>,
    pub tenant: Option<String>,
    /// Logging monitor reports every this many added documents.
    pub log_every: u64,
}

impl Default for MassIndexingConfig {
    fn default() -> Self {
        Self {
            id_fetch_size: 100,
            batch_size_to_load_objects: 10,
            threads_to_load_objects: LoaderThreadLimits::current().default_threads(),
            type_group_parallelism: 1,
            queue_capacity: None,
            orchestrator_queue_capacity: 64,
            max_bulk_items: 500,
            max_timeout_retries: 2,
            purge_all_on_start: true,
            merge_segments_after_purge: true,
            merge_segments_on_finish: false,
            drop_and_create_schema_on_start: false,
            failure_flooding_threshold: None,
            ignored_statuses: Vec::new(),
            ignored_error_types: Vec::new(),
            tenant: None,
            log_every: 1000,
        }
    }
}

impl MassIndexingConfig {
    pub fn loader_threads(&self) -> usize {
        self.threads_to_load_objects.max(1)
    }

    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.loader_threads() * 2)
            .max(1)
    }

    pub fn group_parallelism(&self) -> usize {
        self.type_group_parallelism.max(1)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size_to_load_objects.max(1)
    }

    pub fn fetch_size(&self) -> usize {
        self.id_fetch_size.max(1)
    }
}
