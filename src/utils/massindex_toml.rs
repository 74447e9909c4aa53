//! Load `.massindex.toml` from the data directory (CLI only). Library callers build a
//! [`MassIndexingConfig`] themselves.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::config::{MassIndexingConfig, PackagePaths};

#[derive(Debug, Default, Deserialize)]
pub struct MassIndexToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    index_dir: Option<String>,
    verbose: Option<bool>,
    progress: Option<bool>,
    id_fetch_size: Option<usize>,
    batch_size: Option<usize>,
    threads: Option<usize>,
    parallelism: Option<usize>,
    queue_capacity: Option<usize>,
    max_bulk_items: Option<usize>,
    max_timeout_retries: Option<u32>,
    purge: Option<bool>,
    merge_after_purge: Option<bool>,
    merge_on_finish: Option<bool>,
    drop_schema: Option<bool>,
    failure_flooding_threshold: Option<u64>,
    ignored_statuses: Option<Vec<u16>>,
    ignored_error_types: Option<Vec<String>>,
    tenant: Option<String>,
}

impl MassIndexToml {
    pub fn index_dir(&self) -> Option<PathBuf> {
        self.settings.index_dir.as_ref().map(PathBuf::from)
    }

    pub fn verbose(&self) -> Option<bool> {
        self.settings.verbose
    }

    pub fn progress(&self) -> Option<bool> {
        self.settings.progress
    }
}

/// Parse settings text. Errors are logged and yield `None`.
pub fn parse_massindex_toml(s: &str, origin: &Path) -> Option<MassIndexToml> {
    toml::from_str(s)
        .map_err(|e| log::warn!("{}: {}", origin.display(), e))
        .ok()
}

/// Load `.massindex.toml` from `dir` if present. Returns None if missing, unreadable or invalid.
pub fn load_massindex_toml(dir: &Path) -> Option<MassIndexToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_massindex_toml(&s, &path)
}

/// Overwrite config field from file when present.
macro_rules! apply_file_opt {
    ($s:expr, $cfg:expr, $s_field:ident => $cfg_field:ident) => {
        if let Some(v) = $s.$s_field.clone() {
            $cfg.$cfg_field = v;
        }
    };
}

/// Apply file settings to `cfg` (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_config(file: &MassIndexToml, cfg: &mut MassIndexingConfig) {
    let s = &file.settings;
    apply_file_opt!(s, cfg, id_fetch_size => id_fetch_size);
    apply_file_opt!(s, cfg, batch_size => batch_size_to_load_objects);
    apply_file_opt!(s, cfg, threads => threads_to_load_objects);
    apply_file_opt!(s, cfg, parallelism => type_group_parallelism);
    apply_file_opt!(s, cfg, max_bulk_items => max_bulk_items);
    apply_file_opt!(s, cfg, max_timeout_retries => max_timeout_retries);
    apply_file_opt!(s, cfg, purge => purge_all_on_start);
    apply_file_opt!(s, cfg, merge_after_purge => merge_segments_after_purge);
    apply_file_opt!(s, cfg, merge_on_finish => merge_segments_on_finish);
    apply_file_opt!(s, cfg, drop_schema => drop_and_create_schema_on_start);
    apply_file_opt!(s, cfg, ignored_statuses => ignored_statuses);
    apply_file_opt!(s, cfg, ignored_error_types => ignored_error_types);
    if s.queue_capacity.is_some() {
        cfg.queue_capacity = s.queue_capacity;
    }
    if s.failure_flooding_threshold.is_some() {
        cfg.failure_flooding_threshold = s.failure_flooding_threshold;
    }
    if s.tenant.is_some() {
        cfg.tenant = s.tenant.clone();
    }
}
