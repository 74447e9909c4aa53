use clap::Parser;
use std::path::PathBuf;

use crate::utils::config::PackagePaths;

struct DefaultArgs;

impl DefaultArgs {
    pub const DIR: &'static str = ".";
}

/// Rebuild search indexes from a directory of JSON Lines files.
#[derive(Clone, Parser)]
#[command(name = "massindex")]
#[command(about = "Mass-index every *.jsonl file in DATA_DIR; use --dry-run to index in memory only.")]
pub struct Cli {
    /// Directory holding one `<type>.jsonl` file per type group. Default: current directory.
    #[arg(value_name = "DATA_DIR", default_value = DefaultArgs::DIR)]
    pub data_dir: PathBuf,

    /// Where index directories are written. Default: `.massindex_indexes` in DATA_DIR.
    #[arg(long, short = 'o')]
    pub index_dir: Option<PathBuf>,

    /// Entity loader threads per type group.
    #[arg(long, short = 't', value_parser = clap::value_parser!(usize))]
    pub threads: Option<usize>,

    /// Records loaded per entity loader batch.
    #[arg(long, short = 'b', value_parser = clap::value_parser!(usize))]
    pub batch_size: Option<usize>,

    /// Identifiers fetched per cursor call.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub id_fetch_size: Option<usize>,

    /// Type groups indexed concurrently.
    #[arg(long, short = 'p', value_parser = clap::value_parser!(usize))]
    pub parallelism: Option<usize>,

    /// Keep existing documents: skip the purge (and the merge after it) before loading.
    #[arg(long)]
    pub no_purge: bool,

    /// Merge segments once loading is done.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub merge_on_finish: Option<bool>,

    /// Drop and recreate every index before loading.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub drop_schema: Option<bool>,

    /// Index into memory only; nothing is written to the index directory.
    #[arg(long)]
    pub dry_run: bool,

    /// Show a progress bar instead of periodic progress logs.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    /// Index directory: flag, else `fallback` (from `.massindex.toml`), else the package default
    /// inside DATA_DIR.
    pub fn index_dir_or(&self, fallback: Option<PathBuf>) -> PathBuf {
        self.index_dir
            .clone()
            .or(fallback)
            .unwrap_or_else(|| self.data_dir.join(PackagePaths::get().default_index_dir()))
    }
}
