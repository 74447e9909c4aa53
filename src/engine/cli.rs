//! CLI command handler: mass-index DATA_DIR into segment indexes, or into memory with --dry-run.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::backend::{InMemoryBackend, IndexBackend, SegmentDirBackend};
use crate::engine::arg_parser::Cli;
use crate::engine::core::MassIndexer;
use crate::engine::progress::{LoggingMonitor, MassIndexingMonitor, ProgressBarMonitor};
use crate::source::{JsonDocumentBuilder, JsonLinesSource};
use crate::types::RunSummary;
use crate::utils::config::MassIndexingConfig;
use crate::utils::massindex_toml::MassIndexToml;
use crate::utils::{apply_file_to_config, load_massindex_toml, setup_logging};

/// Defaults, then `.massindex.toml`, then flags.
fn setup_config(cli: &Cli, file: Option<&MassIndexToml>) -> MassIndexingConfig {
    let mut cfg = MassIndexingConfig::default();
    if let Some(file) = file {
        apply_file_to_config(file, &mut cfg);
    }
    if let Some(n) = cli.threads {
        cfg.threads_to_load_objects = n;
    }
    if let Some(n) = cli.batch_size {
        cfg.batch_size_to_load_objects = n;
    }
    if let Some(n) = cli.id_fetch_size {
        cfg.id_fetch_size = n;
    }
    if let Some(n) = cli.parallelism {
        cfg.type_group_parallelism = n;
    }
    if cli.no_purge {
        cfg.purge_all_on_start = false;
    }
    if let Some(b) = cli.merge_on_finish {
        cfg.merge_segments_on_finish = b;
    }
    if let Some(b) = cli.drop_schema {
        cfg.drop_and_create_schema_on_start = b;
    }
    cfg
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    info!(
        "{} {} documents ({} loaded, {} built, ~{} expected) in {:.2}s{}",
        if dry_run { "Indexed (dry run)" } else { "Indexed" },
        summary.added,
        summary.loaded,
        summary.built,
        summary.total,
        summary.elapsed.as_secs_f64(),
        if summary.entity_failures > 0 {
            format!(", {} entity failures", summary.entity_failures)
        } else {
            String::new()
        }
    );
}

/// Run a mass indexing job for the CLI. Ctrl+C cancels the run.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let file = load_massindex_toml(&cli.data_dir);
    let verbose = cli
        .verbose
        .or_else(|| file.as_ref().and_then(|f| f.verbose()))
        .unwrap_or(false);
    setup_logging(verbose);
    let cfg = setup_config(cli, file.as_ref());

    let source = JsonLinesSource::open_dir(&cli.data_dir)?;
    let groups = source.type_groups();
    if groups.is_empty() {
        warn!("No *.jsonl files in {}; nothing to index.", cli.data_dir.display());
        return Ok(());
    }

    let backend: Arc<dyn IndexBackend> = if cli.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. DOCUMENTS ARE INDEXED IN MEMORY ONLY.");
        Arc::new(InMemoryBackend::new())
    } else {
        let index_dir = cli.index_dir_or(file.as_ref().and_then(|f| f.index_dir()));
        debug!("Writing indexes to {}", index_dir.display());
        Arc::new(SegmentDirBackend::open(&index_dir)?)
    };

    let show_bar = cli
        .progress
        .or_else(|| file.as_ref().and_then(|f| f.progress()))
        .unwrap_or(false);
    let monitor: Arc<dyn MassIndexingMonitor> = if show_bar {
        Arc::new(ProgressBarMonitor::default())
    } else {
        Arc::new(LoggingMonitor::new(cfg.log_every))
    };

    let handle = MassIndexer::new(
        Arc::new(source),
        Arc::new(JsonDocumentBuilder::default()),
        backend,
        groups,
        cfg,
    )
    .monitor(monitor)
    .start()?;

    let cancel = handle.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("Interrupted, stopping mass indexing...");
        cancel.cancel();
    })
    .context("install Ctrl+C handler")?;

    let summary = handle.wait()?;
    print_summary(&summary, cli.dry_run);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::massindex_toml::parse_massindex_toml;
    use clap::Parser;
    use std::path::Path;

    #[test]
    fn test_flags_override_file() {
        let file = parse_massindex_toml(
            "[settings]\nthreads = 2\nbatch_size = 50\npurge = true\n",
            Path::new("t.toml"),
        );
        let cli = Cli::try_parse_from(["massindex", "data", "--threads", "5", "--no-purge"]).unwrap();
        let cfg = setup_config(&cli, file.as_ref());
        assert_eq!(cfg.threads_to_load_objects, 5);
        assert_eq!(cfg.batch_size_to_load_objects, 50);
        assert!(!cfg.purge_all_on_start);
    }
}
