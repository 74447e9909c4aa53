//! Progress monitoring: the monitor trait, a logging monitor, a kdam progress bar, and the tracker
//! that keeps run counters and forwards to the monitor.

use kdam::{Animation, Bar, BarExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::types::ProgressCounters;
use crate::utils::lock_or_recover;

/// Passive observer of a run. Called from every pipeline thread; keep it cheap.
pub trait MassIndexingMonitor: Send + Sync {
    fn entities_loaded(&self, _n: u64) {}
    fn documents_built(&self, _n: u64) {}
    fn documents_added(&self, _n: u64) {}
    fn add_to_total_count(&self, _n: u64) {}
    fn indexing_completed(&self) {}
}

#[derive(Debug, Default)]
pub struct NoopMonitor;

impl MassIndexingMonitor for NoopMonitor {}

/// Logs progress every `log_every` added documents, with rate and percentage of the estimate.
pub struct LoggingMonitor {
    log_every: u64,
    started: Instant,
    added: AtomicU64,
    total: AtomicU64,
}

impl LoggingMonitor {
    pub fn new(log_every: u64) -> Self {
        Self {
            log_every: log_every.max(1),
            started: Instant::now(),
            added: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    fn report(&self, done: u64) {
        let secs = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let total = self.total.load(Ordering::Relaxed);
        let rate = done as f64 / secs;
        if total > 0 {
            log::info!(
                "{} documents indexed in {:.1}s ({:.0}/s, {:.1}% of ~{})",
                done,
                secs,
                rate,
                done as f64 * 100.0 / total as f64,
                total
            );
        } else {
            log::info!("{} documents indexed in {:.1}s ({:.0}/s)", done, secs, rate);
        }
    }
}

impl MassIndexingMonitor for LoggingMonitor {
    fn documents_added(&self, n: u64) {
        let before = self.added.fetch_add(n, Ordering::Relaxed);
        let after = before + n;
        if after / self.log_every > before / self.log_every {
            self.report(after);
        }
    }

    fn add_to_total_count(&self, n: u64) {
        let total = self.total.fetch_add(n, Ordering::Relaxed) + n;
        log::debug!("estimated total to index: {}", total);
    }

    fn indexing_completed(&self) {
        self.report(self.added.load(Ordering::Relaxed));
    }
}

/// Progress bar over added documents. The total grows as type groups report their estimates.
pub struct ProgressBarMonitor {
    bar: Arc<Mutex<Bar>>,
}

impl ProgressBarMonitor {
    pub fn new(desc: &'static str) -> Self {
        Self {
            bar: Arc::new(Mutex::new(kdam::tqdm!(
                total = 0,
                desc = desc,
                animation = Animation::Classic,
                unit = " docs"
            ))),
        }
    }
}

impl Default for ProgressBarMonitor {
    fn default() -> Self {
        Self::new("Indexing")
    }
}

impl MassIndexingMonitor for ProgressBarMonitor {
    fn documents_added(&self, n: u64) {
        let _ = lock_or_recover(&self.bar).update(n as usize);
    }

    fn add_to_total_count(&self, n: u64) {
        let mut bar = lock_or_recover(&self.bar);
        bar.total += n as usize;
        let _ = bar.refresh();
    }

    fn indexing_completed(&self) {
        let _ = lock_or_recover(&self.bar).refresh();
        eprintln!();
    }
}

/// Run counters plus the configured monitor. Every pipeline stage reports through this.
pub struct ProgressTracker {
    counters: ProgressCounters,
    monitor: Arc<dyn MassIndexingMonitor>,
}

impl ProgressTracker {
    pub fn new(monitor: Arc<dyn MassIndexingMonitor>) -> Self {
        Self {
            counters: ProgressCounters::default(),
            monitor,
        }
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    pub fn entities_loaded(&self, n: u64) {
        if n > 0 {
            self.counters.add_loaded(n);
            self.monitor.entities_loaded(n);
        }
    }

    pub fn documents_built(&self, n: u64) {
        if n > 0 {
            self.counters.add_built(n);
            self.monitor.documents_built(n);
        }
    }

    pub fn documents_added(&self, n: u64) {
        if n > 0 {
            self.counters.add_added(n);
            self.monitor.documents_added(n);
        }
    }

    pub fn add_to_total_count(&self, n: u64) {
        self.counters.add_total(n);
        self.monitor.add_to_total_count(n);
    }

    pub fn indexing_completed(&self) {
        self.monitor.indexing_completed();
    }
}
