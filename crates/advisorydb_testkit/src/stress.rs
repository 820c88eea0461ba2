//! Stress tests for AdvisoryDB.
//!
//! These runs hammer the store with concurrent batch writers and readers
//! and count what went wrong.

use advisorydb_core::{BucketPath, BucketView, ScanSpec, Store};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Reads that saw part of a batch.
    pub torn_reads: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, torn_reads: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            torn_reads,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Torn reads: {}", self.torn_reads);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Batches submitted per writer thread.
    pub batches_per_thread: usize,
    /// Number of concurrent writer threads.
    pub threads: usize,
    /// Records written by each batch.
    pub records_per_batch: usize,
    /// Size of each record in bytes.
    pub value_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            batches_per_thread: 50,
            threads: 4,
            records_per_batch: 8,
            value_size: 128,
        }
    }
}

/// Root bucket the stress writers fill.
pub const STRESS_ROOT: &str = "stress::writers";

/// Runs concurrent [`Store::batch_update`] writers; each batch writes
/// `records_per_batch` keys under `STRESS_ROOT/<thread>`.
pub fn stress_batch_writers(store: Arc<Store>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                for b in 0..config.batches_per_thread {
                    let value = vec![0xABu8; config.value_size];
                    let records = config.records_per_batch;
                    let result = store.batch_update(move |tx| {
                        let path = BucketPath::new([STRESS_ROOT.to_string(), format!("t{t}")])?;
                        for r in 0..records {
                            tx.put_bytes(&path, format!("b{b:05}-r{r:03}"), value.clone())?;
                        }
                        Ok(())
                    });
                    match result {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        0,
        start.elapsed(),
    )
}

/// Runs [`stress_batch_writers`] while `readers` threads scan the store.
///
/// Every scan must see whole batches only: the number of keys of each
/// writer is a multiple of `records_per_batch`. Scans that do not are
/// counted as torn reads.
pub fn stress_scans_during_writes(
    store: Arc<Store>,
    config: &StressConfig,
    readers: usize,
) -> StressTestResult {
    let stop = Arc::new(AtomicBool::new(false));
    let torn = Arc::new(AtomicUsize::new(0));
    let scans = Arc::new(AtomicUsize::new(0));

    let reader_handles: Vec<_> = (0..readers)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            let torn = Arc::clone(&torn);
            let scans = Arc::clone(&scans);
            let threads = config.threads;
            let per_batch = config.records_per_batch.max(1);

            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let snapshot_ok = store.view(|tx| {
                        Ok((0..threads).all(|t| {
                            let path = BucketPath::new([STRESS_ROOT.to_string(), format!("t{t}")]);
                            let count = path
                                .ok()
                                .and_then(|p| tx.bucket(&p).map(|b| b.len()))
                                .unwrap_or(0);
                            count % per_batch == 0
                        }))
                    });
                    // Prefix scans must agree with their snapshot too.
                    let scan_ok = ScanSpec::new("stress::", ["t0"])
                        .and_then(|spec| store.for_each(&spec))
                        .map(|values| values.len() % per_batch == 0);
                    if !matches!(snapshot_ok, Ok(true)) || !matches!(scan_ok, Ok(true)) {
                        torn.fetch_add(1, Ordering::Relaxed);
                    }
                    scans.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let writes = stress_batch_writers(Arc::clone(&store), config);
    stop.store(true, Ordering::Relaxed);
    for handle in reader_handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        writes.successful_ops + scans.load(Ordering::Relaxed),
        writes.failed_ops,
        torn.load(Ordering::Relaxed),
        writes.duration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisorydb_core::StoreOptions;

    fn small() -> StressConfig {
        StressConfig {
            batches_per_thread: 10,
            threads: 4,
            records_per_batch: 5,
            value_size: 32,
        }
    }

    #[test]
    fn test_batch_writers() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = small();
        let result = stress_batch_writers(Arc::clone(&store), &config);
        result.print_summary("batch writers");

        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 40);
        let path = BucketPath::new([STRESS_ROOT, "t3"]).unwrap();
        let count = store.view(|tx| Ok(tx.bucket(&path).map_or(0, |b| b.len()))).unwrap();
        assert_eq!(count, 50);
    }

    #[test]
    fn test_scans_never_see_partial_batches() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::default().no_sync(true);
        let store = Arc::new(Store::open(dir.path(), options).unwrap());
        let result = stress_scans_during_writes(store, &small(), 2);
        result.print_summary("scans during writes");

        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.torn_reads, 0);
    }
}
