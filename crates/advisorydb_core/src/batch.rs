//! Coalescing of concurrent batch updates into shared commits.
//!
//! The first caller to arrive becomes the leader of a new batch and waits
//! up to `max_batch_delay` for others to join. The batch runs when the delay
//! expires or when a joining caller fills it to `max_batch_size`, whichever
//! comes first, and every queued function executes inside one write
//! transaction.
//!
//! When a function fails, the attempt is rolled back, that function is told
//! to run again alone, and the rest are retried together. Functions may
//! therefore run more than once and must not have effects outside the
//! transaction.

use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use crate::transaction::WriteTx;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A batch function.
pub(crate) type BatchFn = Arc<dyn Fn(&mut WriteTx) -> CoreResult<()> + Send + Sync>;

enum Outcome {
    Done(CoreResult<()>),
    RunSolo,
}

/// Where the batch runner hands a caller its result.
struct Completion {
    slot: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Stores `outcome` unless one is already set.
    fn finish(&self, outcome: Outcome) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_one();
        }
    }

    fn wait(&self) -> Outcome {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.ready.wait(&mut slot);
        }
    }
}

struct Call {
    f: BatchFn,
    done: Arc<Completion>,
}

impl Drop for Call {
    fn drop(&mut self) {
        // No-op once the runner has answered; otherwise the caller would wait forever.
        self.done.finish(Outcome::Done(Err(CoreError::Panicked {
            message: "batch abandoned before completion".to_string(),
        })));
    }
}

struct Pending {
    id: u64,
    calls: Vec<Call>,
}

/// Collects concurrent [`Store::batch_update`] calls.
pub(crate) struct Batcher {
    state: Mutex<Option<Pending>>,
    joined: Condvar,
    next_id: Mutex<u64>,
    max_size: usize,
    max_delay: Duration,
}

impl Batcher {
    pub(crate) fn new(max_size: usize, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(None),
            joined: Condvar::new(),
            next_id: Mutex::new(0),
            max_size,
            max_delay,
        }
    }

    fn enabled(&self) -> bool {
        self.max_size > 0 && !self.max_delay.is_zero()
    }

    /// Runs `f` as part of a batch and returns its own result.
    pub(crate) fn run(&self, store: &Store, f: BatchFn) -> CoreResult<()> {
        if !self.enabled() {
            return store.update(|tx| invoke(&f, tx));
        }

        let done = Arc::new(Completion::new());
        let call = Call {
            f: Arc::clone(&f),
            done: Arc::clone(&done),
        };

        let mut state = self.state.lock();
        match state.as_mut() {
            Some(pending) => {
                pending.calls.push(call);
                if pending.calls.len() >= self.max_size {
                    let full = state.take();
                    drop(state);
                    self.joined.notify_all();
                    if let Some(full) = full {
                        run_calls(store, full.calls);
                    }
                } else {
                    drop(state);
                }
            }
            None => {
                let id = {
                    let mut next = self.next_id.lock();
                    *next += 1;
                    *next
                };
                *state = Some(Pending {
                    id,
                    calls: vec![call],
                });

                let deadline = Instant::now() + self.max_delay;
                loop {
                    let ours = matches!(state.as_ref(), Some(p) if p.id == id);
                    if !ours {
                        // A joiner filled the batch and ran it.
                        break;
                    }
                    let full = state.as_ref().map_or(0, |p| p.calls.len()) >= self.max_size;
                    if full || Instant::now() >= deadline {
                        let batch = state.take();
                        drop(state);
                        if let Some(batch) = batch {
                            run_calls(store, batch.calls);
                        }
                        break;
                    }
                    self.joined.wait_until(&mut state, deadline);
                }
            }
        }

        match done.wait() {
            Outcome::Done(result) => result,
            Outcome::RunSolo => {
                debug!("re-running failed batch function alone");
                store.update(|tx| invoke(&f, tx))
            }
        }
    }
}

/// Runs `calls` in one transaction, peeling off failing calls until the
/// rest commit together.
fn run_calls(store: &Store, mut calls: Vec<Call>) {
    while !calls.is_empty() {
        let mut failed = None;
        let result = store.update(|tx| {
            for (index, call) in calls.iter().enumerate() {
                if let Err(e) = invoke(&call.f, tx) {
                    failed = Some(index);
                    return Err(e);
                }
            }
            Ok(())
        });

        match (result, failed) {
            (Ok(()), _) => {
                for call in calls.drain(..) {
                    call.done.finish(Outcome::Done(Ok(())));
                }
            }
            (Err(e), Some(index)) => {
                debug!(
                    error = %e,
                    remaining = calls.len() - 1,
                    "batch function failed; retrying the rest"
                );
                let call = calls.remove(index);
                call.done.finish(Outcome::RunSolo);
            }
            (Err(e), None) => {
                let shared = Arc::new(e);
                for call in calls.drain(..) {
                    call.done.finish(Outcome::Done(Err(CoreError::Batch {
                        source: Arc::clone(&shared),
                    })));
                }
            }
        }
    }
}

/// Calls `f`, turning a panic into an error.
fn invoke(f: &BatchFn, tx: &mut WriteTx) -> CoreResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| f(tx))) {
        Ok(result) => result,
        Err(payload) => Err(CoreError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketPath;
    use crate::config::StoreOptions;
    use crate::transaction::BucketView;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn store(max_size: usize, delay_ms: u64) -> Arc<Store> {
        let options = StoreOptions::default()
            .max_batch_size(max_size)
            .max_batch_delay(Duration::from_millis(delay_ms));
        let backend = Box::new(advisorydb_storage::InMemoryBackend::new());
        Arc::new(Store::open_with_backend(backend, options).unwrap())
    }

    fn put_fn(key: String) -> impl Fn(&mut WriteTx) -> CoreResult<()> + Send + Sync + 'static {
        move |tx: &mut WriteTx| {
            let path = BucketPath::root("vulnerability")?;
            tx.put(&path, &key, "detail")
        }
    }

    #[test]
    fn concurrent_calls_share_commits() {
        let store = store(100, 50);
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.batch_update(put_fn(format!("CVE-2024-{i:04}")))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let path = BucketPath::root("vulnerability").unwrap();
        store
            .view(|tx| {
                assert_eq!(tx.bucket(&path).unwrap().len(), threads);
                Ok(())
            })
            .unwrap();
        assert!(store.stats().unwrap().sequence.as_u64() < threads as u64);
    }

    #[test]
    fn failing_call_does_not_sink_the_batch() {
        let store = store(100, 50);
        let barrier = Arc::new(Barrier::new(3));

        let spawn = |f: BatchFn| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.batch_update(move |tx| f(tx))
            })
        };

        let ok_a = spawn(Arc::new(put_fn("CVE-A".into())));
        let ok_b = spawn(Arc::new(put_fn("CVE-B".into())));
        let bad = spawn(Arc::new(|tx: &mut WriteTx| -> CoreResult<()> {
            tx.put(&BucketPath::root("vulnerability")?, "CVE-BAD", "partial")?;
            Err(CoreError::KeyRequired)
        }));

        ok_a.join().unwrap().unwrap();
        ok_b.join().unwrap().unwrap();
        let err = bad.join().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::KeyRequired));

        let path = BucketPath::root("vulnerability").unwrap();
        assert!(store.get(&path, "CVE-A").unwrap().is_some());
        assert!(store.get(&path, "CVE-B").unwrap().is_some());
        assert!(store.get(&path, "CVE-BAD").unwrap().is_none());
    }

    #[test]
    fn panic_becomes_error() {
        let store = store(10, 1);
        let err = store
            .batch_update(|_tx| -> CoreResult<()> { panic!("feed parser exploded") })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Panicked { ref message } if message == "feed parser exploded"
        ));
        // The store keeps working.
        store.batch_update(put_fn("CVE-1".into())).unwrap();
    }

    #[test]
    fn disabled_batching_runs_directly() {
        let store = store(0, 0);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        store
            .batch_update(move |tx| {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.put(&BucketPath::root("vulnerability")?, "CVE-1", "x")
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().unwrap().sequence.as_u64(), 1);
    }

    #[test]
    fn full_batch_runs_before_delay() {
        let store = store(2, 10_000);
        let barrier = Arc::new(Barrier::new(2));
        let started = Instant::now();
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.batch_update(put_fn(format!("CVE-{i}")))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u32), "unknown panic");
    }
}
