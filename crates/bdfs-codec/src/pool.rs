//! Bounded decode worker pool.
//!
//! Decoding is CPU-bound, so it runs on a fixed set of OS threads rather than
//! on the async runtime. Each submitted job moves its stored bytes into the
//! worker's queue; the decoded buffer is moved back through a single result
//! channel. Jobs are dispatched round-robin.
//!
//! Waiters are kept in a pending table keyed by task key. Entries are inserted
//! by the submitting task and removed by the collector task; worker threads
//! never touch the table.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::codec::{Codec, decode_payload};
use crate::error::{CodecError, Result};

/// Default number of decode workers.
pub const DEFAULT_WORKERS: usize = 16;

type Waiter = oneshot::Sender<Result<Vec<u8>>>;
type PendingTable = Arc<Mutex<HashMap<u64, Waiter>>>;

struct Job {
    key: u64,
    data: Vec<u8>,
    size: usize,
}

/// Fixed-size pool of decode workers.
///
/// Must be created inside a Tokio runtime; the result collector runs as a
/// task on it. Dropping the pool closes the worker queues and the threads
/// exit once their current job is done.
pub struct CodecPool {
    queues: Vec<std_mpsc::Sender<Job>>,
    next: AtomicUsize,
    pending: PendingTable,
}

impl CodecPool {
    /// Start `workers` decode threads sharing `codec`.
    pub fn new(codec: Arc<dyn Codec>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let mut queues = Vec::with_capacity(workers);
        for index in 0..workers {
            let (queue_tx, queue_rx) = std_mpsc::channel::<Job>();
            let codec = Arc::clone(&codec);
            let results = results_tx.clone();
            thread::Builder::new()
                .name(format!("bdfs-codec-{index}"))
                .spawn(move || run_worker(codec.as_ref(), &queue_rx, &results))?;
            queues.push(queue_tx);
        }
        drop(results_tx);

        tokio::spawn(collect_results(results_rx, Arc::clone(&pending)));
        debug!("started {workers} codec workers");

        Ok(Self {
            queues,
            next: AtomicUsize::new(0),
            pending,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.queues.len()
    }

    /// Number of tasks waiting for a result.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Decode `data` on the next worker and wait for the result.
    ///
    /// `key` identifies the task in the pending table and must not be shared
    /// with another in-flight task.
    pub async fn decode(&self, key: u64, data: Vec<u8>, size: usize) -> Result<Vec<u8>> {
        let (waiter, result) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            match pending.entry(key) {
                Entry::Occupied(_) => return Err(CodecError::DuplicateTask(key)),
                Entry::Vacant(slot) => {
                    slot.insert(waiter);
                }
            }
        }

        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        if self.queues[slot].send(Job { key, data, size }).is_err() {
            self.pending.lock().remove(&key);
            return Err(CodecError::PoolClosed);
        }

        result.await.map_err(|_| CodecError::PoolClosed)?
    }
}

fn run_worker(
    codec: &dyn Codec,
    queue: &std_mpsc::Receiver<Job>,
    results: &mpsc::UnboundedSender<(u64, Result<Vec<u8>>)>,
) {
    while let Ok(Job { key, data, size }) = queue.recv() {
        let result = catch_unwind(AssertUnwindSafe(|| decode_payload(codec, data, size)))
            .unwrap_or(Err(CodecError::WorkerPanicked(key)));
        if results.send((key, result)).is_err() {
            break;
        }
    }
}

async fn collect_results(
    mut results: mpsc::UnboundedReceiver<(u64, Result<Vec<u8>>)>,
    pending: PendingTable,
) {
    while let Some((key, result)) = results.recv().await {
        let waiter = pending.lock().remove(&key);
        match waiter {
            // The waiter may have been dropped; nothing to deliver then.
            Some(waiter) => drop(waiter.send(result)),
            None => error!("decode result for unknown task {key:016x}"),
        }
    }
}
