// src/inbox.rs

//! Inbox watching and deposit dispatch
//!
//! Every immediate subdirectory of an inbox is a deposit. The watcher thread
//! only discovers directories and queues them; a fixed pool of worker threads
//! runs the [`DepositProcessor`] on whatever arrives on the queue. A directory
//! is dispatched at most once per watcher.

use crate::error::{Error, Result};
use crate::outbox::Outbox;
use crate::pipeline::DepositProcessor;
use std::collections::BTreeSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One queued deposit
#[derive(Debug)]
struct Job {
    path: PathBuf,
    outbox: Outbox,
}

/// Fixed set of threads draining the job queue
struct WorkerPool {
    sender: Option<flume::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn start(size: usize, processor: Arc<DepositProcessor>) -> Result<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size.max(1) {
            let receiver = receiver.clone();
            let processor = Arc::clone(&processor);
            let handle = thread::Builder::new()
                .name(format!("bagforge-worker-{index}"))
                .spawn(move || worker_loop(index, &receiver, &processor))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    fn sender(&self) -> Result<flume::Sender<Job>> {
        self.sender
            .clone()
            .ok_or_else(|| Error::InvalidArgument("ingest area is shut down".to_string()))
    }

    /// Stop accepting work and wait until the queue is drained
    fn shutdown(&mut self) {
        self.sender = None;
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                error!("[ingest] Worker thread panicked: {:?}", e);
            }
        }
    }
}

fn worker_loop(index: usize, receiver: &flume::Receiver<Job>, processor: &DepositProcessor) {
    debug!("[ingest] Worker {} started", index);

    // Ends once every sender is gone and the queue is empty
    while let Ok(job) = receiver.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            processor.process(&job.path, &job.outbox)
        }));
        match outcome {
            Ok(Ok(outcome)) => info!(
                "[ingest] {} finished as {}: {}",
                outcome.deposit_id, outcome.state, outcome.message
            ),
            Ok(Err(e)) => error!(
                "[ingest] Could not finish {}: {}",
                job.path.display(),
                e
            ),
            Err(panic) => error!(
                "[ingest] Processing {} panicked: {}",
                job.path.display(),
                panic_message(panic.as_ref())
            ),
        }
    }

    debug!("[ingest] Worker {} stopped", index);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Immediate subdirectories of `dir`, sorted by name
fn deposit_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Handle of a running inbox watcher
pub struct WatchHandle {
    inbox: PathBuf,
    running: Arc<AtomicBool>,
    stop: flume::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop polling and wait for the watcher thread
    ///
    /// Deposits already queued are still processed by the pool.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop.try_send(());
        if let Some(handle) = self.thread.take() {
            if let Err(e) = handle.join() {
                error!("[ingest] Watcher thread panicked: {:?}", e);
            }
            info!("[ingest] Stopped watching {}", self.inbox.display());
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Inbox directories plus the workers that process their deposits
pub struct IngestArea {
    inboxes: Vec<PathBuf>,
    poll_interval: Duration,
    pool: WorkerPool,
}

impl IngestArea {
    /// Start `workers` threads running `processor`
    pub fn new(
        inboxes: Vec<PathBuf>,
        poll_interval: Duration,
        workers: usize,
        processor: Arc<DepositProcessor>,
    ) -> Result<Self> {
        let pool = WorkerPool::start(workers, processor)?;
        info!(
            "[ingest] {} inbox(es), {} worker(s), polling every {:?}",
            inboxes.len(),
            pool.workers.len(),
            poll_interval
        );
        Ok(Self {
            inboxes,
            poll_interval,
            pool,
        })
    }

    /// Watch `inbox` for new deposit directories
    ///
    /// Directories present at startup are dispatched first, in name order.
    pub fn start_watch(&self, inbox: &Path, outbox: Outbox) -> Result<WatchHandle> {
        if !inbox.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "inbox {} is not a directory",
                inbox.display()
            )));
        }
        if !outbox.is_initialized() {
            return Err(Error::OutboxNotInitialized(outbox.root().to_path_buf()));
        }

        let sender = self.pool.sender()?;
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let interval = self.poll_interval;
        let dir = inbox.to_path_buf();
        let thread_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("bagforge-watcher".to_string())
            .spawn(move || {
                info!("[ingest] Watching {}", dir.display());
                let mut seen: BTreeSet<PathBuf> = BTreeSet::new();

                while thread_running.load(Ordering::SeqCst) {
                    match deposit_dirs(&dir) {
                        Ok(found) => {
                            // Forget directories that left the inbox so a
                            // later deposit with the same name is picked up
                            seen.retain(|p| found.contains(p));
                            for path in found {
                                if !seen.insert(path.clone()) {
                                    continue;
                                }
                                debug!("[ingest] New deposit {}", path.display());
                                let job = Job {
                                    path,
                                    outbox: outbox.clone(),
                                };
                                if sender.send(job).is_err() {
                                    warn!("[ingest] Worker pool is gone, watcher exits");
                                    thread_running.store(false, Ordering::SeqCst);
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("[ingest] Cannot scan {}: {}", dir.display(), e),
                    }

                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
                        Err(flume::RecvTimeoutError::Timeout) => {}
                    }
                }
            })?;

        Ok(WatchHandle {
            inbox: inbox.to_path_buf(),
            running,
            stop: stop_tx,
            thread: Some(handle),
        })
    }

    /// Dispatch one deposit, or every deposit of a batch directory
    ///
    /// `path` must lie strictly inside one of the configured inboxes. A batch
    /// gets its own sub-outbox named after the batch directory.
    pub fn ingest(&self, path: &Path, outbox: &Outbox, batch: bool) -> Result<usize> {
        let path = path.canonicalize().map_err(|e| {
            Error::InvalidArgument(format!("cannot resolve {}: {e}", path.display()))
        })?;
        let inside_inbox = self.inboxes.iter().any(|inbox| {
            let inbox = inbox.canonicalize().unwrap_or_else(|_| inbox.clone());
            path.starts_with(&inbox) && path != inbox
        });
        if !inside_inbox {
            return Err(Error::InvalidArgument(format!(
                "{} is not inside a configured inbox",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let sender = self.pool.sender()?;
        if !batch {
            if !outbox.is_initialized() {
                return Err(Error::OutboxNotInitialized(outbox.root().to_path_buf()));
            }
            send(&sender, path, outbox.clone())?;
            return Ok(1);
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("bad batch name: {}", path.display())))?;
        let mut batch_outbox = outbox.sub_outbox(name)?;
        batch_outbox.init(false)?;

        let deposits = deposit_dirs(&path)?;
        info!(
            "[ingest] Batch {} with {} deposit(s) into {}",
            name,
            deposits.len(),
            batch_outbox.root().display()
        );
        for deposit in &deposits {
            send(&sender, deposit.clone(), batch_outbox.clone())?;
        }
        Ok(deposits.len())
    }

    /// Stop admitting work and wait for queued deposits to finish
    ///
    /// Every [`WatchHandle`] must be stopped first; a running watcher keeps
    /// the queue open.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
        info!("[ingest] All workers stopped");
    }
}

impl Drop for IngestArea {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

fn send(sender: &flume::Sender<Job>, path: PathBuf, outbox: Outbox) -> Result<()> {
    debug!("[ingest] Queueing {}", path.display());
    sender
        .send(Job { path, outbox })
        .map_err(|_| Error::InvalidArgument("worker pool is not running".to_string()))
}
