//! Bounded analysis worker pool
//!
//! A fixed set of named worker threads consumes jobs from a bounded
//! crossbeam channel. Admission is decided up front by reserving a slot on
//! an atomic in-flight counter, so callers get `Busy` immediately instead of
//! blocking on a full queue. The slot is released by a guard that travels
//! with the job and drops when the job finishes or is discarded.
//!
//! A ticket that times out cancels its job: the analysis stops at its next
//! stage boundary, and dropping the pool does not wait for it.

use crate::error::{BeatkeyError, Result};
use crate::pipeline::Analyzer;
use crate::types::{AnalysisReport, Waveform};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

// Job status, shared between a job and its ticket
const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const FINISHED: u8 = 2;

/// How long dropping the pool waits for idle workers to exit
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);
const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

/// Worker and queue sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Analyses running at the same time
    pub worker_limit: usize,
    /// Analyses allowed to wait for a free worker
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_limit: 3,
            queue_capacity: 8,
        }
    }
}

impl PoolConfig {
    /// Total jobs admitted at once, running plus queued
    pub fn capacity(&self) -> usize {
        self.worker_limit + self.queue_capacity
    }
}

/// Where a job landed when it was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Running,
    /// Behind `position` other jobs waiting for a worker
    Queued { position: usize },
}

enum JobInput {
    Waveform(Waveform),
    File(PathBuf),
}

struct Job {
    input: JobInput,
    reply: Sender<Result<AnalysisReport>>,
    slot: InFlightGuard,
}

/// Holds one in-flight slot for a job and marks the job finished on drop
struct InFlightGuard {
    status: Arc<AtomicU8>,
    in_flight: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELLED
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.status.swap(FINISHED, Ordering::AcqRel) == CANCELLED {
            self.abandoned.fetch_sub(1, Ordering::AcqRel);
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle on a submitted analysis
#[derive(Debug)]
pub struct Ticket {
    admission: Admission,
    in_flight: usize,
    receiver: Receiver<Result<AnalysisReport>>,
    status: Arc<AtomicU8>,
    abandoned: Arc<AtomicUsize>,
}

impl Ticket {
    pub fn admission(&self) -> Admission {
        self.admission
    }

    /// In-flight count right after this job was admitted
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Block until the analysis finishes
    pub fn wait(self) -> Result<AnalysisReport> {
        self.receiver.recv().map_err(|_| worker_gone())?
    }

    /// Block for at most `timeout`
    ///
    /// On `Timeout` the job is cancelled. It keeps its slot until the worker
    /// reaches the next stage boundary (or dequeues it); waiting on the
    /// ticket again then yields `Cancelled`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<AnalysisReport> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.cancel();
                Err(BeatkeyError::Timeout {
                    seconds: timeout.as_secs_f64(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(worker_gone()),
        }
    }

    /// Ask the worker to stop this job
    pub fn cancel(&self) {
        // Counted before the status flips so the guard never releases first
        self.abandoned.fetch_add(1, Ordering::AcqRel);
        if self
            .status
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.abandoned.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

fn worker_gone() -> BeatkeyError {
    BeatkeyError::WorkerFailed {
        reason: "worker exited without a result".to_string(),
    }
}

/// Fixed-size pool of analysis workers with admission control
pub struct AnalysisPool {
    config: PoolConfig,
    in_flight: Arc<AtomicUsize>,
    /// Cancelled jobs still holding a slot
    abandoned: Arc<AtomicUsize>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl AnalysisPool {
    pub fn new(analyzer: Analyzer, config: PoolConfig) -> Result<Self> {
        if config.worker_limit == 0 {
            return Err(BeatkeyError::ConfigError(
                "worker limit must be at least 1".to_string(),
            ));
        }

        let analyzer = Arc::new(analyzer);
        let (sender, receiver) = bounded::<Job>(config.capacity());

        let mut workers = Vec::with_capacity(config.worker_limit);
        for i in 0..config.worker_limit {
            let jobs = receiver.clone();
            let analyzer = Arc::clone(&analyzer);
            let handle = thread::Builder::new()
                .name(format!("beatkey-worker-{}", i))
                .spawn(move || worker_loop(jobs, analyzer))
                .map_err(|e| BeatkeyError::WorkerFailed {
                    reason: format!("failed to spawn worker thread: {}", e),
                })?;
            workers.push(handle);
        }

        debug!(
            "Analysis pool started: {} workers, {} queue slots",
            config.worker_limit, config.queue_capacity
        );

        Ok(Self {
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            abandoned: Arc::new(AtomicUsize::new(0)),
            sender: Some(sender),
            workers,
        })
    }

    /// Analyze an in-memory waveform
    pub fn submit(&self, waveform: Waveform) -> Result<Ticket> {
        self.enqueue(JobInput::Waveform(waveform))
    }

    /// Decode and analyze a file on a worker
    pub fn submit_file(&self, path: impl Into<PathBuf>) -> Result<Ticket> {
        self.enqueue(JobInput::File(path.into()))
    }

    /// Jobs admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Cancelled jobs whose worker has not yet let go of them
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn enqueue(&self, input: JobInput) -> Result<Ticket> {
        let sender = self.sender.as_ref().ok_or_else(|| BeatkeyError::WorkerFailed {
            reason: "pool is shut down".to_string(),
        })?;

        let status = Arc::new(AtomicU8::new(PENDING));
        let (slot, in_flight) = self.reserve(&status)?;
        let (reply, receiver) = bounded(1);

        match sender.try_send(Job { input, reply, slot }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                drop(job);
                return Err(BeatkeyError::Busy {
                    in_flight: self.in_flight(),
                    capacity: self.capacity(),
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(BeatkeyError::WorkerFailed {
                    reason: "pool is shut down".to_string(),
                });
            }
        }

        let admission = if in_flight <= self.config.worker_limit {
            Admission::Running
        } else {
            Admission::Queued {
                position: in_flight - self.config.worker_limit,
            }
        };
        trace!("Admitted job ({:?}, {} in flight)", admission, in_flight);

        Ok(Ticket {
            admission,
            in_flight,
            receiver,
            status,
            abandoned: Arc::clone(&self.abandoned),
        })
    }

    /// Claim a slot, or report `Busy` without touching the counter
    fn reserve(&self, status: &Arc<AtomicU8>) -> Result<(InFlightGuard, usize)> {
        let capacity = self.capacity();
        match self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            }) {
            Ok(previous) => {
                let guard = InFlightGuard {
                    status: Arc::clone(status),
                    in_flight: Arc::clone(&self.in_flight),
                    abandoned: Arc::clone(&self.abandoned),
                };
                Ok((guard, previous + 1))
            }
            Err(current) => Err(BeatkeyError::Busy {
                in_flight: current,
                capacity,
            }),
        }
    }
}

impl Drop for AnalysisPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains
        drop(self.sender.take());

        // Live jobs are waited for; cancelled ones only until they are the
        // last jobs left
        while self.in_flight() > self.abandoned() {
            thread::sleep(SHUTDOWN_POLL);
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(SHUTDOWN_POLL);
            }
            if !handle.is_finished() {
                warn!("Detaching {} while it finishes a cancelled analysis", name);
                continue;
            }
            if let Err(panic_info) = handle.join() {
                error!("{} panicked: {}", name, panic_message(panic_info.as_ref()));
            }
        }
        debug!("Analysis pool stopped");
    }
}

fn worker_loop(jobs: Receiver<Job>, analyzer: Arc<Analyzer>) {
    for job in jobs {
        let Job { input, reply, slot } = job;
        let is_cancelled = || slot.is_cancelled();

        let result = if is_cancelled() {
            debug!("Dropping job cancelled while queued");
            Err(BeatkeyError::Cancelled)
        } else {
            panic::catch_unwind(AssertUnwindSafe(|| match &input {
                JobInput::Waveform(waveform) => {
                    analyzer.analyze_cancellable(waveform, &is_cancelled)
                }
                JobInput::File(path) => analyzer.analyze_file_cancellable(path, &is_cancelled),
            }))
            .unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!("Analysis panicked: {}", reason);
                Err(BeatkeyError::WorkerFailed { reason })
            })
        };

        // Free the slot before replying so a woken waiter can resubmit
        drop(slot);

        if reply.send(result).is_err() {
            debug!("Ticket dropped before the analysis finished, discarding result");
        }
    }
}

/// Extract a panic message if possible
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{KeyDetector, Separation, Separator, TempoDetector};
    use crate::pipeline::AnalysisOptions;
    use crate::types::{Key, KeyEstimate, KeyScore, PitchClass, TempoEstimate, TimeWindow};

    /// Blocks every separation until the gate sender is dropped
    struct GatedSeparator {
        gate: Receiver<()>,
    }

    impl Separator for GatedSeparator {
        fn separate(&self, waveform: &Waveform) -> Result<Separation> {
            let _ = self.gate.recv();
            Ok(Separation {
                harmonic: waveform.clone(),
                percussive: waveform.clone(),
            })
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    struct PanickingSeparator;

    impl Separator for PanickingSeparator {
        fn separate(&self, _waveform: &Waveform) -> Result<Separation> {
            panic!("separator exploded")
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct FixedKey;

    impl KeyDetector for FixedKey {
        fn detect(&self, _waveform: &Waveform, _window: TimeWindow) -> Result<KeyEstimate> {
            Ok(KeyEstimate {
                best: KeyScore {
                    key: Key::minor(PitchClass::A),
                    correlation: 0.8,
                },
                alternate: None,
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FixedTempo;

    impl TempoDetector for FixedTempo {
        fn detect(&self, _waveform: &Waveform) -> Result<TempoEstimate> {
            Ok(TempoEstimate {
                bpm: 128.0,
                beats: vec![0],
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn analyzer_with(separator: Arc<dyn Separator>) -> Analyzer {
        let options = AnalysisOptions {
            lead_in_seconds: 0.0,
            ..AnalysisOptions::default()
        };
        Analyzer::with_backends(options, separator, Arc::new(FixedKey), Arc::new(FixedTempo))
    }

    fn gated_pool(worker_limit: usize, queue_capacity: usize) -> (AnalysisPool, Sender<()>) {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let analyzer = analyzer_with(Arc::new(GatedSeparator { gate: gate_rx }));
        let pool = AnalysisPool::new(
            analyzer,
            PoolConfig {
                worker_limit,
                queue_capacity,
            },
        )
        .unwrap();
        (pool, gate_tx)
    }

    fn short_wave() -> Waveform {
        Waveform::new(vec![0.1; 2048], 22050).unwrap()
    }

    #[test]
    fn test_admission_and_busy() {
        let (pool, gate) = gated_pool(2, 1);
        assert_eq!(pool.capacity(), 3);

        let t1 = pool.submit(short_wave()).unwrap();
        let t2 = pool.submit(short_wave()).unwrap();
        let t3 = pool.submit(short_wave()).unwrap();
        assert_eq!(t1.admission(), Admission::Running);
        assert_eq!(t2.admission(), Admission::Running);
        assert_eq!(t3.admission(), Admission::Queued { position: 1 });

        let err = pool.submit(short_wave()).unwrap_err();
        assert!(matches!(
            err,
            BeatkeyError::Busy {
                in_flight: 3,
                capacity: 3
            }
        ));
        // A rejected submission does not leak a slot
        assert_eq!(pool.in_flight(), 3);

        drop(gate);
        for ticket in [t1, t2, t3] {
            let report = ticket.wait().unwrap();
            assert!(report.is_complete());
        }
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_submitters_respect_capacity() {
        let (pool, gate) = gated_pool(2, 2);
        let pool = &pool;

        let tickets: Vec<Ticket> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        (0..5)
                            .filter_map(|_| pool.submit(short_wave()).ok())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        // Nothing can finish while the gate is closed
        assert_eq!(tickets.len(), 4);
        assert!(tickets.iter().all(|t| t.in_flight() <= 4));
        assert_eq!(pool.in_flight(), 4);

        drop(gate);
        for ticket in tickets {
            assert!(ticket.wait().is_ok());
        }
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_wait_timeout_cancels_running_job() {
        let (pool, gate) = gated_pool(1, 0);
        let ticket = pool.submit(short_wave()).unwrap();

        let err = ticket.wait_timeout(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, BeatkeyError::Timeout { .. }));
        // The worker is still inside the separator
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.abandoned(), 1);

        drop(gate);
        assert!(matches!(ticket.wait(), Err(BeatkeyError::Cancelled)));
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.abandoned(), 0);
    }

    #[test]
    fn test_queued_job_cancelled_before_it_starts() {
        let (pool, gate) = gated_pool(1, 1);
        let running = pool.submit(short_wave()).unwrap();
        let queued = pool.submit(short_wave()).unwrap();
        assert_eq!(queued.admission(), Admission::Queued { position: 1 });

        assert!(queued.wait_timeout(Duration::from_millis(10)).is_err());

        drop(gate);
        assert!(running.wait().unwrap().is_complete());
        assert!(matches!(queued.wait(), Err(BeatkeyError::Cancelled)));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_cancel_after_finish_is_ignored() {
        let (pool, gate) = gated_pool(1, 0);
        drop(gate);
        let ticket = pool.submit(short_wave()).unwrap();
        while pool.in_flight() > 0 {
            thread::sleep(Duration::from_millis(1));
        }
        ticket.cancel();
        assert_eq!(pool.abandoned(), 0);
        assert!(ticket.wait().unwrap().is_complete());
    }

    #[test]
    fn test_drop_does_not_wait_for_timed_out_job() {
        let (pool, gate) = gated_pool(1, 0);
        let ticket = pool.submit(short_wave()).unwrap();
        assert!(matches!(
            ticket.wait_timeout(Duration::from_millis(50)),
            Err(BeatkeyError::Timeout { .. })
        ));

        // The gate stays closed, so the worker is stuck for good
        let (done_tx, done_rx) = bounded::<()>(1);
        thread::spawn(move || {
            drop(pool);
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "dropping the pool blocked on a cancelled job"
        );

        drop(gate);
        assert!(matches!(ticket.wait(), Err(BeatkeyError::Cancelled)));
    }

    #[test]
    fn test_panic_reported_as_worker_failure() {
        let pool = AnalysisPool::new(
            analyzer_with(Arc::new(PanickingSeparator)),
            PoolConfig {
                worker_limit: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        let err = pool.submit(short_wave()).unwrap().wait().unwrap_err();
        match err {
            BeatkeyError::WorkerFailed { reason } => assert!(reason.contains("exploded")),
            other => panic!("unexpected error: {}", other),
        }

        // The worker survives and the slot is released
        assert!(pool.submit(short_wave()).unwrap().wait().is_err());
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let (pool, gate) = gated_pool(1, 0);
        drop(gate);
        let result = pool
            .submit_file("/nonexistent/path/track.wav")
            .unwrap()
            .wait();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = AnalysisPool::new(
            analyzer_with(Arc::new(PanickingSeparator)),
            PoolConfig {
                worker_limit: 0,
                queue_capacity: 4,
            },
        );
        assert!(matches!(result, Err(BeatkeyError::ConfigError(_))));
    }
}
