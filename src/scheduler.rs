//! Per-track-set worker serving interval requests.
//!
//! Each [`IntervalRequestScheduler`] owns one worker thread and one
//! [`TrackSet`]. Requests from all [`Requester`]s share a queue and are served
//! one at a time. A request is skipped when a newer one from the same
//! requester is already waiting, and answered from the last result when that
//! result still covers it.

use crate::consistency::MessageSink;
use crate::coverage::CoverageResult;
use crate::error::{MappingError, Result};
use crate::pipeline::{load_coverage, TrackSet};
use crate::request::IntervalRequest;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What a worker tells the listener of a request
#[derive(Debug, Clone)]
pub enum ThreadEvent {
    /// Tracks are being read for `request`
    DownloadStatus {
        request: IntervalRequest,
        finished: bool,
    },
    /// Compressed tracks are being decompressed for `request`
    UnzipStatus {
        request: IntervalRequest,
        finished: bool,
    },
    Coverage {
        request: IntervalRequest,
        result: Arc<CoverageResult>,
    },
    /// A newer request from the same requester superseded this one
    Skipped { request: IntervalRequest },
    Failed {
        request: IntervalRequest,
        message: String,
    },
}

/// Receives events on the worker thread; must return quickly and must not panic.
pub trait ThreadListener: Send + Sync {
    fn update(&self, event: ThreadEvent);
}

/// Forwards events into a channel so another thread can wait for them
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: Sender<ThreadEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<ThreadEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl ThreadListener for ChannelListener {
    fn update(&self, event: ThreadEvent) {
        // Nobody listening any more is not the worker's problem
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How long an idle worker blocks on the queue before checking for shutdown
    pub poll_interval: Duration,
    /// Pause after taking a request, letting a newer one arrive and replace it
    pub coalesce_delay: Duration,
    /// Bases fetched beyond each side of the visible window
    pub padding: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            coalesce_delay: Duration::from_millis(10),
            padding: 1000,
        }
    }
}

struct Job {
    requester: u64,
    request: IntervalRequest,
    listener: Arc<dyn ThreadListener>,
}

pub struct IntervalRequestScheduler {
    sender: Option<Sender<Job>>,
    interrupted: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    next_requester: AtomicU64,
    chromosome_lengths: Vec<i64>,
    config: SchedulerConfig,
}

impl IntervalRequestScheduler {
    /// Start the worker thread for `track_set`.
    pub fn spawn(
        track_set: TrackSet,
        config: SchedulerConfig,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let interrupted = Arc::new(AtomicBool::new(false));
        let chromosomes = track_set.chromosomes();
        let chromosome_lengths: Vec<i64> = (0..chromosomes.len() as u32)
            .map(|id| chromosomes.get_len_from_id(id).unwrap_or(0) as i64)
            .collect();

        let worker = Worker {
            track_set,
            config,
            sink,
            receiver,
            interrupted: Arc::clone(&interrupted),
            pending: VecDeque::new(),
            cached: None,
        };
        let handle = thread::Builder::new()
            .name("coverage-worker".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            sender: Some(sender),
            interrupted,
            handle: Some(handle),
            next_requester: AtomicU64::new(0),
            chromosome_lengths,
            config,
        })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// A new requester whose events go to `listener`. Requests of different
    /// requesters never supersede each other.
    pub fn requester(&self, listener: Arc<dyn ThreadListener>) -> Result<Requester> {
        let sender = self.sender.clone().ok_or(MappingError::SchedulerClosed)?;
        Ok(Requester {
            id: self.next_requester.fetch_add(1, Ordering::Relaxed),
            listener,
            sender,
            padding: self.config.padding,
            chromosome_lengths: self.chromosome_lengths.clone(),
        })
    }

    /// Stop the worker after the request it is currently serving, if any.
    /// Queued requests are dropped without notification.
    pub fn shutdown(&mut self) {
        self.interrupted.store(true, Ordering::Relaxed);
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Coverage worker panicked");
            }
        }
    }
}

impl Drop for IntervalRequestScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle through which one consumer submits requests
#[derive(Clone)]
pub struct Requester {
    id: u64,
    listener: Arc<dyn ThreadListener>,
    sender: Sender<Job>,
    padding: i64,
    chromosome_lengths: Vec<i64>,
}

impl Requester {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue `request` as is.
    pub fn submit(&self, request: IntervalRequest) -> Result<()> {
        self.sender
            .send(Job {
                requester: self.id,
                request,
                listener: Arc::clone(&self.listener),
            })
            .map_err(|_| MappingError::SchedulerClosed)
    }

    /// Request `[from, to]` on `chromosome_id`, padded by the scheduler's
    /// configured padding and clamped to the chromosome.
    pub fn request(
        &self,
        chromosome_id: u32,
        from: i64,
        to: i64,
        customize: impl FnOnce(IntervalRequest) -> IntervalRequest,
    ) -> Result<()> {
        let length = self.chromosome_lengths.get(chromosome_id as usize).copied();
        let request =
            customize(IntervalRequest::new(chromosome_id, from, to)).with_padding(self.padding, length);
        self.submit(request)
    }
}

struct Worker {
    track_set: TrackSet,
    config: SchedulerConfig,
    sink: Arc<dyn MessageSink>,
    receiver: Receiver<Job>,
    interrupted: Arc<AtomicBool>,
    pending: VecDeque<Job>,
    cached: Option<Arc<CoverageResult>>,
}

impl Worker {
    fn run(mut self) {
        info!(
            "Coverage worker started for {} track(s)",
            self.track_set.tracks().len()
        );

        while !self.interrupted.load(Ordering::Relaxed) {
            if self.pending.is_empty() {
                match self.receiver.recv_timeout(self.config.poll_interval) {
                    Ok(job) => self.pending.push_back(job),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                thread::sleep(self.config.coalesce_delay);
            }
            while let Ok(job) = self.receiver.try_recv() {
                self.pending.push_back(job);
            }

            let Some(job) = self.pending.pop_front() else {
                continue;
            };
            if self.pending.iter().any(|newer| newer.requester == job.requester) {
                debug!(
                    "Skipping request {}-{} of requester {}: superseded",
                    job.request.from, job.request.to, job.requester
                );
                job.listener.update(ThreadEvent::Skipped {
                    request: job.request,
                });
                continue;
            }
            self.serve(job);
        }

        debug!("Coverage worker stopped");
    }

    fn serve(&mut self, job: Job) {
        let Job {
            request, listener, ..
        } = job;

        if let Some(cached) = self.cached.as_ref().filter(|c| c.covers_bounds(&request)) {
            debug!(
                "Serving {}-{} from the cached result",
                request.from, request.to
            );
            listener.update(ThreadEvent::Coverage {
                request,
                result: Arc::clone(cached),
            });
            return;
        }

        let compressed = self.track_set.tracks().iter().any(|t| t.is_compressed());
        listener.update(ThreadEvent::DownloadStatus {
            request: request.clone(),
            finished: false,
        });
        if compressed {
            listener.update(ThreadEvent::UnzipStatus {
                request: request.clone(),
                finished: false,
            });
        }

        let started = Instant::now();
        let loaded = load_coverage(&self.track_set, &request, self.sink.as_ref());

        if compressed {
            listener.update(ThreadEvent::UnzipStatus {
                request: request.clone(),
                finished: true,
            });
        }
        listener.update(ThreadEvent::DownloadStatus {
            request: request.clone(),
            finished: true,
        });

        match loaded {
            Ok(result) => {
                debug!(
                    "Loaded {}-{} (padded {}-{}) in {:.2?}",
                    request.from,
                    request.to,
                    request.total_from,
                    request.total_to,
                    started.elapsed()
                );
                let result = Arc::new(result);
                self.cached = Some(Arc::clone(&result));
                listener.update(ThreadEvent::Coverage { request, result });
            }
            Err(e) => {
                error!(
                    "Request {}-{} on chromosome {} failed: {}",
                    request.from, request.to, request.chromosome_id, e
                );
                listener.update(ThreadEvent::Failed {
                    request,
                    message: e.to_string(),
                });
            }
        }
    }
}
