// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A pool of imaging workers.
//!
//! Each worker is a thread with its own private scratch directory and its own
//! variables. Jobs are serialised and sent to a worker over a channel; a
//! worker does one job at a time, in the order they were sent, and sends the
//! result back on a channel private to that job. The controller polls for
//! results; there are no timeouts, so a worker that never finishes stalls
//! whoever is waiting on it.

mod error;
mod job;
#[cfg(test)]
mod tests;
mod worker;

pub use error::WorkerPoolError;
pub use job::*;

use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use crossbeam_utils::atomic::AtomicCell;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};

use crate::{
    constants::WORKER_DIR_PREFIX, engine::ImagingEngine, image::ImageStore, params::PoolParams,
    PROGRESS_BARS,
};
use worker::{Envelope, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Ready,
    Busy,

    /// The worker thread panicked.
    Failed,
}

/// The controller's view of a worker.
pub struct WorkerHandle {
    pub host: String,

    /// This worker's private scratch directory. It's removed when the pool is
    /// torn down.
    pub scratch_dir: PathBuf,

    /// A name unique to this worker.
    pub engine_id: String,

    current_job: Option<u64>,
    state: Arc<AtomicCell<WorkerState>>,
    tx: Option<Sender<Envelope>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    /// The ID of the job last dispatched to this worker, if it hasn't been
    /// seen to complete.
    pub fn current_job(&self) -> Option<u64> {
        self.current_job
    }
}

/// A dispatched job.
#[derive(Debug)]
pub struct JobHandle {
    pub id: u64,
    pub worker: usize,
    pub job: &'static str,
    rx: Receiver<Result<JobOutput, WorkerPoolError>>,
    outcome: Option<Result<JobOutput, WorkerPoolError>>,
}

impl JobHandle {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// The result of the job, if it has been seen to complete (and the result
    /// hasn't already been taken).
    pub fn take_outcome(&mut self) -> Option<Result<JobOutput, WorkerPoolError>> {
        self.outcome.take()
    }
}

pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    poll_interval: Duration,
    next_job_id: u64,
}

impl WorkerPool {
    /// Start `workers_per_host` workers on each host. With no hosts, the local
    /// host is used. With no scratch directories, the current working
    /// directory is used; a single scratch directory is used for every host.
    pub fn setup(
        params: &PoolParams,
        engine: Arc<dyn ImagingEngine>,
        store: Arc<dyn ImageStore>,
        poll_interval: Duration,
    ) -> Result<WorkerPool, WorkerPoolError> {
        if params.workers_per_host == 0 {
            return Err(WorkerPoolError::ClusterSetup(
                "at least one worker per host is needed".to_string(),
            ));
        }

        let hosts = if params.hosts.is_empty() {
            vec![local_hostname()]
        } else {
            params.hosts.clone()
        };
        let scratch_dirs = match params.scratch_dirs.as_slice() {
            [] => vec![std::env::current_dir()?; hosts.len()],
            [dir] => vec![dir.clone(); hosts.len()],
            dirs if dirs.len() == hosts.len() => dirs.to_vec(),
            dirs => {
                return Err(WorkerPoolError::ClusterSetup(format!(
                    "{} scratch directories were given for {} hosts",
                    dirs.len(),
                    hosts.len()
                )))
            }
        };
        if let Some(dir) = scratch_dirs.iter().find(|d| !d.is_dir()) {
            return Err(WorkerPoolError::ScratchDir(dir.clone()));
        }

        let mut pool = WorkerPool {
            workers: Vec::with_capacity(hosts.len() * params.workers_per_host),
            poll_interval,
            next_job_id: 0,
        };
        for (host, scratch_dir) in hosts.iter().zip(scratch_dirs.iter()) {
            for _ in 0..params.workers_per_host {
                let index = pool.workers.len();
                let handle = spawn_worker(index, host, scratch_dir, &engine, &store)?;
                pool.workers.push(handle);
            }
        }
        info!(
            "Started {} workers on {} host(s)",
            pool.workers.len(),
            hosts.len()
        );
        for worker in &pool.workers {
            debug!(
                "{}: scratch directory {}",
                worker.engine_id,
                worker.scratch_dir.display()
            );
        }

        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// The first worker that can take a job.
    pub fn free_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .position(|w| w.state() == WorkerState::Ready)
    }

    /// Send a job to a worker. A worker only takes one job at a time.
    pub fn dispatch(&mut self, worker: usize, job: &Job) -> Result<JobHandle, WorkerPoolError> {
        let num_workers = self.workers.len();
        let handle = self
            .workers
            .get_mut(worker)
            .ok_or(WorkerPoolError::NoSuchWorker {
                worker,
                num_workers,
            })?;
        match handle.state() {
            WorkerState::Ready => (),
            WorkerState::Busy => {
                return Err(WorkerPoolError::Busy {
                    worker,
                    job_id: handle.current_job.unwrap_or_default(),
                })
            }
            WorkerState::Failed => return Err(WorkerPoolError::WorkerGone { worker }),
        }

        let payload = serde_json::to_string(job).map_err(|err| WorkerPoolError::Encode {
            job: job.name(),
            err,
        })?;
        let id = self.next_job_id;
        self.next_job_id += 1;
        let (reply, rx) = unbounded();

        handle.state.store(WorkerState::Busy);
        let sent = handle.tx.as_ref().map(|tx| {
            tx.send(Envelope {
                job_id: id,
                payload,
                reply,
            })
        });
        match sent {
            Some(Ok(())) => (),
            _ => {
                handle.state.store(WorkerState::Failed);
                return Err(WorkerPoolError::WorkerGone { worker });
            }
        }
        handle.current_job = Some(id);
        debug!("Dispatched {} job {id} to worker {worker}", job.name());

        Ok(JobHandle {
            id,
            worker,
            job: job.name(),
            rx,
            outcome: None,
        })
    }

    /// Has this job completed? Once this returns `true`, the job's result is
    /// available from [`JobHandle::take_outcome`].
    pub fn poll(&mut self, handle: &mut JobHandle) -> bool {
        if handle.outcome.is_some() {
            return true;
        }
        let outcome = match handle.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => Err(WorkerPoolError::WorkerGone {
                worker: handle.worker,
            }),
        };
        if let Some(worker) = self.workers.get_mut(handle.worker) {
            if worker.current_job == Some(handle.id) {
                worker.current_job = None;
            }
        }
        handle.outcome = Some(outcome);
        true
    }

    /// Block until a single job completes.
    pub fn wait(&mut self, mut handle: JobHandle) -> Result<JobOutput, WorkerPoolError> {
        while !self.poll(&mut handle) {
            thread::sleep(self.poll_interval);
        }
        handle.take_outcome().unwrap_or(Err(WorkerPoolError::WorkerGone {
            worker: handle.worker,
        }))
    }

    /// Block until all of these jobs complete. The results are in the same
    /// order as the handles.
    pub fn wait_all(
        &mut self,
        mut handles: Vec<JobHandle>,
        message: &'static str,
    ) -> Vec<Result<JobOutput, WorkerPoolError>> {
        let progress = make_progress_bar(handles.len(), message);
        progress.tick();

        let mut num_complete = 0;
        loop {
            for handle in handles.iter_mut() {
                if !handle.is_complete() && self.poll(handle) {
                    num_complete += 1;
                    progress.inc(1);
                }
            }
            if num_complete == handles.len() {
                break;
            }
            thread::sleep(self.poll_interval);
        }
        progress.abandon_with_message(format!("{message}: done"));

        handles
            .into_iter()
            .map(|mut h| {
                h.take_outcome()
                    .unwrap_or(Err(WorkerPoolError::WorkerGone { worker: h.worker }))
            })
            .collect()
    }

    /// Get one of a worker's variables (e.g. [`WEIGHT_GRID_VARIABLE`]). The
    /// worker must not be busy.
    pub fn pull(&mut self, worker: usize, name: &str) -> Result<WorkerValue, WorkerPoolError> {
        let handle = self.dispatch(
            worker,
            &Job::Pull {
                name: name.to_string(),
            },
        )?;
        match self.wait(handle)? {
            JobOutput::Value(value) => Ok(value),
            _ => Err(WorkerPoolError::UnknownVariable {
                worker,
                name: name.to_string(),
            }),
        }
    }

    /// Stop all workers and remove their scratch directories. Outstanding jobs
    /// are finished first.
    pub fn teardown(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Hang up on all workers before joining any of them.
        for worker in self.workers.iter_mut() {
            worker.tx = None;
        }
        for worker in self.workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!("{} panicked", worker.engine_id);
                }
            }
            if worker.scratch_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&worker.scratch_dir) {
                    warn!(
                        "Couldn't remove scratch directory {}: {e}",
                        worker.scratch_dir.display()
                    );
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn spawn_worker(
    index: usize,
    host: &str,
    scratch_dir: &std::path::Path,
    engine: &Arc<dyn ImagingEngine>,
    store: &Arc<dyn ImageStore>,
) -> Result<WorkerHandle, WorkerPoolError> {
    let private_dir = scratch_dir.join(format!("{WORKER_DIR_PREFIX}_{index}"));
    std::fs::create_dir_all(&private_dir)?;

    let (tx, rx) = unbounded();
    let state = Arc::new(AtomicCell::new(WorkerState::Ready));
    let worker = Worker {
        index,
        host: host.to_string(),
        scratch_dir: private_dir.clone(),
        engine: Arc::clone(engine),
        store: Arc::clone(store),
        variables: IndexMap::new(),
    };
    let thread_state = Arc::clone(&state);
    let thread = thread::Builder::new()
        .name(format!("worker {index}"))
        .spawn(move || worker.run(rx, thread_state))?;

    Ok(WorkerHandle {
        host: host.to_string(),
        scratch_dir: private_dir,
        engine_id: format!("{host}:{index}"),
        current_job: None,
        state,
        tx: Some(tx),
        thread: Some(thread),
    })
}

pub(crate) fn make_progress_bar(num_jobs: usize, message: &'static str) -> ProgressBar {
    ProgressBar::with_draw_target(
        Some(num_jobs as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg:18}: [{wide_bar:.blue}] {pos:2}/{len:2} jobs ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message(message)
}
