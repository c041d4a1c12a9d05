//! A fleet of single-thread executors for connection tasks.
//!
//! Every connection binds its actor to exactly one executor, so all of the
//! connection's mutable state is touched from a single thread. The pool is
//! an explicit object created at driver initialization and handed to the
//! connection factory; there is no process-wide state.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to one single-thread executor. Cheap to clone; futures spawned
/// through clones of the same handle run on the same thread.
#[derive(Clone)]
pub struct Scheduler {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Scheduler {
    /// Run `future` on this executor's thread. Returns whether the executor
    /// is still accepting work (it stops when its pool is dropped).
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.send(Box::pin(future)).is_ok()
    }
}

/// A bounded fleet of single-thread executors handed out round-robin.
pub struct SchedulerPool {
    schedulers: Vec<Scheduler>,
    threads: Vec<JoinHandle<()>>,
    cursor: AtomicUsize,
}

impl SchedulerPool {
    /// Spawn `fleet_size` executor threads (at least one).
    pub fn new(fleet_size: usize) -> Self {
        let fleet_size = fleet_size.max(1);
        let mut schedulers = Vec::with_capacity(fleet_size);
        let mut threads = Vec::with_capacity(fleet_size);
        for index in 0..fleet_size {
            let (tx, rx) = mpsc::unbounded_channel();
            schedulers.push(Scheduler { jobs: tx });
            let thread = std::thread::Builder::new()
                .name(format!("vst-executor-{index}"))
                .spawn(move || executor_main(index, rx));
            match thread {
                Ok(handle) => threads.push(handle),
                Err(error) => {
                    tracing::error!(index, %error, "failed to spawn executor thread");
                }
            }
        }
        Self {
            schedulers,
            threads,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Hand out the next executor, round-robin.
    pub fn assign(&self) -> Scheduler {
        let position = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.schedulers[position % self.schedulers.len()].clone()
    }

    /// Number of executors in the fleet.
    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    /// Whether the fleet is empty (never true in practice; a pool always
    /// spawns at least one executor).
    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }
}

impl Drop for SchedulerPool {
    fn drop(&mut self) {
        // Closing the job channels lets each executor drain and exit.
        self.schedulers.clear();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("executor thread panicked");
            }
        }
    }
}

fn executor_main(index: usize, mut jobs: mpsc::UnboundedReceiver<Job>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(index, %error, "failed to build executor runtime");
            return;
        }
    };
    tracing::debug!(index, "executor started");
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        while let Some(job) = jobs.recv().await {
            tokio::task::spawn_local(job);
        }
        // Channel closed: the pool is shutting down. Remaining local tasks
        // are dropped with the LocalSet.
    });
    tracing::debug!(index, "executor stopped");
}
