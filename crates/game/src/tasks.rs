//! Background work whose results the game loop picks up without blocking.
//!
//! The main thread hands jobs to a [`TaskPool`] with [`TaskPool::submit`] and
//! collects results each tick with [`TaskPool::poll`] or [`TaskPool::drain`].
//! Neither side ever waits on the other.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};

use crate::ring::RingBuffer;

type Job<R> = Box<dyn FnOnce() -> R + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task queue is full")]
    QueueFull,
    #[error("task pool has shut down")]
    ShutDown,
}

pub struct TaskPool<R> {
    sender: Option<Sender<Job<R>>>,
    completed: Arc<Mutex<RingBuffer<R>>>,
    workers: Vec<JoinHandle<()>>,
    /// Submitted jobs whose results have not been polled yet.
    outstanding: Arc<AtomicUsize>,
    capacity: usize,
}

impl<R: Send + 'static> TaskPool<R> {
    /// `capacity` bounds queued, running and unpolled jobs together, so the
    /// completion ring never overwrites a result.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<Job<R>>(capacity);
        let completed = Arc::new(Mutex::new(RingBuffer::new(capacity)));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|index| {
                let receiver = receiver.clone();
                let completed = Arc::clone(&completed);
                let outstanding = Arc::clone(&outstanding);
                thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        match panic::catch_unwind(AssertUnwindSafe(job)) {
                            Ok(result) => {
                                lock(&completed).push(result);
                            }
                            Err(_) => {
                                log::error!("task worker {} caught a panicking job", index);
                                outstanding.fetch_sub(1, Ordering::AcqRel);
                            }
                        }
                    }
                    log::trace!("task worker {} exiting", index);
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            completed,
            workers: handles,
            outstanding,
            capacity,
        }
    }

    /// Queues `job` for a worker. Never blocks.
    pub fn submit<F>(&self, job: F) -> Result<(), TaskError>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(TaskError::ShutDown)?;

        if self.outstanding.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(TaskError::QueueFull);
        }

        sender.try_send(Box::new(job)).map_err(|e| {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            match e {
                TrySendError::Full(_) => TaskError::QueueFull,
                TrySendError::Disconnected(_) => TaskError::ShutDown,
            }
        })
    }

    /// Takes the oldest finished result, if any.
    pub fn poll(&self) -> Option<R> {
        let result = lock(&self.completed).pop_front()?;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        Some(result)
    }

    pub fn drain(&self) -> Vec<R> {
        let results: Vec<R> = lock(&self.completed).drain().collect();
        self.outstanding.fetch_sub(results.len(), Ordering::AcqRel);
        results
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lets queued jobs finish, then joins the workers. Unpolled results
    /// stay available.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("task worker panicked during shutdown");
            }
        }
    }
}

/// Closes the queue without waiting. Workers finish whatever was queued
/// and exit on their own; [`TaskPool::shutdown`] is the way to wait for them.
impl<R> Drop for TaskPool<R> {
    fn drop(&mut self) {
        self.sender.take();
        self.workers.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
