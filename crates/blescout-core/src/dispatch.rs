//! Delivery contexts for subscriber callbacks.
//!
//! The coordinator never calls a subscriber directly. It hands each delivery
//! to a [`Dispatcher`], which decides where the callback runs:
//!
//! - [`InlineDispatcher`] runs it immediately on the coordinator task.
//! - [`QueueDispatcher`] queues it for a [`DeliveryQueue`] drained by the
//!   subscriber's own context (for example a UI loop).

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// A unit of work delivered to a subscriber.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Decides on which execution context subscriber callbacks run.
pub trait Dispatcher: Send + Sync + 'static {
    /// Schedule `job`.
    fn dispatch(&self, job: Job);
}

/// Runs jobs on the calling context.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Queues jobs for a [`DeliveryQueue`].
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    tx: UnboundedSender<Job>,
}

impl QueueDispatcher {
    /// Create a dispatcher and the queue that executes its jobs.
    #[must_use]
    pub fn new() -> (Self, DeliveryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DeliveryQueue { rx })
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            debug!("Delivery queue closed, dropping job");
        }
    }
}

/// Receiving end of a [`QueueDispatcher`].
#[derive(Debug)]
pub struct DeliveryQueue {
    rx: UnboundedReceiver<Job>,
}

impl DeliveryQueue {
    /// Run every job queued so far. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait for the next job and run it. Returns `false` once every
    /// dispatcher has been dropped.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until every dispatcher has been dropped.
    pub async fn run(mut self) {
        while self.run_next().await {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        InlineDispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_defers_until_drained() {
        let (dispatcher, mut queue) = QueueDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            dispatcher.dispatch(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(queue.drain(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(queue.drain(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_dispatcher_dropped() {
        let (dispatcher, queue) = QueueDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        dispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        drop(dispatcher);
        queue.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
