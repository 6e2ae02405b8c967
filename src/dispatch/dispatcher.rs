//! Job queue handed out to workers in order

use std::collections::VecDeque;

use crate::models::{Job, WorkerId};

/// Ordered queue of jobs not yet handed to a worker
#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: VecDeque<Job>,
    dispatched: usize,
}

impl Dispatcher {
    pub fn new(jobs: impl IntoIterator<Item = Job>) -> Self {
        Self {
            queue: jobs.into_iter().collect(),
            dispatched: 0,
        }
    }

    /// Pop the next job and assign it to `worker`; `None` once exhausted.
    /// A popped job never comes back out of this queue unless returned
    /// through [`Dispatcher::restore`].
    pub fn next_for(&mut self, worker: WorkerId) -> Option<Job> {
        let mut job = self.queue.pop_front()?;
        job.worker = Some(worker);
        self.dispatched += 1;
        Some(job)
    }

    /// Put back a job whose hand-off never reached its worker
    pub fn restore(&mut self, mut job: Job) {
        job.worker = None;
        self.dispatched = self.dispatched.saturating_sub(1);
        self.queue.push_front(job);
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{number_jobs, JobId};
    use std::collections::HashSet;

    fn jobs(n: usize) -> Vec<Job> {
        number_jobs((0..n).map(|i| vec![format!("job-{i}")]))
    }

    #[test]
    fn test_dispatches_in_order_then_exhausts() {
        let mut dispatcher = Dispatcher::new(jobs(3));
        assert!(!dispatcher.is_exhausted());

        let first = dispatcher.next_for(WorkerId(1)).unwrap();
        let second = dispatcher.next_for(WorkerId(0)).unwrap();
        let third = dispatcher.next_for(WorkerId(1)).unwrap();

        assert_eq!(first.id, JobId(0));
        assert_eq!(first.worker, Some(WorkerId(1)));
        assert_eq!(second.id, JobId(1));
        assert_eq!(second.worker, Some(WorkerId(0)));
        assert_eq!(third.id, JobId(2));

        assert!(dispatcher.is_exhausted());
        assert!(dispatcher.next_for(WorkerId(0)).is_none());
        assert_eq!(dispatcher.dispatched(), 3);
    }

    #[test]
    fn test_never_hands_out_a_job_twice() {
        let mut dispatcher = Dispatcher::new(jobs(50));
        let mut seen = HashSet::new();
        let mut worker = 0;

        while let Some(job) = dispatcher.next_for(WorkerId(worker % 7)) {
            assert!(seen.insert(job.id), "{} dispatched twice", job.id);
            worker += 1;
        }

        assert_eq!(seen.len(), 50);
        assert_eq!(dispatcher.dispatched(), 50);
    }

    #[test]
    fn test_restore_requeues_at_front() {
        let mut dispatcher = Dispatcher::new(jobs(2));
        let job = dispatcher.next_for(WorkerId(0)).unwrap();
        dispatcher.restore(job);

        assert_eq!(dispatcher.dispatched(), 0);
        let again = dispatcher.next_for(WorkerId(1)).unwrap();
        assert_eq!(again.id, JobId(0));
        assert_eq!(again.worker, Some(WorkerId(1)));
    }
}
