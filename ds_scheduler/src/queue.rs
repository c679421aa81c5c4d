//! ABOUTME: In-memory dispatch queue — priority-ordered staging buffer for the tick loop

use ds_db::Job;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Thread-safe staging buffer between `getPendingJobs` and dispatch.
/// `push` maintains `priority DESC` order; equal priorities pop in
/// insertion order.
pub struct DispatchQueue {
    inner: Mutex<VecDeque<Job>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Inserts `job`, keeping the queue sorted by `priority DESC`. A
    /// stable insertion point (the first slot whose priority is no higher
    /// than the new job's) preserves FIFO order among equal priorities.
    pub fn push(&self, job: Job) {
        let mut queue = self.inner.lock().expect("dispatch queue lock poisoned");
        let insert_at = queue
            .iter()
            .position(|existing| existing.priority < job.priority)
            .unwrap_or(queue.len());
        queue.insert(insert_at, job);
    }

    pub fn pop(&self) -> Option<Job> {
        self.inner
            .lock()
            .expect("dispatch queue lock poisoned")
            .pop_front()
    }

    pub fn remove(&self, job_id: &str) -> bool {
        let mut queue = self.inner.lock().expect("dispatch queue lock poisoned");
        if let Some(idx) = queue.iter().position(|j| j.job_id == job_id) {
            queue.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("dispatch queue lock poisoned").len()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_db::JobType;

    fn job(id: &str, priority: i64) -> Job {
        Job {
            job_id: id.to_string(),
            name: id.to_string(),
            command: "echo hi".to_string(),
            job_type: JobType::Once,
            priority,
            cron_expression: None,
            timeout_seconds: 60,
            retry_count: 0,
            retry_interval_seconds: 0,
            create_time: ds_core::time::now_iso8601(),
            update_time: ds_core::time::now_iso8601(),
        }
    }

    #[test]
    fn pops_in_priority_order() {
        let queue = DispatchQueue::new();
        queue.push(job("low", 1));
        queue.push(job("high", 10));
        queue.push(job("mid", 5));

        assert_eq!(queue.pop().unwrap().job_id, "high");
        assert_eq!(queue.pop().unwrap().job_id, "mid");
        assert_eq!(queue.pop().unwrap().job_id, "low");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn equal_priority_pops_in_insertion_order() {
        let queue = DispatchQueue::new();
        queue.push(job("first", 5));
        queue.push(job("second", 5));

        assert_eq!(queue.pop().unwrap().job_id, "first");
        assert_eq!(queue.pop().unwrap().job_id, "second");
    }

    #[test]
    fn remove_drops_a_still_queued_job() {
        let queue = DispatchQueue::new();
        queue.push(job("a", 1));
        queue.push(job("b", 1));
        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.pop().unwrap().job_id, "b");
    }
}
