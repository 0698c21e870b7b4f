//! Fetch jobs and the priority job queue.

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// A scheduled unit of REST work.
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Unique job id, carried through logs for correlation
    pub id: Uuid,
    /// Endpoint catalog key
    pub endpoint: String,
    /// Symbol for per-symbol endpoints
    pub symbol: Option<String>,
    /// Attempt counter, bumped on every requeue
    pub attempt: u32,
}

impl FetchJob {
    pub fn new(endpoint: impl Into<String>, symbol: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            symbol,
            attempt: 0,
        }
    }

    /// Identity of the (endpoint, symbol) pair this job polls.
    pub fn pair_key(&self) -> String {
        pair_key(&self.endpoint, self.symbol.as_deref())
    }
}

/// Render the identity key for an (endpoint, symbol) pair.
pub fn pair_key(endpoint: &str, symbol: Option<&str>) -> String {
    match symbol {
        Some(symbol) => format!("{}|{}", endpoint, symbol),
        None => format!("{}|-", endpoint),
    }
}

struct QueuedJob {
    job: FetchJob,
    priority: u8,
    due: Instant,
}

/// Priority job queue with an in-flight guard.
///
/// Jobs are dispatched in (priority, due) order, so when the rate
/// limiter saturates, T0 work preempts the slower tiers. A pair with a
/// pending or in-flight job never gets a second one: the scheduler's
/// next cycle for that pair is skipped, not queued behind it.
pub struct JobQueue {
    pending: Mutex<Vec<QueuedJob>>,
    in_flight: DashMap<String, Uuid>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            in_flight: DashMap::new(),
        }
    }

    /// Queue a job unless its pair is already pending or in flight.
    /// Returns false when the job was suppressed.
    pub fn enqueue(&self, job: FetchJob, priority: u8, due: Instant) -> bool {
        let key = job.pair_key();
        if self.in_flight.contains_key(&key) {
            return false;
        }

        let mut pending = self.pending.lock();
        if pending.iter().any(|q| q.job.pair_key() == key) {
            return false;
        }

        let pos = pending
            .iter()
            .position(|q| (q.priority, q.due) > (priority, due))
            .unwrap_or(pending.len());
        pending.insert(pos, QueuedJob { job, priority, due });
        true
    }

    /// Pop the most urgent job whose due time has passed and mark its
    /// pair in flight.
    pub fn next_due(&self, now: Instant) -> Option<FetchJob> {
        let mut pending = self.pending.lock();
        let pos = pending.iter().position(|q| q.due <= now)?;
        let queued = pending.remove(pos);
        self.in_flight.insert(queued.job.pair_key(), queued.job.id);
        Some(queued.job)
    }

    /// Terminal completion: release the pair for future cycles.
    pub fn complete(&self, job: &FetchJob) {
        self.in_flight.remove(&job.pair_key());
    }

    /// Put a dispatched job back with a later due time (retry path).
    /// The pair stays claimed: it moves from in-flight back to pending,
    /// so new cycles for the pair remain suppressed.
    pub fn requeue(&self, mut job: FetchJob, priority: u8, due: Instant) {
        self.in_flight.remove(&job.pair_key());
        job.attempt = job.attempt.saturating_add(1);

        let mut pending = self.pending.lock();
        let pos = pending
            .iter()
            .position(|q| (q.priority, q.due) > (priority, due))
            .unwrap_or(pending.len());
        pending.insert(pos, QueuedJob { job, priority, due });
    }

    /// Number of queued jobs.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of pairs currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_respects_priority() {
        let queue = JobQueue::new();
        let now = Instant::now();

        queue.enqueue(FetchJob::new("slow", None), 2, now);
        queue.enqueue(FetchJob::new("fast", None), 0, now);
        queue.enqueue(FetchJob::new("medium", None), 1, now);

        assert_eq!(queue.next_due(now).unwrap().endpoint, "fast");
        assert_eq!(queue.next_due(now).unwrap().endpoint, "medium");
        assert_eq!(queue.next_due(now).unwrap().endpoint, "slow");
    }

    #[tokio::test]
    async fn future_jobs_are_not_dispatched() {
        let queue = JobQueue::new();
        let now = Instant::now();

        queue.enqueue(
            FetchJob::new("later", None),
            0,
            now + std::time::Duration::from_secs(30),
        );
        assert!(queue.next_due(now).is_none());
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn pair_guard_suppresses_duplicates() {
        let queue = JobQueue::new();
        let now = Instant::now();

        let job = FetchJob::new("stock_state", Some("SPY".to_string()));
        assert!(queue.enqueue(job, 1, now));
        assert!(!queue.enqueue(
            FetchJob::new("stock_state", Some("SPY".to_string())),
            1,
            now
        ));

        // Still suppressed while in flight
        let dispatched = queue.next_due(now).unwrap();
        assert!(!queue.enqueue(
            FetchJob::new("stock_state", Some("SPY".to_string())),
            1,
            now
        ));

        // Released after completion
        queue.complete(&dispatched);
        assert!(queue.enqueue(
            FetchJob::new("stock_state", Some("SPY".to_string())),
            1,
            now
        ));
    }

    #[tokio::test]
    async fn different_symbols_are_independent_pairs() {
        let queue = JobQueue::new();
        let now = Instant::now();

        assert!(queue.enqueue(FetchJob::new("stock_state", Some("SPY".to_string())), 1, now));
        assert!(queue.enqueue(FetchJob::new("stock_state", Some("QQQ".to_string())), 1, now));
        assert_eq!(queue.pending_len(), 2);
    }

    #[tokio::test]
    async fn requeue_keeps_pair_claimed_and_bumps_attempt() {
        let queue = JobQueue::new();
        let now = Instant::now();

        queue.enqueue(FetchJob::new("stock_state", Some("SPY".to_string())), 1, now);
        let job = queue.next_due(now).unwrap();
        assert_eq!(job.attempt, 0);

        queue.requeue(job, 1, now + std::time::Duration::from_secs(10));

        // New cycle for the pair is still suppressed by the pending retry
        assert!(!queue.enqueue(
            FetchJob::new("stock_state", Some("SPY".to_string())),
            1,
            now
        ));

        let retried = queue
            .next_due(now + std::time::Duration::from_secs(10))
            .unwrap();
        assert_eq!(retried.attempt, 1);
    }
}
