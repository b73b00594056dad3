//! Page queue and concurrency gate
//!
//! This module handles:
//! - Handing each pending page to exactly one worker at a time
//! - Holding retried pages back until their backoff has elapsed
//! - Detecting when a run is exhausted (nothing queued, nothing in flight)
//! - Bounding concurrent fetches, with shrinking on rate limits

use crate::source::PageId;
use crate::state::PageState;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};

/// A page waiting to be fetched
#[derive(Debug, Clone)]
pub struct PageTask {
    pub page: PageId,

    /// Attempts already made in this run
    pub attempts: u32,

    /// Earliest instant the page may be attempted again
    pub ready_at: Instant,

    pub state: PageState,
}

impl PageTask {
    pub fn new(page: PageId) -> Self {
        Self {
            page,
            attempts: 0,
            ready_at: Instant::now(),
            state: PageState::Pending,
        }
    }
}

// BinaryHeap is a max-heap: the page with the earliest ready instant must
// compare greatest, with lower page ids breaking ties.
impl Ord for PageTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.page.cmp(&self.page))
    }
}

impl PartialOrd for PageTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PageTask {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.page == other.page
    }
}

impl Eq for PageTask {}

struct QueueInner {
    heap: BinaryHeap<PageTask>,
    in_flight: usize,
    closed: bool,
}

/// Shared queue of pending pages
///
/// Every page taken with `next` must be given back exactly once, either with
/// `requeue` for another attempt or with `finish` when it reached a terminal
/// state. The queue is exhausted once it is empty and no page is in flight.
pub struct PageQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl PageQueue {
    /// Creates a queue with every page ready immediately
    pub fn new(pages: impl IntoIterator<Item = PageId>) -> Self {
        let heap = pages.into_iter().map(PageTask::new).collect();
        Self {
            inner: Mutex::new(QueueInner {
                heap,
                in_flight: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits for the next ready page
    ///
    /// # Returns
    ///
    /// * `Some(PageTask)` - A page now owned by the caller
    /// * `None` - The queue is exhausted or closed
    pub async fn next(&self) -> Option<PageTask> {
        loop {
            // Register for wakeups before inspecting the heap so a requeue or
            // finish between the check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }

                let now = Instant::now();
                match inner.heap.peek().map(|task| task.ready_at) {
                    None if inner.in_flight == 0 => return None,
                    None => None,
                    Some(ready_at) if ready_at <= now => {
                        let task = inner.heap.pop();
                        inner.in_flight += 1;
                        return task;
                    }
                    Some(ready_at) => Some(ready_at - now),
                }
            };

            match wait {
                Some(duration) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Returns an in-flight page to the queue for another attempt
    pub fn requeue(&self, task: PageTask) {
        {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
            inner.heap.push(task);
        }
        self.notify.notify_waiters();
    }

    /// Releases an in-flight page that reached a terminal state
    pub fn finish(&self) {
        {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Stops handing out pages; queued pages stay unprocessed
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Pages waiting in the queue, including those backing off
    pub fn queued(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}

/// Bounds the number of concurrent fetches
///
/// Starts at the configured worker count and can only shrink, one permit per
/// rate-limit signal, down to a minimum of one.
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
        }
    }

    /// Waits for a fetch slot
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    /// Current concurrency limit
    pub fn limit(&self) -> usize {
        self.limit.load(AtomicOrdering::SeqCst)
    }

    /// Removes one slot unless already at the minimum
    ///
    /// If every slot is busy, the slot is retired as soon as it is released.
    ///
    /// # Returns
    ///
    /// `true` if the limit was lowered
    pub fn shrink(&self) -> bool {
        let lowered = self
            .limit
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |current| {
                (current > 1).then(|| current - 1)
            })
            .is_ok();

        if !lowered {
            return false;
        }

        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit.forget(),
            Err(_) => {
                let semaphore = self.semaphore.clone();
                tokio::spawn(async move {
                    if let Ok(permit) = semaphore.acquire_owned().await {
                        permit.forget();
                    }
                });
            }
        }
        true
    }
}

/// Random politeness delay within `[min, max]`
pub fn politeness_delay(min: Duration, max: Duration) -> Duration {
    use rand::Rng;

    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
