use parking_lot::{Mutex, MutexGuard};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Notify;

/// A de-duplicating work queue.
///
/// A key is held by at most one worker at a time: adding a key that is
/// already queued is a no-op, and adding a key that is being processed defers
/// it until the worker calls [`WorkQueue::done`].
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

/// Exponential backoff, capped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

struct State<K> {
    queue: VecDeque<K>,
    /// Keys that need processing: everything in `queue`, plus keys re-added
    /// while being processed.
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Keys backing off; plain adds are ignored until the delay elapses.
    delayed: HashSet<K>,
    failures: HashMap<K, u32>,
    shutdown: bool,
}

// === impl WorkQueue ===

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    delayed: HashSet::new(),
                    failures: HashMap::new(),
                    shutdown: false,
                }),
                notify: Notify::new(),
            }),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: K) {
        let state = self.inner.state.lock();
        if state.delayed.contains(&key) {
            return;
        }
        self.enqueue(state, key);
    }

    fn enqueue(&self, mut state: MutexGuard<'_, State<K>>, key: K) {
        if state.shutdown || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds the key once `delay` has elapsed. Until then, [`WorkQueue::add`]
    /// ignores the key.
    pub fn add_after(&self, key: K, delay: Duration) {
        if !self.inner.state.lock().delayed.insert(key.clone()) {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = queue.inner.state.lock();
            state.delayed.remove(&key);
            queue.enqueue(state, key);
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Releases a key handed out by [`WorkQueue::next`], re-queuing it if it
    /// was added while being processed.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutdown {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Records a failed attempt, returning the number of failures so far.
    pub fn record_failure(&self, key: &K) -> u32 {
        let mut state = self.inner.state.lock();
        let failures = state.failures.entry(key.clone()).or_default();
        *failures += 1;
        *failures
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Clears the key's failure history.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    /// The number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops handing out keys and wakes all waiting workers.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutdown = true;
        self.inner.notify.notify_waiters();
    }
}

// === impl Backoff ===

impl Backoff {
    /// The delay before the retry that follows `failures` failed attempts.
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1);
        self.base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn deduplicates_queued_keys() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("b");
        queue.add("a");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some("a"));
        assert_eq!(queue.next().await, Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn defers_keys_added_while_processing() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = queue.next().await.unwrap();

        // Another event for the same key arrives mid-flight.
        queue.add("a");
        queue.add("a");
        assert!(queue.is_empty(), "in-flight keys must not be handed out");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some("a"));
        queue.done(&"a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn wakes_waiting_workers() {
        let queue = WorkQueue::new();
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });
        tokio::task::yield_now().await;
        queue.add(7);
        assert_eq!(worker.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn shutdown_releases_workers() {
        let queue = WorkQueue::<u32>::new();
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(worker.await.unwrap(), None);

        queue.add(1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn adds_after_a_delay() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backing_off_keys_ignore_plain_adds() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5));

        // Watch updates and resyncs during the backoff do not shorten it.
        queue.add("a");
        queue.add_after("a", Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some("a"));
        queue.done(&"a");

        // Once the delay has elapsed, adds work again.
        queue.add("a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn tracks_failures() {
        let queue = WorkQueue::new();
        assert_eq!(queue.failures(&"a"), 0);
        assert_eq!(queue.record_failure(&"a"), 1);
        assert_eq!(queue.record_failure(&"a"), 2);
        queue.forget(&"a");
        assert_eq!(queue.failures(&"a"), 0);
    }

    #[rstest]
    #[case(1, 250)]
    #[case(2, 500)]
    #[case(4, 2_000)]
    #[case(8, 30_000)]
    #[case(u32::MAX, 30_000)]
    fn backoff_doubles_up_to_max(#[case] failures: u32, #[case] millis: u64) {
        let backoff = Backoff {
            base: Duration::from_millis(250),
            max: Duration::from_secs(30),
        };
        assert_eq!(backoff.delay(failures), Duration::from_millis(millis));
    }
}
