//! Mix Pool Selectors (spec §4.7): timed full-batch, Cottrell dynamic-pool,
//! and binomial-Cottrell batch selection on top of the Queue Core.
//!
//! None of these self-schedule; an external ticker is expected to call
//! `get_batch()` on its own timer (spec §9: "Specify the ticker as a
//! collaborator rather than baking it in").

use crate::prng::Prng;

use super::Queue;

/// `get_batch()` returns every message currently queued, shuffled.
pub struct TimedMixPool {
    queue: Queue,
}

impl TimedMixPool {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn get_batch(&self) -> Vec<String> {
        self.queue.pick_random(None)
    }
}

/// Cottrell batch-size parameters, shared by [`CottrellMixPool`] and
/// [`BinomialCottrellMixPool`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CottrellParams {
    pub min_pool: usize,
    pub min_send: usize,
    pub send_rate: f64,
}

impl Default for CottrellParams {
    fn default() -> Self {
        Self {
            min_pool: 6,
            min_send: 1,
            send_rate: 0.7,
        }
    }
}

impl CottrellParams {
    /// `batch_size(P) = 0` if `P < min_pool + min_send`; else
    /// `min(P - min_pool, max(1, floor(P * send_rate)))` (spec §4.7).
    pub fn batch_size(&self, pool_size: usize) -> usize {
        if pool_size < self.min_pool + self.min_send {
            return 0;
        }
        let headroom = pool_size - self.min_pool;
        let target = ((pool_size as f64 * self.send_rate).floor() as usize).max(1);
        headroom.min(target)
    }
}

/// `get_batch()` returns `pick_random(batch_size(P))` — a uniformly random
/// subset of fixed size `batch_size(P)`.
pub struct CottrellMixPool {
    queue: Queue,
    params: CottrellParams,
}

impl CottrellMixPool {
    pub fn new(queue: Queue, params: CottrellParams) -> Self {
        Self { queue, params }
    }

    pub fn with_defaults(queue: Queue) -> Self {
        Self::new(queue, CottrellParams::default())
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn params(&self) -> CottrellParams {
        self.params
    }

    pub fn batch_size(&self, pool_size: usize) -> usize {
        self.params.batch_size(pool_size)
    }

    pub fn get_batch(&self) -> Vec<String> {
        let pool_size = self.queue.count(false);
        let n = self.batch_size(pool_size);
        self.queue.pick_random(Some(n))
    }
}

/// Same target batch size as [`CottrellMixPool`], but each handle is
/// independently included with probability `n / P` rather than a fixed-size
/// draw — same mean, different (binomial) variance.
pub struct BinomialCottrellMixPool {
    queue: Queue,
    params: CottrellParams,
    prng: Prng,
}

impl BinomialCottrellMixPool {
    pub fn new(queue: Queue, prng: Prng, params: CottrellParams) -> Self {
        Self {
            queue,
            params,
            prng,
        }
    }

    pub fn with_defaults(queue: Queue, prng: Prng) -> Self {
        Self::new(queue, prng, CottrellParams::default())
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn get_batch(&self) -> Vec<String> {
        let handles = self.queue.all_messages();
        let pool_size = handles.len();
        let n = self.params.batch_size(pool_size);
        if n == 0 || pool_size == 0 {
            return Vec::new();
        }
        let p = n as f64 / pool_size as f64;
        let mut survivors: Vec<String> = handles
            .into_iter()
            .filter(|_| self.prng.next_f64() < p)
            .collect();
        self.prng.shuffle(&mut survivors, None);
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp(n: usize) -> (tempfile::TempDir, Queue) {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path(), Prng::from_seed(11)).unwrap();
        for i in 0..n {
            q.queue_bytes(format!("msg{i}").as_bytes()).unwrap();
        }
        (dir, q)
    }

    #[test]
    fn timed_pool_returns_everything() {
        let (_dir, q) = open_tmp(5);
        let pool = TimedMixPool::new(q);
        assert_eq!(pool.get_batch().len(), 5);
    }

    #[test]
    fn property_9_cottrell_batch_size_examples() {
        let params = CottrellParams::default();
        assert_eq!(params.batch_size(6), 0);
        assert_eq!(params.batch_size(7), 1);
        assert_eq!(params.batch_size(10), 4);
        assert_eq!(params.batch_size(100), 70);
    }

    #[test]
    fn cottrell_pool_returns_exactly_batch_size_messages() {
        let (_dir, q) = open_tmp(10);
        let pool = CottrellMixPool::with_defaults(q);
        assert_eq!(pool.get_batch().len(), 4);
    }

    #[test]
    fn below_min_pool_plus_min_send_yields_empty_batch() {
        let (_dir, q) = open_tmp(6);
        let pool = CottrellMixPool::with_defaults(q);
        assert!(pool.get_batch().is_empty());
    }

    #[test]
    fn property_10_binomial_batch_mean_matches_cottrell_target() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path(), Prng::from_seed(42)).unwrap();
        for i in 0..10 {
            q.queue_bytes(format!("msg{i}").as_bytes()).unwrap();
        }
        let pool = BinomialCottrellMixPool::with_defaults(q, Prng::from_seed(42));

        let ticks = 2000;
        let total: usize = (0..ticks).map(|_| pool.get_batch().len()).sum();
        let mean = total as f64 / ticks as f64;
        // target n = batch_size(10) = 4; binomial mean should land close to
        // that over enough ticks (variance n(1 - n/P) = 4 * 0.6 = 2.4).
        assert!((mean - 4.0).abs() < 0.5, "mean batch size was {mean}");
    }

    #[test]
    fn binomial_pool_is_empty_when_pool_empty() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path(), Prng::from_seed(1)).unwrap();
        let pool = BinomialCottrellMixPool::with_defaults(q, Prng::from_seed(1));
        assert!(pool.get_batch().is_empty());
    }
}
