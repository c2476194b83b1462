//! Delivery Queue (spec §4.6): adds per-message metadata, a retry
//! schedule, and a send/pending lifecycle on top of the Queue Core.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::MixFatalError;
use crate::prng::Prng;

use super::meta::{self, DeliveryState};
use super::Queue;

/// Collaborator the queue hands a ready batch to (spec §5: "SHOULD be
/// invoked with the queue lock released"). Implementations are expected to
/// call `delivery_succeeded`/`delivery_failed` back asynchronously, once
/// per handle in the batch, after the transport attempt resolves.
pub trait Deliverer {
    fn deliver_messages(&self, batch: Vec<(String, Vec<u8>)>);
}

struct DeliveryQueueState {
    schedule: Vec<f64>,
    delivery_state: HashMap<String, DeliveryState>,
    sendable: HashSet<String>,
    pending: HashMap<String, f64>,
}

/// A [`Queue`] plus durable per-message metadata and a retry schedule.
///
/// Two `DeliveryQueue`s over the same directory are unsupported (spec §5):
/// both would cache directory state independently and drift.
pub struct DeliveryQueue {
    queue: Queue,
    state: Mutex<DeliveryQueueState>,
}

fn meta_path(dir: &Path, handle: &str) -> PathBuf {
    dir.join(format!("meta_{handle}"))
}

fn rmv_meta_path(dir: &Path, handle: &str) -> PathBuf {
    dir.join(format!("rmv_meta_{handle}"))
}

impl DeliveryQueue {
    /// Open (or create) the queue directory and rescan it: for each
    /// `msg_<h>` missing a `meta_<h>`, synthesize `_DeliveryState(now)` and
    /// persist it; delete any orphaned `meta_<h>` with no matching
    /// message; recompute `next_attempt` and `sendable` for the rest.
    pub fn open(
        path: impl AsRef<Path>,
        prng: Prng,
        schedule: Vec<f64>,
    ) -> Result<Self, MixFatalError> {
        let queue = Queue::open(path, prng)?;
        let mut delivery_state = HashMap::new();
        let mut sendable = HashSet::new();

        let messages: HashSet<String> = queue.all_messages().into_iter().collect();
        let now = super::now_secs();

        for handle in &messages {
            let path = meta_path(queue.path(), handle);
            let loaded = match fs::read(&path) {
                Ok(bytes) => Some(DeliveryState::decode(&bytes, handle)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(_) => None,
            };
            let state = match loaded {
                Some(s) => s,
                None => {
                    let fresh = DeliveryState::new(now);
                    let _ = fs::write(&path, fresh.encode());
                    fresh
                }
            };
            delivery_state.insert(handle.clone(), state);
            sendable.insert(handle.clone());
        }

        if let Ok(entries) = fs::read_dir(queue.path()) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(h) = name.strip_prefix("meta_") {
                    if !messages.contains(h) {
                        warn!(handle = h, "deleting orphaned metadata file");
                        let _ = fs::remove_file(entry.path());
                    }
                } else if name.starts_with("rmv_meta_") {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        Ok(Self {
            queue,
            state: Mutex::new(DeliveryQueueState {
                schedule,
                delivery_state,
                sendable,
                pending: HashMap::new(),
            }),
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Replace the retry schedule and re-derive every handle's eligibility
    /// from its stored `queued_time`/`last_attempt` (spec §4.6).
    pub fn set_schedule(&self, schedule: Vec<f64>) {
        let mut state = self.state.lock();
        state.schedule = schedule;
    }

    fn next_attempt_for(state: &DeliveryQueueState, handle: &str, now: f64) -> Option<f64> {
        state
            .delivery_state
            .get(handle)
            .and_then(|ds| meta::next_attempt(ds, &state.schedule, now))
    }

    /// Serialize and enqueue `obj`, record fresh delivery metadata, and
    /// make the handle immediately sendable.
    pub fn queue_delivery_message(&self, obj: &[u8], now: Option<f64>) -> std::io::Result<String> {
        let now = now.unwrap_or_else(super::now_secs);
        let handle = self.queue.queue_bytes(obj)?;
        let ds = DeliveryState::new(now);
        let _ = fs::write(meta_path(self.queue.path(), &handle), ds.encode());

        let mut state = self.state.lock();
        state.delivery_state.insert(handle.clone(), ds);
        state.sendable.insert(handle.clone());
        Ok(handle)
    }

    /// Partition `sendable` into expired (removed), ready (moved to
    /// `pending`, handed to `deliverer` with the lock released), and
    /// future (left in `sendable`). Returns the number handed off.
    pub fn send_ready_messages(&self, now: f64, deliverer: &dyn Deliverer) -> usize {
        let mut batch: Vec<(String, Vec<u8>)> = Vec::new();
        let mut expired: Vec<String> = Vec::new();

        {
            let mut state = self.state.lock();
            let handles: Vec<String> = state.sendable.iter().cloned().collect();
            for handle in handles {
                match Self::next_attempt_for(&state, &handle, now) {
                    None => {
                        expired.push(handle.clone());
                        state.sendable.remove(&handle);
                    }
                    Some(at) if at <= now => {
                        state.sendable.remove(&handle);
                        state.pending.insert(handle.clone(), now);
                        if let Ok(bytes) = self.queue.message_contents(&handle) {
                            batch.push((handle, bytes));
                        }
                    }
                    Some(_future) => {}
                }
            }
        }

        for handle in expired {
            self.remove(&handle);
        }

        let n = batch.len();
        if n > 0 {
            deliverer.deliver_messages(batch);
        }
        n
    }

    pub fn delivery_succeeded(&self, handle: &str) {
        self.state.lock().pending.remove(handle);
        self.remove(handle);
    }

    /// A transport attempt failed. `retriable` messages get a new
    /// `last_attempt` and, if a future attempt is still scheduled, go back
    /// into `sendable`; otherwise they're removed.
    pub fn delivery_failed(&self, handle: &str, retriable: bool, now: Option<f64>) {
        let mut state = self.state.lock();
        let send_started_at = match state.pending.remove(handle) {
            Some(t) => t,
            None => return,
        };
        if !retriable {
            drop(state);
            self.remove(handle);
            return;
        }
        if let Some(ds) = state.delivery_state.get_mut(handle) {
            ds.last_attempt = Some(send_started_at);
            let _ = fs::write(meta_path(self.queue.path(), handle), ds.encode());
        }
        let now = now.unwrap_or_else(super::now_secs);
        match Self::next_attempt_for(&state, handle, now) {
            Some(_) => {
                state.sendable.insert(handle.to_string());
            }
            None => {
                drop(state);
                self.remove(handle);
            }
        }
    }

    /// Remove every `sendable` handle whose `next_attempt` is `None`.
    pub fn remove_expired_messages(&self, now: f64) {
        let expired: Vec<String> = {
            let state = self.state.lock();
            state
                .sendable
                .iter()
                .filter(|h| Self::next_attempt_for(&state, h, now).is_none())
                .cloned()
                .collect()
        };
        for handle in expired {
            self.remove(&handle);
        }
    }

    /// Remove from the Queue Core, every in-memory set, and tombstone the
    /// metadata file.
    pub fn remove(&self, handle: &str) {
        self.queue.remove(handle);
        let mut state = self.state.lock();
        state.delivery_state.remove(handle);
        state.sendable.remove(handle);
        state.pending.remove(handle);
        drop(state);

        let from = meta_path(self.queue.path(), handle);
        let to = rmv_meta_path(self.queue.path(), handle);
        if fs::rename(&from, &to).is_ok() {
            let _ = fs::remove_file(&to);
        }
    }

    pub fn sendable_count(&self) -> usize {
        self.state.lock().sendable.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Collector {
        batches: StdMutex<Vec<Vec<(String, Vec<u8>)>>>,
    }

    impl Collector {
        fn new() -> Self {
            Self {
                batches: StdMutex::new(Vec::new()),
            }
        }
    }

    impl Deliverer for Collector {
        fn deliver_messages(&self, batch: Vec<(String, Vec<u8>)>) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    fn open_tmp(schedule: Vec<f64>) -> (tempfile::TempDir, DeliveryQueue) {
        let dir = tempfile::tempdir().unwrap();
        let dq = DeliveryQueue::open(dir.path(), Prng::from_seed(7), schedule).unwrap();
        (dir, dq)
    }

    #[test]
    fn s5_retry_cycle_becomes_sendable_again_after_interval() {
        let (_dir, dq) = open_tmp(vec![0.0, 60.0, 120.0]);
        let h = dq.queue_delivery_message(b"hello", Some(0.0)).unwrap();

        let collector = Collector::new();
        assert_eq!(dq.send_ready_messages(0.0, &collector), 1);
        assert_eq!(collector.batches.lock().unwrap().len(), 1);
        assert_eq!(collector.batches.lock().unwrap()[0][0].0, h);

        dq.delivery_failed(&h, true, Some(0.0));

        let collector2 = Collector::new();
        assert_eq!(dq.send_ready_messages(30.0, &collector2), 0);

        let collector3 = Collector::new();
        assert_eq!(dq.send_ready_messages(65.0, &collector3), 1);
    }

    #[test]
    fn delivery_succeeded_removes_message_and_metadata() {
        let (_dir, dq) = open_tmp(vec![0.0]);
        let h = dq.queue_delivery_message(b"x", Some(0.0)).unwrap();
        let collector = Collector::new();
        dq.send_ready_messages(0.0, &collector);
        dq.delivery_succeeded(&h);
        assert_eq!(dq.queue().count(true), 0);
        assert!(!meta_path(dq.queue().path(), &h).exists());
    }

    #[test]
    fn non_retriable_failure_removes_message() {
        let (_dir, dq) = open_tmp(vec![0.0]);
        let h = dq.queue_delivery_message(b"x", Some(0.0)).unwrap();
        let collector = Collector::new();
        dq.send_ready_messages(0.0, &collector);
        dq.delivery_failed(&h, false, Some(0.0));
        assert_eq!(dq.queue().count(true), 0);
    }

    #[test]
    fn schedule_of_zero_means_try_once_never_retry() {
        let (_dir, dq) = open_tmp(vec![0.0]);
        let h = dq.queue_delivery_message(b"x", Some(0.0)).unwrap();
        let collector = Collector::new();
        dq.send_ready_messages(0.0, &collector);
        dq.delivery_failed(&h, true, Some(0.0));
        // schedule [0] gives exactly one prefix sum (0), already consumed
        // by last_attempt == 0, so no further attempt is ever scheduled.
        assert_eq!(dq.sendable_count(), 0);
        assert_eq!(dq.queue().count(true), 0);
    }

    #[test]
    fn s8_restart_rescan_recomputes_sendable_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let dq = DeliveryQueue::open(dir.path(), Prng::from_seed(3), vec![10.0, 20.0, 40.0])
                .unwrap();
            let h = dq.queue_delivery_message(b"payload", Some(0.0)).unwrap();
            let collector = Collector::new();
            dq.send_ready_messages(0.0, &collector);
            dq.delivery_failed(&h, true, Some(15.0));
            h
        };

        // process restart: reopen over the same directory
        let dq2 =
            DeliveryQueue::open(dir.path(), Prng::from_seed(3), vec![10.0, 20.0, 40.0]).unwrap();
        assert_eq!(dq2.sendable_count(), 1);

        let collector = Collector::new();
        assert_eq!(dq2.send_ready_messages(29.0, &collector), 0);
        let collector2 = Collector::new();
        assert_eq!(dq2.send_ready_messages(31.0, &collector2), 1);
        assert_eq!(collector2.batches.lock().unwrap()[0][0].0, h);
    }

    #[test]
    fn missing_metadata_at_rescan_is_synthesized_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::open(dir.path(), Prng::from_seed(9)).unwrap();
        let h = queue.queue_bytes(b"orphan").unwrap();
        // no meta_<h> written

        let dq = DeliveryQueue::open(dir.path(), Prng::from_seed(9), vec![0.0]).unwrap();
        assert_eq!(dq.sendable_count(), 1);
        assert!(meta_path(dq.queue().path(), &h).exists());
    }

    #[test]
    fn orphaned_metadata_without_message_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("meta_ZZZZZZZZ"), DeliveryState::new(0.0).encode()).unwrap();
        let _dq = DeliveryQueue::open(dir.path(), Prng::from_seed(1), vec![0.0]).unwrap();
        assert!(!dir.path().join("meta_ZZZZZZZZ").exists());
    }
}
