//! Queue Core (spec §4.5): a directory-backed store of opaque blobs with
//! atomic `inp_`/`msg_`/`rmv_` filename-prefix state transitions.
//!
//! Spec §4.5 also names `queue_object`/`get_object` (pickle-equivalent
//! serialization of an object, via the external `readPickled`/
//! `writePickled` collaborator named in spec §6). That serialization step
//! is entirely the caller's concern here: `queue_bytes`/`message_contents`
//! cover the bytes path, and a caller wanting the object path serializes
//! first and calls `queue_bytes`. `open_message` likewise isn't exposed
//! separately — `message_path` plus `std::fs::File::open` covers it.

pub mod delivery;
pub mod meta;
pub mod mixpool;

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::ReentrantMutex;
use tracing::error;

use crate::error::MixFatalError;
use crate::prng::Prng;

/// Seconds an `inp_` file may sit unfinished before `scrub` tombstones it
/// (spec §3, pinned to the original's `INPUT_TIMEOUT`).
pub const INPUT_TIMEOUT: f64 = 6000.0;

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

struct QueueState {
    count: Option<usize>,
}

/// A directory-backed queue. Holds a reentrant per-instance mutex over its
/// in-memory state (spec §5); filesystem renames may happen without the
/// lock held provided their effects aren't observable until re-locked.
pub struct Queue {
    path: PathBuf,
    prng: Prng,
    state: ReentrantMutex<RefCell<QueueState>>,
}

impl Queue {
    pub fn open(path: impl AsRef<Path>, prng: Prng) -> Result<Self, MixFatalError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if !path.is_dir() {
                return Err(MixFatalError::NotADirectory { path });
            }
        } else {
            fs::create_dir_all(&path).map_err(|e| {
                error!(path = %path.display(), error = %e, "failed to create queue directory");
                MixFatalError::NotADirectory { path: path.clone() }
            })?;
        }
        Ok(Self {
            path,
            prng,
            state: ReentrantMutex::new(RefCell::new(QueueState { count: None })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_for(&self, prefix: &str, handle: &str) -> PathBuf {
        self.path.join(format!("{prefix}{handle}"))
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let mut handles = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.path) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(h) = name.strip_prefix(prefix) {
                        handles.push(h.to_string());
                    }
                }
            }
        }
        handles
    }

    fn invalidate_count(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().count = None;
    }

    /// Rename `prefix_from<handle>` to `prefix_to<handle>`. OS errors are
    /// logged and invalidate the cached count rather than propagating
    /// (spec §7: "the operation reports failure without raising").
    fn change_state(&self, handle: &str, from: &str, to: &str) -> bool {
        let from_path = self.path_for(from, handle);
        let to_path = self.path_for(to, handle);
        match fs::rename(&from_path, &to_path) {
            Ok(()) => true,
            Err(e) => {
                error!(handle, from, to, error = %e, "queue state rename failed");
                self.invalidate_count();
                false
            }
        }
    }

    /// Open `inp_<handle>` with exclusive-create semantics, write `buf`,
    /// then rename to `msg_<handle>`. Retries on handle collision.
    pub fn queue_bytes(&self, buf: &[u8]) -> std::io::Result<String> {
        loop {
            let handle = self.prng.handle();
            let inp_path = self.path_for("inp_", &handle);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&inp_path)
            {
                Ok(mut f) => {
                    f.write_all(buf)?;
                    drop(f);
                    if self.change_state(&handle, "inp_", "msg_") {
                        self.invalidate_count();
                    }
                    return Ok(handle);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Open a new `inp_<handle>` for the caller to write incrementally;
    /// returns the handle and the open file, ready for `finish`/`abort`.
    pub fn open_new(&self) -> std::io::Result<(String, fs::File)> {
        loop {
            let handle = self.prng.handle();
            let inp_path = self.path_for("inp_", &handle);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&inp_path)
            {
                Ok(f) => return Ok((handle, f)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn finish(&self, handle: &str) -> bool {
        let ok = self.change_state(handle, "inp_", "msg_");
        if ok {
            self.invalidate_count();
        }
        ok
    }

    pub fn abort(&self, handle: &str) -> bool {
        self.change_state(handle, "inp_", "rmv_")
    }

    pub fn remove(&self, handle: &str) -> bool {
        let ok = self.change_state(handle, "msg_", "rmv_");
        if ok {
            self.invalidate_count();
        }
        ok
    }

    pub fn count(&self, recount: bool) -> usize {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if recount || state.count.is_none() {
            state.count = Some(self.scan_prefix("msg_").len());
        }
        state.count.unwrap()
    }

    pub fn all_messages(&self) -> Vec<String> {
        self.scan_prefix("msg_")
    }

    pub fn message_path(&self, handle: &str) -> PathBuf {
        self.path_for("msg_", handle)
    }

    pub fn message_contents(&self, handle: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.message_path(handle))
    }

    pub fn pick_random(&self, count: Option<usize>) -> Vec<String> {
        let mut handles = self.all_messages();
        self.prng.shuffle(&mut handles, count);
        handles
    }

    /// Copy `handle`'s contents into `other` (a fresh handle there, since
    /// handles must change across a directory boundary), then remove it
    /// from this queue.
    pub fn move_to(&self, handle: &str, other: &Queue) -> std::io::Result<String> {
        let bytes = self.message_contents(handle)?;
        let new_handle = other.queue_bytes(&bytes)?;
        self.remove(handle);
        Ok(new_handle)
    }

    /// Tombstone every `inp_`/`msg_` file, then hand the union to `scrub`
    /// for deletion. `secure_delete` is the spec §6 collaborator
    /// (`secure_delete(list of paths)`); `None` falls back to a plain
    /// unlink.
    pub fn remove_all(&self, secure_delete: Option<&dyn Fn(&[PathBuf])>) {
        for h in self.scan_prefix("inp_") {
            self.change_state(&h, "inp_", "rmv_");
        }
        for h in self.scan_prefix("msg_") {
            self.remove(&h);
        }
        self.scrub(secure_delete);
    }

    /// Collect every `rmv_` file, tombstone any `inp_` older than
    /// [`INPUT_TIMEOUT`], and hand the union to `secure_delete` (spec §4.5,
    /// §6). `secure_delete(paths)` is the named collaborator that unlinks
    /// paths "after overwriting as policy dictates"; passing `None` uses
    /// the default of a plain `fs::remove_file` with no overwrite.
    pub fn scrub(&self, secure_delete: Option<&dyn Fn(&[PathBuf])>) {
        let mut to_delete: Vec<PathBuf> = self
            .scan_prefix("rmv_")
            .into_iter()
            .map(|h| self.path_for("rmv_", &h))
            .collect();

        for h in self.scan_prefix("inp_") {
            let p = self.path_for("inp_", &h);
            let stale = fs::metadata(&p)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .map(|age| age.as_secs_f64() > INPUT_TIMEOUT)
                .unwrap_or(false);
            if stale && self.change_state(&h, "inp_", "rmv_") {
                to_delete.push(self.path_for("rmv_", &h));
            }
        }

        match secure_delete {
            Some(delete) => delete(&to_delete),
            None => default_secure_delete(&to_delete),
        }
    }
}

/// Default `secure_delete` collaborator: unlink each path with no
/// overwrite pass. Real secure deletion (overwriting unlinked files) is
/// out of scope (spec §1) and left to a caller-supplied closure.
fn default_secure_delete(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
