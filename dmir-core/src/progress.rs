use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use crate::entry::{EntryMetadata, EntryRef};
use crate::manifest::{FolderSkip, ManifestRow};
use crate::report::format_size;

/// Observer of a mirror run. Every method defaults to a no-op.
///
/// Transfer callbacks may arrive from several worker threads at once when
/// sibling files are downloaded in parallel.
pub trait ProgressSink: Send + Sync {
    fn transfer_started(&self, _entry: &EntryMetadata) {}
    /// Called after each chunk lands on disk. `fraction` is `None` when the
    /// entry has no known size.
    fn chunk_written(&self, _id: &EntryRef, _chunk_len: u64, _bytes_so_far: u64, _fraction: Option<f64>) {}
    fn transfer_finished(&self, _id: &EntryRef, _bytes: u64) {}
    /// All entries of one listing page (and everything below them) are done.
    fn page_done(&self, _folder: &str, _rows: &[ManifestRow]) {}
    fn folder_skipped(&self, _skip: &FolderSkip) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {}

const TICK: Duration = Duration::from_secs(5);

/// Run-wide counters with an optional stderr ticker.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    pub current: Arc<Mutex<String>>,
    pub files_done: Arc<AtomicUsize>,
    pub bytes_done: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            current: Arc::new(Mutex::new(String::new())),
            files_done: Arc::new(AtomicUsize::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let current = self.current.clone();
        let files_done = self.files_done.clone();
        let bytes_done = self.bytes_done.clone();
        let running = self.running.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while running.load(Ordering::Relaxed) {
                thread::sleep(TICK);
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let name = current.lock().map(|s| s.clone()).unwrap_or_default();
                eprintln!(
                    "[{:>4}s] {} | files {} | {}",
                    t0.elapsed().as_secs(),
                    name,
                    files_done.load(Ordering::Relaxed),
                    format_size(bytes_done.load(Ordering::Relaxed))
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}

impl ProgressSink for Progress {
    fn transfer_started(&self, entry: &EntryMetadata) {
        if let Ok(mut cur) = self.current.lock() {
            *cur = entry.name.clone();
        }
    }

    fn chunk_written(&self, id: &EntryRef, chunk_len: u64, bytes_so_far: u64, fraction: Option<f64>) {
        self.bytes_done.fetch_add(chunk_len, Ordering::Relaxed);
        match fraction {
            Some(f) => tracing::debug!(%id, bytes = bytes_so_far, "download progress {}%", (f * 100.0) as u32),
            None => tracing::debug!(%id, bytes = bytes_so_far, "download progress (size unknown)"),
        }
    }

    fn transfer_finished(&self, _id: &EntryRef, _bytes: u64) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_without_ticker() {
        let p = Progress::new(false);
        let id = EntryRef::new("f");
        p.chunk_written(&id, 10, 10, Some(0.5));
        p.chunk_written(&id, 10, 20, Some(1.0));
        p.transfer_finished(&id, 20);
        assert_eq!(p.bytes_done.load(Ordering::Relaxed), 20);
        assert_eq!(p.files_done.load(Ordering::Relaxed), 1);
        p.stop();
    }
}
