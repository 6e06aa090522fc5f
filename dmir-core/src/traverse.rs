//! Depth-first mirroring of a remote folder tree.
//!
//! Folders are walked with an explicit stack of [`Frame`]s rather than
//! recursion. Each frame owns the pagination cursor of its own listing, so a
//! token never leaves the folder that issued it. A folder entry is descended
//! into as soon as it is popped from the current page, before the next
//! sibling is looked at and before any further page of its parent is fetched.

use rayon::prelude::*;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::config::{MirrorConfig, PathFilter};
use crate::entry::{parse_id, EntryMetadata, EntryRef};
use crate::error::MirrorError;
use crate::manifest::{FolderSkip, Manifest, ManifestRow, RowStatus};
use crate::path_map::{ensure_dir, ensure_root, remote_path, resolve};
use crate::progress::{NoProgress, ProgressSink};
use crate::remote::RemoteStore;
use crate::transfer::{self, TransferOutcome};

/// Shared "stop scheduling new work" switch.
///
/// Checked before every page fetch, folder descent and transfer start;
/// a transfer already streaming runs to the end of its stream.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A folder whose listing is in progress.
struct Frame {
    folder: EntryRef,
    /// Remote folder names from the root down to this folder.
    segments: Vec<String>,
    pending: VecDeque<EntryMetadata>,
    next_token: Option<String>,
    pages_listed: usize,
    page_rows: Vec<ManifestRow>,
}

impl Frame {
    fn new(folder: EntryRef, segments: Vec<String>) -> Self {
        Frame {
            folder,
            segments,
            pending: VecDeque::new(),
            next_token: None,
            pages_listed: 0,
            page_rows: Vec::new(),
        }
    }

    fn needs_page(&self) -> bool {
        self.pages_listed == 0 || self.next_token.is_some()
    }
}

static NO_PROGRESS: NoProgress = NoProgress;

pub struct TraversalEngine<'a> {
    store: &'a dyn RemoteStore,
    cfg: MirrorConfig,
    filter: PathFilter,
    pool: Option<rayon::ThreadPool>,
    sink: &'a dyn ProgressSink,
    cancel: CancelFlag,
}

impl<'a> TraversalEngine<'a> {
    pub fn new(store: &'a dyn RemoteStore, cfg: MirrorConfig) -> Result<Self, MirrorError> {
        let filter = PathFilter::new(&cfg.include, &cfg.exclude)?;
        let pool = if cfg.jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.jobs)
                .thread_name(|i| format!("dmir-transfer-{}", i))
                .build()
                .map_err(|e| MirrorError::Config(format!("transfer pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };
        Ok(TraversalEngine { store, cfg, filter, pool, sink: &NO_PROGRESS, cancel: CancelFlag::new() })
    }

    pub fn with_sink(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mirror the folder named by `reference` (share URL or bare id).
    pub fn run(&self, reference: &str, local_root: &Path) -> Result<Manifest, MirrorError> {
        let root_id = parse_id(reference)?;
        self.run_from(&root_id, local_root)
    }

    pub fn run_from(&self, root_id: &EntryRef, local_root: &Path) -> Result<Manifest, MirrorError> {
        let root = self.store.get_metadata(root_id)?;
        if !root.is_folder() {
            return Err(MirrorError::NotAFolder(format!("{} ({})", root.name, root.id)));
        }
        ensure_root(local_root)?;
        tracing::info!(id = %root.id, name = %root.name, dest = ?local_root, "mirroring folder");

        let mut manifest = Manifest::new(&root, local_root);
        let mut stack = vec![Frame::new(root.id.clone(), Vec::new())];

        loop {
            if self.cancel.is_cancelled() {
                tracing::warn!("cancelled; {} folder(s) left unfinished", stack.len());
                manifest.cancelled = true;
                break;
            }
            let depth = stack.len();
            let Some(frame) = stack.last_mut() else {
                break;
            };

            if let Some(entry) = frame.pending.pop_front() {
                if entry.is_folder() {
                    let dir = resolve(local_root, &frame.segments, &entry.name);
                    let mut segments = frame.segments.clone();
                    segments.push(entry.name.clone());
                    match ensure_dir(&dir) {
                        Ok(()) => {
                            tracing::debug!(id = %entry.id, path = ?dir, "descending");
                            stack.push(Frame::new(entry.id, segments));
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => self.skip_folder(&mut manifest, &entry.id, &segments, 0, e),
                    }
                } else {
                    let mut batch = vec![entry];
                    while frame.pending.front().is_some_and(|e| !e.is_folder()) {
                        batch.extend(frame.pending.pop_front());
                    }
                    let rows = self.visit_files(&batch, &frame.segments, local_root)?;
                    frame.page_rows.extend(rows.iter().cloned());
                    manifest.rows.extend(rows);
                }
                continue;
            }

            if frame.pages_listed > 0 {
                let rows = std::mem::take(&mut frame.page_rows);
                self.sink.page_done(&folder_label(&frame.segments), &rows);
            }
            if !frame.needs_page() {
                stack.pop();
                continue;
            }

            let token = frame.next_token.take();
            match self.store.list_children(&frame.folder, token.as_deref()) {
                Ok(page) => {
                    frame.pages_listed += 1;
                    tracing::debug!(
                        folder = %frame.folder,
                        page = frame.pages_listed,
                        entries = page.entries.len(),
                        more = page.next_page_token.is_some(),
                        "listed page"
                    );
                    frame.pending = page.entries.into();
                    frame.next_token = page.next_page_token;
                }
                Err(e) if e.is_fatal() || depth == 1 => return Err(e),
                Err(e) => {
                    let (id, segments, pages) =
                        (frame.folder.clone(), frame.segments.clone(), frame.pages_listed);
                    stack.pop();
                    self.skip_folder(&mut manifest, &id, &segments, pages, e);
                }
            }
        }

        tracing::info!("{}", manifest.summary());
        Ok(manifest)
    }

    /// Handle a run of consecutive sibling files, in parallel when a pool
    /// is configured. Rows come back in listing order either way.
    fn visit_files(
        &self,
        batch: &[EntryMetadata],
        segments: &[String],
        local_root: &Path,
    ) -> Result<Vec<ManifestRow>, MirrorError> {
        let results: Vec<Result<Option<ManifestRow>, MirrorError>> = match &self.pool {
            Some(pool) if batch.len() > 1 => pool.install(|| {
                batch.par_iter().map(|e| self.visit_file(e, segments, local_root)).collect()
            }),
            _ => {
                let mut out = Vec::with_capacity(batch.len());
                for e in batch {
                    let r = self.visit_file(e, segments, local_root);
                    let stop = matches!(&r, Err(err) if err.is_fatal());
                    out.push(r);
                    if stop {
                        break;
                    }
                }
                out
            }
        };

        let mut rows = Vec::with_capacity(results.len());
        for r in results {
            if let Some(row) = r? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// `Ok(None)` means the file was never attempted (cancelled).
    fn visit_file(
        &self,
        entry: &EntryMetadata,
        segments: &[String],
        local_root: &Path,
    ) -> Result<Option<ManifestRow>, MirrorError> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        let rpath = remote_path(segments, &entry.name);
        if !self.filter.allows(&rpath) {
            tracing::debug!(path = %rpath, "filtered out");
            return Ok(Some(ManifestRow::new(entry, rpath, RowStatus::Filtered)));
        }

        let target = resolve(local_root, segments, &entry.name);
        let status = match transfer::download(self.store, entry, &target, self.cfg.verify_size, self.sink) {
            Ok(TransferOutcome::Present) => RowStatus::Present,
            Ok(TransferOutcome::Downloaded { bytes_written, elapsed }) => {
                RowStatus::Downloaded { bytes_written, elapsed_ms: elapsed.as_millis() as u64 }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(id = %entry.id, path = %rpath, "{}", e);
                RowStatus::Failed { error: e.to_string(), bytes_written: e.bytes_written() }
            }
        };
        Ok(Some(ManifestRow::new(entry, rpath, status)))
    }

    fn skip_folder(
        &self,
        manifest: &mut Manifest,
        id: &EntryRef,
        segments: &[String],
        pages_listed: usize,
        err: MirrorError,
    ) {
        tracing::warn!(folder = %id, path = %folder_label(segments), "skipping folder: {}", err);
        let skip = FolderSkip {
            id: id.to_string(),
            remote_path: folder_label(segments),
            pages_listed,
            error: err.to_string(),
        };
        self.sink.folder_skipped(&skip);
        manifest.skipped_folders.push(skip);
    }
}

fn folder_label(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        segments.join("/")
    }
}
