use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::entry::EntryMetadata;
use crate::error::MirrorError;
use crate::progress::ProgressSink;
use crate::remote::RemoteStore;

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Destination already held a usable copy.
    Present,
    Downloaded { bytes_written: u64, elapsed: Duration },
}

/// What is currently at a download destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Absent,
    Complete,
    /// A regular file whose length disagrees with the remote size.
    Stale(u64),
}

pub fn local_state(
    target: &Path,
    entry: &EntryMetadata,
    verify_size: bool,
) -> Result<LocalState, MirrorError> {
    match std::fs::symlink_metadata(target) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::Absent),
        Err(e) => Err(MirrorError::filesystem(target, e)),
        Ok(m) if m.is_file() => match entry.size_bytes {
            Some(size) if verify_size && m.len() != size => Ok(LocalState::Stale(m.len())),
            _ => Ok(LocalState::Complete),
        },
        Ok(_) => Err(MirrorError::PathConflict(target.to_path_buf())),
    }
}

/// Mirror one remote file to `target`.
///
/// A complete local copy makes this a no-op. Otherwise chunks are streamed
/// straight to disk. The destination is created when the first chunk
/// arrives; a failure after that leaves the partial file in place and
/// reports how many bytes made it.
pub fn download(
    store: &dyn RemoteStore,
    entry: &EntryMetadata,
    target: &Path,
    verify_size: bool,
    sink: &dyn ProgressSink,
) -> Result<TransferOutcome, MirrorError> {
    let overwrite = match local_state(target, entry, verify_size)? {
        LocalState::Complete => {
            tracing::debug!(id = %entry.id, path = ?target, "already present, skipping");
            return Ok(TransferOutcome::Present);
        }
        LocalState::Stale(len) => {
            tracing::info!(
                id = %entry.id,
                path = ?target,
                local = len,
                remote = ?entry.size_bytes,
                "size mismatch, downloading again"
            );
            true
        }
        LocalState::Absent => false,
    };

    let t0 = Instant::now();
    sink.transfer_started(entry);

    let fail = |bytes_written: u64, source: MirrorError| MirrorError::Transfer {
        id: entry.id.to_string(),
        bytes_written,
        source: Box::new(source),
    };

    // created on the first chunk: a download refused up front leaves no file
    let stream = store.open_chunk_stream(&entry.id).map_err(|e| fail(0, e))?;
    let mut file: Option<File> = None;
    let mut written = 0u64;
    for chunk in stream {
        let chunk = chunk.map_err(|e| fail(written, e))?;
        tracing::trace!(id = %entry.id, len = chunk.bytes.len(), store_progress = ?chunk.progress, "chunk");
        if file.is_none() {
            file = Some(open_target(target, overwrite)?);
        }
        if let Some(out) = file.as_mut() {
            out.write_all(&chunk.bytes)
                .map_err(|e| fail(written, MirrorError::filesystem(target, e)))?;
        }
        written += chunk.bytes.len() as u64;
        let fraction = match entry.size_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some(written as f64 / total as f64),
            None => None,
        };
        sink.chunk_written(&entry.id, chunk.bytes.len() as u64, written, fraction);
    }
    let mut file = match file {
        Some(f) => f,
        None => open_target(target, overwrite)?,
    };
    file.flush().map_err(|e| fail(written, MirrorError::filesystem(target, e)))?;
    drop(file);

    let elapsed = t0.elapsed();
    sink.transfer_finished(&entry.id, written);
    tracing::info!(id = %entry.id, path = ?target, bytes = written, ms = elapsed.as_millis() as u64, "downloaded");
    Ok(TransferOutcome::Downloaded { bytes_written: written, elapsed })
}

fn open_target(target: &Path, overwrite: bool) -> Result<File, MirrorError> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if overwrite {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.open(target).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            MirrorError::PathConflict(target.to_path_buf())
        } else {
            MirrorError::filesystem(target, e)
        }
    })
}
