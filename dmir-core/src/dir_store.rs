//! A local directory exposed through the [`RemoteStore`] contract.
//!
//! Useful for dry runs, offline tests and mirroring mounted shares. The tree
//! is indexed once at [`DirStore::open`]; ids are derived from the relative
//! path so they are stable across runs and contain no separators.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::entry::{EntryKind, EntryMetadata, EntryRef, ListingPage};
use crate::error::MirrorError;
use crate::remote::{Chunk, ChunkStream, RemoteStore, DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};

struct Indexed {
    path: PathBuf,
    meta: EntryMetadata,
}

pub struct DirStore {
    root_id: EntryRef,
    entries: HashMap<EntryRef, Indexed>,
    children: HashMap<EntryRef, Vec<EntryRef>>,
    page_size: usize,
    chunk_size: usize,
}

fn id_for(rel: &str) -> EntryRef {
    let hex = blake3::hash(rel.as_bytes()).to_hex();
    EntryRef::new(&hex.as_str()[..24])
}

fn metadata_for(path: &Path, id: EntryRef, name: String, parent: Option<&EntryRef>) -> Result<EntryMetadata, MirrorError> {
    let md = std::fs::metadata(path).map_err(|e| MirrorError::filesystem(path, e))?;
    let modified_at: DateTime<Utc> = md.modified().map(DateTime::from).unwrap_or_default();
    let kind = if md.is_dir() { EntryKind::Folder } else { EntryKind::File };
    Ok(EntryMetadata {
        id,
        name,
        kind,
        size_bytes: (kind == EntryKind::File).then(|| md.len()),
        modified_at,
        parents: parent.into_iter().cloned().collect(),
        mime_type: None,
    })
}

impl DirStore {
    /// Index `root`. Symlinks and special files are left out.
    pub fn open(root: &Path) -> Result<Self, MirrorError> {
        let root = root.to_path_buf();
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string());
        let root_id = id_for("");
        let root_meta = metadata_for(&root, root_id.clone(), root_name, None)?;
        if !root_meta.is_folder() {
            return Err(MirrorError::NotAFolder(root.to_string_lossy().to_string()));
        }

        let mut entries = HashMap::new();
        let mut children: HashMap<EntryRef, Vec<EntryRef>> = HashMap::new();
        entries.insert(root_id.clone(), Indexed { path: root.clone(), meta: root_meta });

        for ent in walkdir::WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let ent = ent.map_err(std::io::Error::from)?;
            let ft = ent.file_type();
            if !(ft.is_dir() || ft.is_file()) {
                continue;
            }
            let Ok(rel) = ent.path().strip_prefix(&root) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let parent_rel = rel
                .parent()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let parent_id = id_for(&parent_rel);
            if !entries.contains_key(&parent_id) {
                // parent was skipped (symlinked directory)
                continue;
            }
            let id = id_for(&rel_str);
            let name = ent.file_name().to_string_lossy().to_string();
            let meta = metadata_for(ent.path(), id.clone(), name, Some(&parent_id))?;
            children.entry(parent_id).or_default().push(id.clone());
            entries.insert(id, Indexed { path: ent.path().to_path_buf(), meta });
        }

        tracing::debug!(root = ?root, entries = entries.len(), "indexed directory store");
        Ok(DirStore { root_id, entries, children, page_size: DEFAULT_PAGE_SIZE, chunk_size: DEFAULT_CHUNK_SIZE })
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n.max(1);
        self
    }

    pub fn root_ref(&self) -> &EntryRef {
        &self.root_id
    }
}

impl RemoteStore for DirStore {
    fn get_metadata(&self, id: &EntryRef) -> Result<EntryMetadata, MirrorError> {
        self.entries
            .get(id)
            .map(|e| e.meta.clone())
            .ok_or_else(|| MirrorError::NotFound(id.to_string()))
    }

    fn list_children(
        &self,
        parent: &EntryRef,
        page_token: Option<&str>,
    ) -> Result<ListingPage, MirrorError> {
        if !self.entries.contains_key(parent) {
            return Err(MirrorError::NotFound(parent.to_string()));
        }
        let start = match page_token {
            None => 0,
            Some(tok) => {
                let bad = || MirrorError::InvalidPageToken { parent: parent.to_string(), token: tok.to_string() };
                let (owner, offset) = tok.split_once(':').ok_or_else(bad)?;
                if owner != parent.as_str() {
                    return Err(bad());
                }
                offset.parse::<usize>().map_err(|_| bad())?
            }
        };
        let kids = self.children.get(parent).map(Vec::as_slice).unwrap_or(&[]);
        let end = (start + self.page_size).min(kids.len());
        let entries = kids
            .get(start..end)
            .unwrap_or(&[])
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.meta.clone()))
            .collect();
        let next_page_token = (end < kids.len()).then(|| format!("{}:{}", parent, end));
        Ok(ListingPage { entries, next_page_token })
    }

    fn open_chunk_stream(&self, id: &EntryRef) -> Result<ChunkStream<'_>, MirrorError> {
        let ent = self.entries.get(id).ok_or_else(|| MirrorError::NotFound(id.to_string()))?;
        if ent.meta.is_folder() {
            return Err(MirrorError::NotFound(format!("{} is a folder", id)));
        }
        let file = File::open(&ent.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MirrorError::NotFound(id.to_string()),
            _ => MirrorError::transport(format!("open {:?}: {}", ent.path, e)),
        })?;
        let total = file.metadata().map(|m| m.len()).ok();
        Ok(Box::new(FileChunks { file, buf_len: self.chunk_size, read: 0, total, done: false }))
    }
}

struct FileChunks {
    file: File,
    buf_len: usize,
    read: u64,
    total: Option<u64>,
    done: bool,
}

impl Iterator for FileChunks {
    type Item = Result<Chunk, MirrorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.buf_len];
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(MirrorError::transport(format!("read: {}", e))));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        buf.truncate(filled);
        self.read += filled as u64;
        let progress = self.total.filter(|t| *t > 0).map(|t| self.read as f64 / t as f64);
        Some(Ok(Chunk { bytes: buf, progress }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_separator_free() {
        let a = id_for("docs/a.txt");
        assert_eq!(a, id_for("docs/a.txt"));
        assert_ne!(a, id_for("docs/b.txt"));
        assert!(!a.as_str().contains('/'));
        assert_eq!(a.as_str().len(), 24);
    }

    #[test]
    fn tokens_are_bound_to_their_parent() {
        let td = tempfile::tempdir().unwrap();
        std::fs::create_dir(td.path().join("sub")).unwrap();
        for i in 0..5 {
            std::fs::write(td.path().join(format!("f{}.txt", i)), b"x").unwrap();
        }
        let store = DirStore::open(td.path()).unwrap().with_page_size(2);
        let root = store.root_ref().clone();

        let p1 = store.list_children(&root, None).unwrap();
        assert_eq!(p1.entries.len(), 2);
        let tok = p1.next_page_token.clone().unwrap();

        let sub = store.list_children(&root, None).unwrap().entries
            .into_iter()
            .chain(store.list_children(&root, Some(&tok)).unwrap().entries)
            .chain(store.list_children(&root, Some(&format!("{}:4", root))).unwrap().entries)
            .find(|e| e.is_folder())
            .unwrap();
        let err = store.list_children(&sub.id, Some(&tok)).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidPageToken { .. }));
    }

    #[test]
    fn chunk_stream_reads_whole_file_in_bounded_pieces() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("blob"), vec![7u8; 10_000]).unwrap();
        let store = DirStore::open(td.path()).unwrap().with_chunk_size(4096);
        let page = store.list_children(store.root_ref(), None).unwrap();
        let chunks: Vec<Chunk> = store
            .open_chunk_stream(&page.entries[0].id)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.iter().map(|c| c.bytes.len()).collect::<Vec<_>>(), vec![4096, 4096, 1808]);
        assert_eq!(chunks.last().unwrap().progress, Some(1.0));
    }
}
