#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use dmir_core::error::MirrorError;
use dmir_core::remote::{Chunk, ChunkStream, RemoteStore};
use dmir_core::{EntryKind, EntryMetadata, EntryRef, ListingPage};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Every call the engine made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Meta(String),
    List(String, Option<String>),
    Open(String),
}

type OpenHook = Box<dyn Fn(&EntryRef) + Send + Sync>;

/// Scripted in-memory tree with failure injection.
pub struct StubStore {
    meta: HashMap<String, EntryMetadata>,
    children: HashMap<String, Vec<String>>,
    content: HashMap<String, Vec<u8>>,
    pub page_size: usize,
    pub chunk_size: usize,
    fail_list: HashMap<String, (usize, bool)>,
    fail_stream_after: HashMap<String, usize>,
    fail_open: HashSet<String>,
    on_open: Option<OpenHook>,
    pub calls: Mutex<Vec<Call>>,
}

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

impl StubStore {
    pub fn new(root_id: &str, root_name: &str) -> Self {
        let mut s = StubStore {
            meta: HashMap::new(),
            children: HashMap::new(),
            content: HashMap::new(),
            page_size: 1000,
            chunk_size: 64 * 1024,
            fail_list: HashMap::new(),
            fail_stream_after: HashMap::new(),
            fail_open: HashSet::new(),
            on_open: None,
            calls: Mutex::new(Vec::new()),
        };
        s.meta.insert(root_id.into(), folder_meta(root_id, root_name, None));
        s
    }

    pub fn folder(mut self, id: &str, name: &str, parent: &str) -> Self {
        self.meta.insert(id.into(), folder_meta(id, name, Some(parent)));
        self.children.entry(parent.into()).or_default().push(id.into());
        self
    }

    pub fn file(mut self, id: &str, name: &str, parent: &str, body: Vec<u8>) -> Self {
        self.meta.insert(
            id.into(),
            EntryMetadata {
                id: EntryRef::new(id),
                name: name.into(),
                kind: EntryKind::File,
                size_bytes: Some(body.len() as u64),
                modified_at: ts(),
                parents: vec![EntryRef::new(parent)],
                mime_type: Some("application/octet-stream".into()),
            },
        );
        self.content.insert(id.into(), body);
        self.children.entry(parent.into()).or_default().push(id.into());
        self
    }

    /// A file entry with no size (remote-native document).
    pub fn sizeless_file(mut self, id: &str, name: &str, parent: &str, body: Vec<u8>) -> Self {
        self = self.file(id, name, parent, body);
        if let Some(m) = self.meta.get_mut(id) {
            m.size_bytes = None;
        }
        self
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = n;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// Fail listing of `folder` when asked for page index `page` (0-based).
    pub fn fail_listing(mut self, folder: &str, page: usize, fatal: bool) -> Self {
        self.fail_list.insert(folder.into(), (page, fatal));
        self
    }

    pub fn fail_stream_after(mut self, file: &str, chunks: usize) -> Self {
        self.fail_stream_after.insert(file.into(), chunks);
        self
    }

    pub fn fail_open(mut self, file: &str) -> Self {
        self.fail_open.insert(file.into());
        self
    }

    pub fn on_open(mut self, hook: impl Fn(&EntryRef) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Open(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

fn folder_meta(id: &str, name: &str, parent: Option<&str>) -> EntryMetadata {
    EntryMetadata {
        id: EntryRef::new(id),
        name: name.into(),
        kind: EntryKind::Folder,
        size_bytes: None,
        modified_at: ts(),
        parents: parent.into_iter().map(EntryRef::new).collect(),
        mime_type: Some(dmir_core::remote::FOLDER_MIME.into()),
    }
}

impl RemoteStore for StubStore {
    fn get_metadata(&self, id: &EntryRef) -> Result<EntryMetadata, MirrorError> {
        self.calls.lock().unwrap().push(Call::Meta(id.to_string()));
        self.meta.get(id.as_str()).cloned().ok_or_else(|| MirrorError::NotFound(id.to_string()))
    }

    fn list_children(&self, parent: &EntryRef, page_token: Option<&str>) -> Result<ListingPage, MirrorError> {
        self.calls.lock().unwrap().push(Call::List(parent.to_string(), page_token.map(String::from)));
        let page = match page_token {
            None => 0,
            Some(t) => {
                let (owner, n) = t.split_once('#').unwrap();
                if owner != parent.as_str() {
                    return Err(MirrorError::InvalidPageToken { parent: parent.to_string(), token: t.into() });
                }
                n.parse::<usize>().unwrap()
            }
        };
        if let Some(&(fail_page, fatal)) = self.fail_list.get(parent.as_str()) {
            if fail_page == page {
                return Err(MirrorError::Transport { message: format!("list {} failed", parent), fatal });
            }
        }
        let kids = self.children.get(parent.as_str()).cloned().unwrap_or_default();
        let start = page * self.page_size;
        let end = (start + self.page_size).min(kids.len());
        let entries = kids[start.min(end)..end].iter().map(|id| self.meta[id].clone()).collect();
        let next_page_token = (end < kids.len()).then(|| format!("{}#{}", parent, page + 1));
        Ok(ListingPage { entries, next_page_token })
    }

    fn open_chunk_stream(&self, id: &EntryRef) -> Result<ChunkStream<'_>, MirrorError> {
        self.calls.lock().unwrap().push(Call::Open(id.to_string()));
        if let Some(hook) = &self.on_open {
            hook(id);
        }
        if self.fail_open.contains(id.as_str()) {
            return Err(MirrorError::NotFound(id.to_string()));
        }
        let body = self.content.get(id.as_str()).cloned().ok_or_else(|| MirrorError::NotFound(id.to_string()))?;
        let total = body.len();
        let fail_after = self.fail_stream_after.get(id.as_str()).copied();
        let pieces: Vec<Vec<u8>> = body.chunks(self.chunk_size).map(<[u8]>::to_vec).collect();
        let mut sent = 0usize;
        let iter = pieces.into_iter().enumerate().map(move |(i, bytes)| {
            if fail_after == Some(i) {
                return Err(MirrorError::transport("connection reset mid-stream"));
            }
            sent += bytes.len();
            Ok(Chunk { progress: Some(sent as f64 / total.max(1) as f64), bytes })
        });
        // stop after the injected failure like a real stream would
        let mut failed = false;
        Ok(Box::new(iter.take_while(move |r| {
            let keep = !failed;
            failed |= r.is_err();
            keep
        })))
    }
}

pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
