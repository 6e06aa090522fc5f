//! Drive v3 style HTTP store.
//!
//! Metadata comes from `files.get`, listings from `files.list` with a
//! `'<id>' in parents` query, and content from `alt=media` reads bounded by
//! `Range` headers. Retries for throttling and server errors live here; the
//! engine only sees the final outcome.

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

use crate::entry::{EntryKind, EntryMetadata, EntryRef, ListingPage};
use crate::error::MirrorError;
use crate::remote::{Chunk, ChunkStream, RemoteStore, DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE, FOLDER_MIME};
use crate::session::Session;

pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

const FILE_FIELDS: &str = "id, name, mimeType, size, parents, modifiedTime";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, parents, modifiedTime)";
/// Drive rejects media ranges that are not multiples of 256 KiB except the last.
const MIN_CHUNK: usize = 256 * 1024;
const MAX_PAGE: usize = 1000;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    fn into_metadata(self) -> Result<EntryMetadata, MirrorError> {
        let kind = if self.mime_type == FOLDER_MIME { EntryKind::Folder } else { EntryKind::File };
        let size_bytes = match self.size {
            Some(s) => Some(s.parse::<u64>().map_err(|_| {
                MirrorError::transport(format!("{}: bad size {:?}", self.id, s))
            })?),
            None => None,
        };
        let modified_at = self
            .modified_time
            .ok_or_else(|| MirrorError::transport(format!("{}: missing modifiedTime", self.id)))?;
        Ok(EntryMetadata {
            id: EntryRef::new(self.id),
            name: self.name,
            kind,
            size_bytes,
            modified_at,
            parents: self.parents.into_iter().map(EntryRef::new).collect(),
            mime_type: Some(self.mime_type),
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct DriveStore {
    client: Client,
    session: Box<dyn Session>,
    base: String,
    page_size: usize,
    chunk_size: usize,
    max_retries: u32,
    backoff: Duration,
}

impl DriveStore {
    pub fn new(session: Box<dyn Session>) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| MirrorError::Config(format!("http client: {}", e)))?;
        Ok(Self::with_client(client, session))
    }

    pub fn with_client(client: Client, session: Box<dyn Session>) -> Self {
        DriveStore {
            client,
            session,
            base: DRIVE_API.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 4,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_base_url(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.clamp(1, MAX_PAGE);
        self
    }

    /// Rounded up to a multiple of 256 KiB.
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n.max(MIN_CHUNK).div_ceil(MIN_CHUNK) * MIN_CHUNK;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, MirrorError> {
        Url::parse_with_params(&format!("{}/{}", self.base, path), params)
            .map_err(|e| MirrorError::Config(format!("bad url for {}: {}", path, e)))
    }

    /// Send with bearer auth, retrying throttling, 5xx and connection errors.
    fn send(&self, what: &str, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response, MirrorError> {
        let mut attempt = 0u32;
        loop {
            let token = self.session.access_token()?;
            let (reason, connection_lost) = match build(&self.client).bearer_auth(token).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || status == StatusCode::RANGE_NOT_SATISFIABLE {
                        return Ok(resp);
                    }
                    match status {
                        StatusCode::UNAUTHORIZED => {
                            return Err(MirrorError::Auth(format!("{}: HTTP {}", what, status)))
                        }
                        StatusCode::NOT_FOUND => return Err(MirrorError::NotFound(what.to_string())),
                        StatusCode::FORBIDDEN => {
                            let body = resp.text().unwrap_or_default();
                            if !body.contains("ateLimitExceeded") {
                                return Err(MirrorError::transport(format!(
                                    "{}: HTTP {}: {}",
                                    what,
                                    status,
                                    body.trim()
                                )));
                            }
                            (format!("HTTP {} (rate limited)", status), false)
                        }
                        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                            (format!("HTTP {}", s), false)
                        }
                        s => return Err(MirrorError::transport(format!("{}: HTTP {}", what, s))),
                    }
                }
                Err(e) => (e.to_string(), true),
            };

            if attempt >= self.max_retries {
                let msg = format!("{}: {} (gave up after {} attempts)", what, reason, attempt + 1);
                return Err(if connection_lost {
                    MirrorError::transport_fatal(msg)
                } else {
                    MirrorError::transport(msg)
                });
            }
            let wait = self.backoff * 2u32.pow(attempt.min(6));
            tracing::warn!(attempt = attempt + 1, "{}: {}; retrying in {:?}", what, reason, wait);
            std::thread::sleep(wait);
            attempt += 1;
        }
    }
}

fn escape_query(id: &str) -> String {
    id.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Total length from `bytes a-b/total` or `bytes */total`.
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().strip_prefix("bytes")?.rsplit_once('/')?;
    total.trim().parse().ok()
}

impl RemoteStore for DriveStore {
    fn get_metadata(&self, id: &EntryRef) -> Result<EntryMetadata, MirrorError> {
        let url = self.url(
            &format!("files/{}", id),
            &[("fields", FILE_FIELDS), ("supportsAllDrives", "true")],
        )?;
        let resp = self.send(&format!("get {}", id), |c| c.get(url.clone()))?;
        let file: DriveFile = resp
            .json()
            .map_err(|e| MirrorError::transport(format!("get {}: {}", id, e)))?;
        file.into_metadata()
    }

    fn list_children(
        &self,
        parent: &EntryRef,
        page_token: Option<&str>,
    ) -> Result<ListingPage, MirrorError> {
        let q = format!("'{}' in parents", escape_query(parent.as_str()));
        let page_size = self.page_size.to_string();
        let mut params = vec![
            ("q", q.as_str()),
            ("pageSize", page_size.as_str()),
            ("fields", LIST_FIELDS),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(tok) = page_token {
            params.push(("pageToken", tok));
        }
        let url = self.url("files", &params)?;
        let what = format!("list {}", parent);
        let resp = self.send(&what, |c| c.get(url.clone()))?;
        let list: DriveFileList =
            resp.json().map_err(|e| MirrorError::transport(format!("{}: {}", what, e)))?;
        let entries = list
            .files
            .into_iter()
            .map(DriveFile::into_metadata)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListingPage { entries, next_page_token: list.next_page_token })
    }

    fn open_chunk_stream(&self, id: &EntryRef) -> Result<ChunkStream<'_>, MirrorError> {
        let url = self.url(&format!("files/{}", id), &[("alt", "media"), ("supportsAllDrives", "true")])?;
        Ok(Box::new(DriveChunks { store: self, id: id.clone(), url, offset: 0, total: None, body: None, done: false }))
    }
}

struct DriveChunks<'a> {
    store: &'a DriveStore,
    id: EntryRef,
    url: Url,
    offset: u64,
    total: Option<u64>,
    /// Set when the server ignored `Range` and sent the whole body.
    body: Option<Response>,
    done: bool,
}

impl DriveChunks<'_> {
    fn fetch(&mut self) -> Result<Option<Chunk>, MirrorError> {
        let bytes = match self.body.as_mut() {
            Some(body) => read_up_to(body, self.store.chunk_size)
                .map_err(|e| MirrorError::transport(format!("media {}: {}", self.id, e)))?,
            None => match self.request()? {
                Some(bytes) => bytes,
                None => return Ok(None),
            },
        };

        self.offset += bytes.len() as u64;
        if bytes.is_empty() || self.total.is_some_and(|t| self.offset >= t) {
            self.done = true;
        }
        if bytes.is_empty() {
            return Ok(None);
        }
        let progress = match self.total {
            Some(0) => Some(1.0),
            Some(t) => Some(self.offset as f64 / t as f64),
            None if self.done => Some(1.0),
            None => None,
        };
        Ok(Some(Chunk { bytes, progress }))
    }

    /// Next ranged request. `None` means the range began past the end.
    fn request(&mut self) -> Result<Option<Vec<u8>>, MirrorError> {
        let last = self.offset + self.store.chunk_size as u64 - 1;
        let range = format!("bytes={}-{}", self.offset, last);
        let what = format!("media {} [{}]", self.id, range);
        let mut resp = self
            .store
            .send(&what, |c| c.get(self.url.clone()).header(RANGE, range.as_str()))?;

        let status = resp.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // asked past the end: empty file or exact multiple of the chunk size
            self.done = true;
            return Ok(None);
        }
        if status == StatusCode::PARTIAL_CONTENT {
            let total = resp
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total);
            if total.is_some() {
                self.total = total;
            }
            let bytes = resp.bytes().map_err(|e| MirrorError::transport(format!("{}: {}", what, e)))?;
            return Ok(Some(bytes.to_vec()));
        }
        if self.offset > 0 {
            return Err(MirrorError::transport(format!("{}: range ignored mid-stream (HTTP {})", what, status)));
        }

        tracing::debug!(id = %self.id, "range ignored, streaming whole body");
        self.total = resp.content_length();
        let bytes = read_up_to(&mut resp, self.store.chunk_size)
            .map_err(|e| MirrorError::transport(format!("{}: {}", what, e)))?;
        self.body = Some(resp);
        Ok(Some(bytes))
    }
}

/// Fill up to `limit` bytes; shorter only at end of body.
fn read_up_to(r: &mut impl Read, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

impl Iterator for DriveChunks<'_> {
    type Item = Result<Chunk, MirrorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
