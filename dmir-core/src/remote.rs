//! The remote store capability consumed by traversal and transfer.

use crate::entry::{EntryMetadata, EntryRef, ListingPage};
use crate::error::MirrorError;

/// MIME type the Drive API uses to mark folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Entries requested per listing page. Pagination fixtures depend on it.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Bytes requested per media read.
pub const DEFAULT_CHUNK_SIZE: usize = 8 << 20;

/// A bounded piece of a file's content.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// Store-reported fraction of the file delivered so far, if known.
    pub progress: Option<f64>,
}

/// Lazily produced chunks; each `next()` may block on the network.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<Chunk, MirrorError>> + Send + 'a>;

/// Metadata, paginated listing and chunked media access for one remote tree.
///
/// Implementations own their retry policy and surface only pass/fail,
/// marking exhausted transports with [`MirrorError::transport_fatal`].
pub trait RemoteStore: Send + Sync {
    fn get_metadata(&self, id: &EntryRef) -> Result<EntryMetadata, MirrorError>;

    /// Children of `parent`, one page at a time. A token is only valid for
    /// the parent whose listing produced it.
    fn list_children(
        &self,
        parent: &EntryRef,
        page_token: Option<&str>,
    ) -> Result<ListingPage, MirrorError>;

    fn open_chunk_stream(&self, id: &EntryRef) -> Result<ChunkStream<'_>, MirrorError>;
}
