pub mod config;
pub mod dir_store;
pub mod drive;
pub mod entry;
pub mod error;
pub mod manifest;
pub mod path_map;
pub mod progress;
pub mod remote;
pub mod report;
pub mod session;
pub mod transfer;
pub mod traverse;

pub use entry::{parse_id, EntryKind, EntryMetadata, EntryRef, ListingPage};
pub use error::MirrorError;
pub use manifest::{FolderSkip, Manifest, ManifestRow, RowStatus};
pub use remote::RemoteStore;
pub use traverse::{CancelFlag, TraversalEngine};
