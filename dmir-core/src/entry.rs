use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MirrorError;

/// Opaque identifier of a remote file or folder.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntryRef(String);

impl EntryRef {
    pub fn new(id: impl Into<String>) -> Self {
        EntryRef(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryRef {
    fn from(s: &str) -> Self {
        EntryRef(s.to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EntryMetadata {
    pub id: EntryRef,
    pub name: String,
    pub kind: EntryKind,
    /// Absent for folders and for remote-native documents without a byte size.
    pub size_bytes: Option<u64>,
    pub modified_at: DateTime<Utc>,
    /// May be empty (shared items, store roots).
    pub parents: Vec<EntryRef>,
    pub mime_type: Option<String>,
}

impl EntryMetadata {
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// One page of a folder listing. No token means this was the last page.
#[derive(Clone, Debug, Default)]
pub struct ListingPage {
    pub entries: Vec<EntryMetadata>,
    pub next_page_token: Option<String>,
}

/// Resolve a folder reference (share URL or bare id) to an [`EntryRef`].
///
/// The query string and fragment are stripped and the last non-empty path
/// segment is taken, so `.../folders/ABC123?usp=sharing` yields `ABC123`.
/// Legacy `open?id=XYZ` links carry the id in the query and are honoured.
pub fn parse_id(reference: &str) -> Result<EntryRef, MirrorError> {
    let trimmed = reference.trim();
    let (path, query) = match trimmed.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (trimmed, None),
    };
    let path = path.split('#').next().unwrap_or("");
    let query = query.map(|q| q.split('#').next().unwrap_or(""));

    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some(id) = pair.strip_prefix("id=") {
                if !id.is_empty() {
                    return Ok(EntryRef::new(id));
                }
            }
        }
    }

    match path.rsplit('/').find(|seg| !seg.is_empty()) {
        Some(seg) if !seg.ends_with(':') => Ok(EntryRef::new(seg)),
        _ => Err(MirrorError::InvalidReference(reference.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_url_and_bare_id() {
        let id = parse_id("https://drive.google.com/drive/folders/ABC123?usp=sharing").unwrap();
        assert_eq!(id.as_str(), "ABC123");
        let id = parse_id("https://drive.google.com/drive/folders/XYZ").unwrap();
        assert_eq!(id.as_str(), "XYZ");
        assert_eq!(parse_id("1-cmUKkdiDwRz2otQfmGJf").unwrap().as_str(), "1-cmUKkdiDwRz2otQfmGJf");
    }

    #[test]
    fn trailing_slash_fragment_and_open_links() {
        assert_eq!(parse_id("https://host/folders/XYZ/").unwrap().as_str(), "XYZ");
        assert_eq!(parse_id("https://host/folders/XYZ#top").unwrap().as_str(), "XYZ");
        assert_eq!(parse_id("https://drive.google.com/open?id=Q42&authuser=0").unwrap().as_str(), "Q42");
        // query is stripped before the segment split
        assert_eq!(parse_id("https://host/folders/ABC?next=a/b").unwrap().as_str(), "ABC");
    }

    #[test]
    fn empty_reference_is_rejected() {
        assert!(matches!(parse_id(""), Err(MirrorError::InvalidReference(_))));
        assert!(matches!(parse_id("https://"), Err(MirrorError::InvalidReference(_))));
        assert!(matches!(parse_id("?usp=sharing"), Err(MirrorError::InvalidReference(_))));
    }
}
