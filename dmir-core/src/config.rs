use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::MirrorError;

/// Run settings for [`crate::TraversalEngine`]. Page and chunk sizes belong
/// to the store and are set where the store is built.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Worker threads for sibling file transfers; 1 keeps the run sequential.
    pub jobs: usize,
    /// Re-download a present file whose length differs from the remote size.
    pub verify_size: bool,
    /// Globs over the remote path (`folder/sub/name`); empty means everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig { jobs: 1, verify_size: true, include: Vec::new(), exclude: Vec::new() }
    }
}

/// Compiled include/exclude patterns.
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, MirrorError> {
        let mut incb = GlobSetBuilder::new();
        let mut excb = GlobSetBuilder::new();
        if includes.is_empty() {
            incb.add(glob("**")?);
        }
        for g in includes {
            incb.add(glob(g)?);
        }
        for g in excludes {
            excb.add(glob(g)?);
        }
        let build = |b: GlobSetBuilder| b.build().map_err(|e| MirrorError::Config(e.to_string()));
        Ok(PathFilter { include: build(incb)?, exclude: build(excb)? })
    }

    pub fn allows(&self, remote_path: &str) -> bool {
        self.include.is_match(remote_path) && !self.exclude.is_match(remote_path)
    }
}

fn glob(pattern: &str) -> Result<Glob, MirrorError> {
    Glob::new(pattern).map_err(|e| MirrorError::Config(format!("bad pattern {:?}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_then_exclude() {
        let f = PathFilter::new(&["**/*.pdf".into(), "*.pdf".into()], &["drafts/**".into()]).unwrap();
        assert!(f.allows("paper.pdf"));
        assert!(f.allows("2024/q1/paper.pdf"));
        assert!(!f.allows("drafts/paper.pdf"));
        assert!(!f.allows("notes.txt"));

        let all = PathFilter::new(&[], &[]).unwrap();
        assert!(all.allows("a/b/c.bin"));
    }

    #[test]
    fn bad_pattern_is_config_error() {
        assert!(matches!(PathFilter::new(&["a[".into()], &[]), Err(MirrorError::Config(_))));
    }
}
