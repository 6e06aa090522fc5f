use std::path::{Path, PathBuf};

use crate::error::MirrorError;

/// Make a remote entry name usable as a single local path component.
///
/// Remote names may contain separators or be `.`/`..`; none of that may
/// move a write outside the mirror root.
pub fn sanitize_name(name: &str) -> String {
    let mut s: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if s.is_empty() || s == "." || s == ".." {
        s = format!("_{}", s);
    }
    s
}

/// Local path for `name` under the folder chain `segments` below `local_root`.
pub fn resolve(local_root: &Path, segments: &[String], name: &str) -> PathBuf {
    let mut p = local_root.to_path_buf();
    for seg in segments {
        p.push(sanitize_name(seg));
    }
    p.push(sanitize_name(name));
    p
}

/// `/`-joined remote path, used for reporting and include/exclude matching.
pub fn remote_path(segments: &[String], name: &str) -> String {
    let mut s = String::new();
    for seg in segments {
        s.push_str(seg);
        s.push('/');
    }
    s.push_str(name);
    s
}

/// Create one directory level. Already existing as a real directory is
/// success; a file or a symlink (even to a directory) is a conflict.
pub fn ensure_dir(path: &Path) -> Result<(), MirrorError> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let md = std::fs::symlink_metadata(path).map_err(|e| MirrorError::filesystem(path, e))?;
            if md.file_type().is_dir() {
                Ok(())
            } else {
                Err(MirrorError::PathConflict(path.to_path_buf()))
            }
        }
        Err(e) => Err(MirrorError::filesystem(path, e)),
    }
}

/// Create the mirror root (and its ancestors). Failure here ends the run.
pub fn ensure_root(local_root: &Path) -> Result<(), MirrorError> {
    std::fs::create_dir_all(local_root).map_err(|e| MirrorError::filesystem(local_root, e))?;
    if !local_root.is_dir() {
        return Err(MirrorError::PathConflict(local_root.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostile_names_stay_under_root() {
        let root = Path::new("/tmp/mirror");
        let segs = vec!["..".to_string(), "a/b".to_string()];
        let p = resolve(root, &segs, "../../etc/passwd");
        assert_eq!(p, root.join("_..").join("a_b").join(".._.._etc_passwd"));
        assert_eq!(sanitize_name(""), "_");
        assert_eq!(sanitize_name("."), "_.");
    }

    #[test]
    fn ensure_dir_is_idempotent_and_detects_conflicts() {
        let td = tempfile::tempdir().unwrap();
        let d = td.path().join("sub");
        ensure_dir(&d).unwrap();
        ensure_dir(&d).unwrap();
        assert!(d.is_dir());

        let f = td.path().join("file");
        std::fs::write(&f, b"x").unwrap();
        assert!(matches!(ensure_dir(&f), Err(MirrorError::PathConflict(_))));

        let orphan = td.path().join("missing").join("child");
        assert!(matches!(ensure_dir(&orphan), Err(MirrorError::Filesystem { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_a_conflict() {
        let td = tempfile::tempdir().unwrap();
        let outside = td.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        let link = td.path().join("mirror-sub");
        std::os::unix::fs::symlink(&outside, &link).unwrap();
        assert!(matches!(ensure_dir(&link), Err(MirrorError::PathConflict(_))));
    }

    #[test]
    fn remote_path_joins_segments() {
        assert_eq!(remote_path(&[], "a.txt"), "a.txt");
        assert_eq!(remote_path(&["x".into(), "y".into()], "a.txt"), "x/y/a.txt");
    }
}
