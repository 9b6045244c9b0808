//! Per-run working directory with path confinement.
//!
//! Every path a step config names is resolved with [`WorkDir::join`], which
//! never yields a path outside the root: `..` is clamped at the root, absolute
//! paths are taken relative to the root, and symbolic links are followed
//! within the root the same way.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::WorkDirError;

const MAX_SYMLINK_HOPS: usize = 255;

#[derive(Debug)]
enum Part {
    Root,
    Parent,
    Name(OsString),
}

fn parts_of(path: &Path) -> Vec<Part> {
    path.components()
        .filter_map(|c| match c {
            Component::Prefix(_) | Component::RootDir => Some(Part::Root),
            Component::CurDir => None,
            Component::ParentDir => Some(Part::Parent),
            Component::Normal(name) => Some(Part::Name(name.to_os_string())),
        })
        .collect()
}

/// Root directory shared by all steps of a promotion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn under_root(&self, current: &[OsString]) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(current);
        path
    }

    /// Resolve `unsafe_path` to a path inside the root.
    ///
    /// The target does not need to exist; only existing symlinks along the
    /// way are resolved.
    pub fn join(&self, unsafe_path: impl AsRef<Path>) -> Result<PathBuf, WorkDirError> {
        let unsafe_path = unsafe_path.as_ref();
        let mut pending: VecDeque<Part> = parts_of(unsafe_path).into();
        let mut current: Vec<OsString> = Vec::new();
        let mut hops = 0usize;

        while let Some(part) = pending.pop_front() {
            match part {
                Part::Root => current.clear(),
                Part::Parent => {
                    current.pop();
                }
                Part::Name(name) => {
                    current.push(name);
                    let candidate = self.under_root(&current);
                    let is_link = std::fs::symlink_metadata(&candidate)
                        .map(|m| m.file_type().is_symlink())
                        .unwrap_or(false);
                    if !is_link {
                        continue;
                    }
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(WorkDirError::TooManyLinks {
                            path: unsafe_path.display().to_string(),
                        });
                    }
                    let target =
                        std::fs::read_link(&candidate).map_err(|source| WorkDirError::Io {
                            path: unsafe_path.display().to_string(),
                            source,
                        })?;
                    current.pop();
                    for part in parts_of(&target).into_iter().rev() {
                        pending.push_front(part);
                    }
                }
            }
        }

        Ok(self.under_root(&current))
    }

    /// Path of `path` relative to the root, for messages and outputs.
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Write `contents` to `path` readable only by the owner, creating owner-only
/// parent directories as needed.
pub fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        create_private_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)
}

pub fn create_private_dir_all(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_plain_relative() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkDir::new(dir.path());
        assert_eq!(
            wd.join("charts/app/values.yaml").unwrap(),
            dir.path().join("charts/app/values.yaml")
        );
    }

    #[test]
    fn test_join_clamps_parent_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkDir::new(dir.path());
        assert_eq!(
            wd.join("../../etc/passwd").unwrap(),
            dir.path().join("etc/passwd")
        );
        assert_eq!(wd.join("a/../../b").unwrap(), dir.path().join("b"));
    }

    #[test]
    fn test_join_absolute_is_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkDir::new(dir.path());
        assert_eq!(wd.join("/etc/passwd").unwrap(), dir.path().join("etc/passwd"));
        assert_eq!(wd.join("").unwrap(), dir.path().to_path_buf());
    }

    #[cfg(unix)]
    #[test]
    fn test_join_confines_escaping_symlink() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink("/etc", dir.path().join("abs")).unwrap();
        std::os::unix::fs::symlink("../../..", dir.path().join("real/up")).unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("rel")).unwrap();

        let wd = WorkDir::new(dir.path());
        assert_eq!(wd.join("abs/passwd").unwrap(), dir.path().join("etc/passwd"));
        assert_eq!(wd.join("real/up/x").unwrap(), dir.path().join("x"));
        assert_eq!(wd.join("rel/file").unwrap(), dir.path().join("real/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_join_symlink_loop() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("b", dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("b")).unwrap();
        let wd = WorkDir::new(dir.path());
        assert!(matches!(
            wd.join("a/x"),
            Err(WorkDirError::TooManyLinks { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/nested/manifest.yaml");
        write_private(&out, b"kind: ConfigMap\n").unwrap();
        let mode = std::fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let dir_mode = std::fs::metadata(out.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode & 0o077, 0);
    }
}
