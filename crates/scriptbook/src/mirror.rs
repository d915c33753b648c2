//! Local copies of saved files and collection of sources to upload.

use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::error::{NotebookError, Result};
use crate::protocol::SourceFile;

/// Writes every saved file under a local root directory as well.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for a workspace-relative `path`.
    ///
    /// Absolute paths and paths that climb out with `..` are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut pushed = false;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    pushed = true;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(path_error(path, "path escapes the mirror root"));
                }
            }
        }
        if !pushed {
            return Err(path_error(path, "empty path"));
        }
        Ok(resolved)
    }

    /// Write `content` to the mirror copy of `path`, creating parents.
    pub fn write(&self, path: &str, content: &str) -> Result<PathBuf> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| mirror_error(path, e))?;
        }
        std::fs::write(&target, content).map_err(|e| mirror_error(path, e))?;
        debug!("[session] Mirrored {} to {}", path, target.display());
        Ok(target)
    }
}

fn mirror_error(path: &str, source: std::io::Error) -> NotebookError {
    NotebookError::Mirror {
        path: path.to_string(),
        source,
    }
}

fn path_error(path: &str, reason: &'static str) -> NotebookError {
    NotebookError::MirrorPath {
        path: path.to_string(),
        reason,
    }
}

/// Every `*.py` file under `dir`, with `/`-separated paths relative to it,
/// in sorted order.
pub fn collect_sources(dir: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    collect_into(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn collect_into(root: &Path, dir: &Path, files: &mut Vec<SourceFile>) -> Result<()> {
    let display = dir.display().to_string();
    let entries = std::fs::read_dir(dir).map_err(|e| mirror_error(&display, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| mirror_error(&display, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| mirror_error(&display, e))?;
        if file_type.is_dir() {
            collect_into(root, &path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "py") {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| mirror_error(&path.display().to_string(), e))?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(SourceFile {
                path: relative,
                content,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_creates_parents() {
        let dir = tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path());

        let written = mirror.write("pkg/sub/main.py", "a=1").unwrap();

        assert_eq!(written, dir.path().join("pkg").join("sub").join("main.py"));
        assert_eq!(std::fs::read_to_string(written).unwrap(), "a=1");
    }

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let mirror = LocalMirror::new("/tmp/mirror");
        for path in ["../etc/passwd", "a/../../b.py", "/abs/path.py", ""] {
            assert!(
                matches!(mirror.resolve(path), Err(NotebookError::MirrorPath { .. })),
                "{path:?} should be rejected"
            );
        }
        assert_eq!(
            mirror.resolve("./a/b.py").unwrap(),
            PathBuf::from("/tmp/mirror/a/b.py")
        );
    }

    #[test]
    fn test_collect_sources_walks_python_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("main.py"), "import pkg").unwrap();
        std::fs::write(dir.path().join("pkg").join("util.py"), "x = 1").unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme").unwrap();

        let files = collect_sources(dir.path()).unwrap();

        assert_eq!(
            files,
            vec![
                SourceFile {
                    path: "main.py".into(),
                    content: "import pkg".into()
                },
                SourceFile {
                    path: "pkg/util.py".into(),
                    content: "x = 1".into()
                },
            ]
        );
    }

    #[test]
    fn test_collect_sources_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let err = collect_sources(&dir.path().join("nope")).unwrap_err();
        let NotebookError::Mirror { source, .. } = &err else {
            panic!("expected a mirror error, got {err:?}");
        };
        assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        assert!(std::error::Error::source(&err).is_some());
    }
}
