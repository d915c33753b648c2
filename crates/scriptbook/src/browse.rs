//! Helpers for walking the server's directory tree.

use crate::protocol::DirEntry;

/// Extension of files that can be opened as notebooks.
pub const OPENABLE_EXTENSION: &str = ".py";

/// Parent of a `/`-separated workspace path; `""` is the root.
pub fn parent_path(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub fn is_openable(path: &str) -> bool {
    path.ends_with(OPENABLE_EXTENSION)
}

/// Name shown in a listing; directories get a trailing `/`.
pub fn display_name(entry: &DirEntry) -> String {
    if entry.is_dir {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}

/// Tab label for an open document.
pub fn tab_title(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("a/b/c"), "a/b");
        assert_eq!(parent_path("a/b/"), "a");
        assert_eq!(parent_path("a"), "");
        assert_eq!(parent_path(""), "");
    }

    #[test]
    fn test_is_openable() {
        assert!(is_openable("nb/main.py"));
        assert!(!is_openable("nb/data.csv"));
        assert!(!is_openable("nb/"));
    }

    #[test]
    fn test_display_name_marks_directories() {
        let dir = DirEntry {
            name: "src".into(),
            path: "proj/src".into(),
            is_dir: true,
        };
        let file = DirEntry {
            name: "main.py".into(),
            path: "proj/main.py".into(),
            is_dir: false,
        };
        assert_eq!(display_name(&dir), "src/");
        assert_eq!(display_name(&file), "main.py");
    }

    #[test]
    fn test_tab_title() {
        assert_eq!(tab_title("proj/nb/main.py"), "main.py");
        assert_eq!(tab_title("main.py"), "main.py");
    }
}
