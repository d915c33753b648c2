//! Splitting script text into cells and joining cells back into text.
//!
//! Cells are delimited by marker lines of the form `# %%`. Recognition is
//! lenient: leading whitespace, whitespace between `#` and `%%`, and any
//! trailing text (a cell title, say) are all accepted. Serialization always
//! emits one canonical separator, so `join(split(text))` preserves cell
//! boundaries and trimmed content but is not byte-identical to `text`.

use std::sync::OnceLock;

use regex::Regex;

/// The canonical cell marker token.
pub const CELL_MARKER: &str = "# %%";

/// Separator placed between cells when joining: a blank line, the marker
/// alone, and a blank line.
pub const CELL_SEPARATOR: &str = "\n\n# %%\n\n";

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*#[ \t]*%%.*$").expect("cell marker regex is valid")
    })
}

/// Split raw text into trimmed, non-empty cell sources.
///
/// Text without markers yields a single cell holding the whole trimmed
/// text. Empty or whitespace-only text yields no cells at all.
pub fn split(text: &str) -> Vec<String> {
    marker_regex()
        .split(text)
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(String::from)
        .collect()
}

/// Join cell sources into file text with the canonical separator.
///
/// This is not the exact inverse of [`split`]: marker lines are normalized
/// and surrounding whitespace is not restored.
pub fn join<S: AsRef<str>>(cells: &[S]) -> String {
    cells
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(CELL_SEPARATOR)
}

/// Number of marker lines recognized in `text`.
pub fn count_markers(text: &str) -> usize {
    marker_regex().find_iter(text).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic_scenario() {
        assert_eq!(split("a=1\n# %%\nb=2"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_split_without_markers_yields_single_trimmed_cell() {
        assert_eq!(split("\n  x = 1\ny = 2\n\n"), vec!["x = 1\ny = 2"]);
    }

    #[test]
    fn test_split_empty_and_whitespace_text() {
        assert!(split("").is_empty());
        assert!(split("   \n\t\n").is_empty());
    }

    #[test]
    fn test_split_consecutive_markers_produce_no_empty_cell() {
        let text = "a\n# %%\n# %%\n\n# %%\nb";
        assert_eq!(split(text), vec!["a", "b"]);
    }

    #[test]
    fn test_split_accepts_marker_variants() {
        let text = "one\n   # %% setup\ntwo\n#%%\nthree\n\t#   %%[markdown]\nfour";
        assert_eq!(split(text), vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_split_leading_marker() {
        assert_eq!(
            split("# %%\nimport os\n# %%\nos.getcwd()"),
            vec!["import os", "os.getcwd()"]
        );
    }

    #[test]
    fn test_split_ignores_inline_marker_text() {
        // Only whole marker lines delimit cells.
        assert_eq!(split("x = '# %%'\nprint(x)"), vec!["x = '# %%'\nprint(x)"]);
    }

    #[test]
    fn test_split_handles_crlf() {
        assert_eq!(split("a=1\r\n# %%\r\nb=2\r\n"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_split_cell_count_bounded_by_markers() {
        let samples = [
            "a\n# %%\nb\n# %%\nc",
            "a\n# %%\n\n# %%\nc",
            "# %%\n# %%\nonly",
            "x\n  # %% title\n",
            "no markers here",
        ];
        for text in samples {
            let k = count_markers(text);
            let cells = split(text);
            assert!(!cells.is_empty(), "{text:?}");
            assert!(cells.len() <= k + 1, "{text:?}");
            assert!(cells.iter().all(|c| !c.trim().is_empty()));
            assert!(cells.iter().all(|c| c.trim() == c));
        }
    }

    #[test]
    fn test_join_uses_canonical_separator() {
        assert_eq!(join(&["a=1", "b=2"]), "a=1\n\n# %%\n\nb=2");
        assert_eq!(join::<&str>(&[]), "");
        assert_eq!(join(&["solo".to_string()]), "solo");
    }

    #[test]
    fn test_join_then_split_preserves_cells_not_bytes() {
        let original = "a=1\n   #%% first\n\nb=2\n";
        let cells = split(original);
        let rejoined = join(&cells);

        assert_ne!(rejoined, original);
        assert_eq!(split(&rejoined), cells);
    }
}
