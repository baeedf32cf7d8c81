//! Filesystem search backends used by [`SearchServer`](crate::SearchServer).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

use crate::config::SearchConfig;

/// One search result, sent to clients as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl SearchHit {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: None,
            text: None,
        }
    }

    pub fn line(path: impl Into<String>, line: u64, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: Some(line),
            text: Some(text.into()),
        }
    }
}

/// One item per visited file: the hits found in it, possibly none.
///
/// Yielding for files without hits lets the driver check for client
/// requests while a walk finds nothing.
pub type Hits = Box<dyn Iterator<Item = Vec<SearchHit>> + Send>;

/// Decides what matches a query.
pub trait SearchBackend: Send + Sync {
    /// Lazily walk every candidate for `query` under `root`.
    fn search(&self, root: PathBuf, query: String) -> Hits;

    /// Whether a previously reported hit still matches `query`.
    fn matches(&self, hit: &SearchHit, query: &str) -> bool;
}

/// Matches file names against a case-insensitive glob.
///
/// A query with glob syntax (`*`, `?`, `[...]`, `{a,b}`) is compiled with
/// `globset`. Any other query, or one that fails to compile, matches names
/// containing it; the empty query matches every file.
#[derive(Debug, Clone, Default)]
pub struct FileNameBackend {
    include_hidden: bool,
}

impl FileNameBackend {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            include_hidden: config.include_hidden,
        }
    }
}

impl SearchBackend for FileNameBackend {
    fn search(&self, root: PathBuf, query: String) -> Hits {
        let pattern = NamePattern::new(&query);
        Box::new(walk(&root, self.include_hidden).map(move |entry| {
            let name = entry.file_name().to_string_lossy();
            if pattern.is_match(&name) {
                vec![SearchHit::file(entry.path().to_string_lossy())]
            } else {
                Vec::new()
            }
        }))
    }

    fn matches(&self, hit: &SearchHit, query: &str) -> bool {
        let name = Path::new(&hit.path)
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        NamePattern::new(query).is_match(&name)
    }
}

/// Reports every line containing the query, with 1-based line numbers.
#[derive(Debug, Clone)]
pub struct TextBackend {
    include_hidden: bool,
    max_file_size: u64,
}

impl TextBackend {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            include_hidden: config.include_hidden,
            max_file_size: config.max_file_size,
        }
    }
}

impl Default for TextBackend {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

impl SearchBackend for TextBackend {
    fn search(&self, root: PathBuf, query: String) -> Hits {
        if query.is_empty() {
            return Box::new(std::iter::empty());
        }
        let max_file_size = self.max_file_size;
        Box::new(walk(&root, self.include_hidden).map(move |entry| {
            let small = entry
                .metadata()
                .is_ok_and(|meta| meta.len() <= max_file_size);
            if small {
                matching_lines(entry.path(), &query)
            } else {
                Vec::new()
            }
        }))
    }

    fn matches(&self, hit: &SearchHit, query: &str) -> bool {
        !query.is_empty() && hit.text.as_deref().is_some_and(|text| text.contains(query))
    }
}

fn matching_lines(path: &Path, query: &str) -> Vec<SearchHit> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            trace!(?path, error = %err, "skipping unreadable file");
            return Vec::new();
        }
    };
    let display = path.to_string_lossy();
    contents
        .lines()
        .zip(1u64..)
        .filter(|(line, _)| line.contains(query))
        .map(|(line, number)| SearchHit::line(&*display, number, line))
        .collect()
}

/// Regular files under `root` in a stable order.
fn walk(root: &Path, include_hidden: bool) -> impl Iterator<Item = DirEntry> + Send {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| include_hidden || entry.depth() == 0 || !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// A compiled file-name query.
enum NamePattern {
    Glob(GlobMatcher),
    /// Lowercased needle.
    Contains(String),
}

impl NamePattern {
    fn new(query: &str) -> Self {
        if query.contains(['*', '?', '[', '{']) {
            let glob = GlobBuilder::new(query)
                .case_insensitive(true)
                .literal_separator(true)
                .build();
            match glob {
                Ok(glob) => return Self::Glob(glob.compile_matcher()),
                Err(err) => debug!(query, error = %err, "invalid glob; matching as text"),
            }
        }
        Self::Contains(query.to_lowercase())
    }

    fn is_match(&self, name: &str) -> bool {
        match self {
            Self::Glob(matcher) => matcher.is_match(name),
            Self::Contains(needle) => name.to_lowercase().contains(needle.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_tree(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "scripted-search-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        fs::create_dir_all(dir.join("src/nested")).unwrap();
        fs::create_dir_all(dir.join(".git")).unwrap();
        fs::write(dir.join("README.md"), "hello\nworld\n").unwrap();
        fs::write(dir.join("src/main.js"), "let x = 1;\nconsole.log(x);\n").unwrap();
        fs::write(dir.join("src/nested/util.js"), "export const y = 2;\n").unwrap();
        fs::write(dir.join(".git/config"), "console").unwrap();
        fs::write(dir.join("src/blob.bin"), [0xFFu8, 0xFE, b'x']).unwrap();
        dir
    }

    fn names(hits: Hits) -> Vec<String> {
        hits.flatten()
            .map(|hit| {
                Path::new(&hit.path)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn glob_syntax_is_supported() {
        let backend = FileNameBackend::default();
        let hit = SearchHit::file("/ws/src/main.ts");
        assert!(backend.matches(&hit, "*.{js,ts}"));
        assert!(backend.matches(&hit, "ma[a-z]n.ts"));
        assert!(backend.matches(&hit, "m?in.*"));
        assert!(!backend.matches(&hit, "*.js"));
        assert!(!backend.matches(&SearchHit::file("/ws/main.json"), "*.js"));
    }

    #[test]
    fn unparsable_glob_matches_as_text() {
        let backend = FileNameBackend::default();
        assert!(backend.matches(&SearchHit::file("/ws/a[b.txt"), "a[b"));
        assert!(!backend.matches(&SearchHit::file("/ws/ab.txt"), "a[b"));
    }

    #[test]
    fn one_item_per_visited_file() {
        let root = scratch_tree("items");
        let items: Vec<Vec<SearchHit>> = FileNameBackend::default().search(root.clone(), "util".into()).collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items.iter().filter(|hits| !hits.is_empty()).count(), 1);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn file_names_match_case_insensitively() {
        let root = scratch_tree("names");
        let backend = FileNameBackend::default();

        assert_eq!(names(backend.search(root.clone(), "*.JS".into())), vec!["main.js", "util.js"]);
        assert_eq!(names(backend.search(root.clone(), "read".into())), vec!["README.md"]);
        assert_eq!(names(backend.search(root.clone(), String::new())).len(), 4);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn hidden_entries_are_skipped_unless_enabled() {
        let root = scratch_tree("hidden");
        let hidden = FileNameBackend::new(&SearchConfig {
            include_hidden: true,
            ..SearchConfig::default()
        });

        assert!(names(FileNameBackend::default().search(root.clone(), "config".into())).is_empty());
        assert_eq!(names(hidden.search(root.clone(), "config".into())), vec!["config"]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn file_name_requery_matching() {
        let backend = FileNameBackend::default();
        let hit = SearchHit::file("/ws/src/main.js");
        assert!(backend.matches(&hit, "*.js"));
        assert!(backend.matches(&hit, "MAIN"));
        assert!(!backend.matches(&hit, "src"));
    }

    #[test]
    fn text_search_reports_lines() {
        let root = scratch_tree("text");
        let hits: Vec<SearchHit> = TextBackend::default()
            .search(root.clone(), "console".into())
            .flatten()
            .collect();

        assert_eq!(hits.len(), 1, "hidden and binary files are skipped");
        assert_eq!(hits[0].line, Some(2));
        assert_eq!(hits[0].text.as_deref(), Some("console.log(x);"));
        assert!(hits[0].path.ends_with("main.js"));

        assert_eq!(TextBackend::default().search(root.clone(), String::new()).count(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn text_search_skips_large_files() {
        let root = scratch_tree("large");
        let tiny = TextBackend::new(&SearchConfig {
            max_file_size: 8,
            ..SearchConfig::default()
        });
        assert_eq!(tiny.search(root.clone(), "world".into()).flatten().count(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn hits_serialize_without_absent_fields() {
        assert_eq!(
            serde_json::to_string(&SearchHit::file("a.js")).unwrap(),
            r#"{"path":"a.js"}"#
        );
        assert_eq!(
            serde_json::to_string(&SearchHit::line("a.js", 3, "x")).unwrap(),
            r#"{"path":"a.js","line":3,"text":"x"}"#
        );
    }
}
