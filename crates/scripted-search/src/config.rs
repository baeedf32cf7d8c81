use std::path::PathBuf;

/// Server-side search behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Hits per `add` message.
    pub batch_size: usize,
    /// Result cap applied when the client sends no `maxResults` option.
    /// `None` streams everything without pausing.
    pub default_max_results: Option<u64>,
    /// Files larger than this are skipped by content search.
    pub max_file_size: u64,
    /// Whether dot-files and dot-directories are searched.
    pub include_hidden: bool,
    /// Base directory for relative search roots.
    pub workspace: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            default_max_results: Some(100),
            max_file_size: 1024 * 1024,
            include_hidden: false,
            workspace: None,
        }
    }
}
