//! Search sessions against a real filesystem backend.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use scripted_mux::{ConnectionManager, MemoryDialer, MuxServer};
use scripted_search::{
    DoneStatus, FileNameBackend, SearchConfig, SearchHit, SearchKind, SearchListener,
    SearchOptions, SearchServer, SearchSession, TextBackend,
};
use serde_json::Value;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

#[derive(Default)]
struct Collector {
    max_results: Option<u64>,
    hits: Vec<SearchHit>,
    revoked: Vec<SearchHit>,
}

impl Collector {
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .hits
            .iter()
            .map(|hit| hit.path.rsplit('/').next().unwrap_or_default().to_string())
            .collect();
        names.sort();
        names
    }
}

impl SearchListener for Collector {
    fn options(&self) -> SearchOptions {
        self.max_results
            .map(|max| SearchOptions::new().with_max_results(max))
            .unwrap_or_default()
    }

    fn add(&mut self, items: Vec<Value>) {
        self.hits
            .extend(items.into_iter().map(|item| serde_json::from_value(item).unwrap()));
    }

    fn revoke(&mut self, items: Vec<Value>) {
        for item in items {
            let hit: SearchHit = serde_json::from_value(item).unwrap();
            self.hits.retain(|held| *held != hit);
            self.revoked.push(hit);
        }
    }
}

fn workspace(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "scripted-search-e2e-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    fs::create_dir_all(dir.join("lib")).unwrap();
    fs::write(dir.join("app.js"), "import lib from './lib';\n").unwrap();
    fs::write(dir.join("app.css"), "body {}\n").unwrap();
    fs::write(dir.join("lib/index.js"), "export default 42;\n").unwrap();
    fs::write(dir.join("lib/helpers.js"), "// import nothing\n").unwrap();
    dir
}

fn serve(config: SearchConfig) -> (ConnectionManager, MuxServer) {
    let server = MuxServer::new();
    SearchServer::new(FileNameBackend::new(&config), config.clone())
        .spawn(server.register_channel(SearchKind::Files.channel_name()))
        .unwrap();
    SearchServer::new(TextBackend::new(&config), config)
        .spawn(server.register_channel(SearchKind::Text.channel_name()))
        .unwrap();
    let manager = ConnectionManager::new(MemoryDialer::new(server.clone()));
    (manager, server)
}

#[test]
fn file_search_pauses_resumes_and_requeries() {
    let root = workspace("files");
    let (manager, server) = serve(SearchConfig {
        batch_size: 1,
        ..SearchConfig::default()
    });

    let listener = Collector {
        max_results: Some(2),
        ..Collector::default()
    };
    let mut session = SearchSession::open(
        &manager,
        SearchKind::Files,
        root.to_string_lossy(),
        "*.js",
        listener,
    )
    .unwrap();

    assert_eq!(session.run_until_done(WAIT).unwrap(), DoneStatus::Paused);
    assert_eq!(session.listener().hits.len(), 2);

    session.more().unwrap();
    assert_eq!(session.run_until_done(WAIT).unwrap(), DoneStatus::Complete);
    assert_eq!(session.listener().names(), vec!["app.js", "helpers.js", "index.js"]);

    session.query("app").unwrap();
    assert_eq!(session.run_until_done(WAIT).unwrap(), DoneStatus::Complete);
    let collector = session.listener();
    assert_eq!(collector.names(), vec!["app.css", "app.js"]);
    assert_eq!(collector.revoked.len(), 2);

    session.close();
    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn text_search_reports_matching_lines() {
    let root = workspace("text");
    let (manager, server) = serve(SearchConfig::default());

    let mut session = SearchSession::open(
        &manager,
        SearchKind::Text,
        root.to_string_lossy(),
        "import",
        Collector::default(),
    )
    .unwrap();

    assert_eq!(session.run_until_done(WAIT).unwrap(), DoneStatus::Complete);
    let mut lines: Vec<(String, Option<u64>)> = session
        .into_listener()
        .hits
        .into_iter()
        .map(|hit| (hit.path.rsplit('/').next().unwrap().to_string(), hit.line))
        .collect();
    lines.sort();
    assert_eq!(
        lines,
        vec![
            ("app.js".to_string(), Some(1)),
            ("helpers.js".to_string(), Some(1)),
        ]
    );

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn queries_issued_before_open_are_answered_in_order() {
    let root = workspace("queued");
    let (manager, server) = serve(SearchConfig::default());

    let mut session = SearchSession::open(
        &manager,
        SearchKind::Files,
        root.to_string_lossy(),
        "*.css",
        Collector::default(),
    )
    .unwrap();
    session.query("index").unwrap();

    // The server may or may not finish the initial query before it reads
    // the requery; either way the requery has the last word.
    for _ in 0..2 {
        assert_eq!(session.run_until_done(WAIT).unwrap(), DoneStatus::Complete);
        if session.listener().names() == vec!["index.js"] {
            break;
        }
    }
    assert_eq!(session.listener().names(), vec!["index.js"]);
    assert!(session.listener().hits.iter().all(|hit| !hit.path.ends_with(".css")));

    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn search_over_unix_socket() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use scripted_mux::{MuxListener, UdsDialer};

    let root = workspace("uds");
    let config = SearchConfig::default();
    let server = MuxServer::new();
    SearchServer::new(FileNameBackend::new(&config), config)
        .spawn(server.register_channel(SearchKind::Files.channel_name()))
        .unwrap();
    let sock_path = root.join("search.sock");
    let listener = MuxListener::bind(&sock_path, server.clone()).unwrap();
    let running = Arc::new(AtomicBool::new(true));
    let serving = {
        let running = Arc::clone(&running);
        std::thread::spawn(move || listener.serve(&running))
    };

    let manager = ConnectionManager::new(UdsDialer::new(&sock_path));
    let mut session = SearchSession::open(
        &manager,
        SearchKind::Files,
        root.to_string_lossy(),
        "index",
        Collector::default(),
    )
    .unwrap();
    assert_eq!(session.run_until_done(WAIT).unwrap(), DoneStatus::Complete);
    assert_eq!(session.listener().names(), vec!["index.js"]);

    drop(session);
    drop(manager);
    running.store(false, Ordering::SeqCst);
    serving.join().unwrap().unwrap();
    server.shutdown();
    let _ = fs::remove_dir_all(&root);
}
