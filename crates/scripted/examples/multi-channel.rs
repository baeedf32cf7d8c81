//! Two logical channels and a file-name search sharing one in-process
//! connection.
//!
//! Run with:
//!   cargo run --example multi-channel -- [ROOT] [PATTERN]

use std::time::Duration;

use scripted::mux::{ChannelEvent, ConnectionManager, MemoryDialer, MuxServer, ServerChannelEvent};
use scripted::search::{
    DoneStatus, FileNameBackend, SearchConfig, SearchKind, SearchListener, SearchServer,
    SearchSession,
};

struct Print;

impl SearchListener for Print {
    fn add(&mut self, items: Vec<serde_json::Value>) {
        for item in items {
            println!("  + {item}");
        }
    }

    fn done(&mut self, status: DoneStatus) {
        println!("  done (paused: {})", status.is_paused());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| ".".to_string());
    let pattern = args.next().unwrap_or_else(|| "*.rs".to_string());

    let server = MuxServer::new();
    for name in ["alpha", "beta"] {
        let endpoint = server.register_channel(name);
        std::thread::spawn(move || {
            while let Some(channel) = endpoint.accept() {
                while let Some(ServerChannelEvent::Data(data)) = channel.next_event() {
                    let _ = channel.write(&format!("{}: {data}", channel.name()));
                }
            }
        });
    }
    let config = SearchConfig::default();
    SearchServer::new(FileNameBackend::new(&config), config)
        .spawn(server.register_channel(SearchKind::Files.channel_name()))?;

    let manager = ConnectionManager::new(MemoryDialer::new(server.clone()));
    let alpha = manager.channel("alpha")?;
    let beta = manager.channel("beta")?;
    for channel in [&alpha, &beta] {
        if channel.next_event_timeout(Duration::from_secs(5)) == Some(ChannelEvent::Open) {
            channel.send("hello")?;
        }
    }
    for channel in [&alpha, &beta] {
        if let Some(ChannelEvent::Message(reply)) = channel.next_event_timeout(Duration::from_secs(5)) {
            println!("{}#{} <- {reply}", channel.name(), channel.id());
        }
    }

    println!("searching {root} for {pattern}");
    let mut session = SearchSession::open(&manager, SearchKind::Files, root, pattern, Print)?;
    session.run_until_done(Some(Duration::from_secs(10)))?;
    session.close();

    manager.disconnect();
    server.shutdown();
    Ok(())
}
