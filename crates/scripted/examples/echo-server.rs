//! Minimal echo server: accepts one connection and echoes every message on
//! the `echo` channel.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/scripted-echo-<pid>/echo.sock \
//!     --channel echo --json '{"hello":"world"}' --wait --wait-timeout 3s

use std::fs;

use scripted::mux::{MuxListener, MuxServer, ServerChannelEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("scripted-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let server = MuxServer::new();
    let endpoint = server.register_channel("echo");
    let listener = MuxListener::bind(&sock_path, server.clone())?;
    eprintln!("Listening on {}", sock_path.display());

    listener.accept()?;
    eprintln!("Client connected");

    // Echo the first channel the client opens until it closes.
    if let Some(channel) = endpoint.accept() {
        while let Some(ServerChannelEvent::Data(data)) = channel.next_event() {
            eprintln!("Received {} bytes on echo#{}", data.len(), channel.id());
            channel.write(&data)?;
        }
        eprintln!("Channel closed");
    }

    server.shutdown();
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
