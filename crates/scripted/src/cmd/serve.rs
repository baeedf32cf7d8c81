use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use scripted_mux::{Endpoint, MuxListener, MuxServer, ServerChannel, ServerChannelEvent};
use scripted_search::{FileNameBackend, SearchConfig, SearchKind, SearchServer, TextBackend};

use crate::cmd::ServeArgs;
use crate::exit::{io_error, mux_error, search_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

/// Channel that writes every message straight back.
pub const ECHO_CHANNEL: &str = "echo";

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = search_config(&args);
    let server = MuxServer::new();

    let mut workers = Vec::new();
    for kind in SearchKind::ALL {
        let endpoint = server.register_channel(kind.channel_name());
        let handle = match kind {
            SearchKind::Files => {
                SearchServer::new(FileNameBackend::new(&config), config.clone()).spawn(endpoint)
            }
            SearchKind::Text => {
                SearchServer::new(TextBackend::new(&config), config.clone()).spawn(endpoint)
            }
        }
        .map_err(|err| search_error("search service failed to start", err))?;
        workers.push(handle);
    }
    if !args.no_echo {
        workers.push(spawn_echo(server.register_channel(ECHO_CHANNEL))?);
    }

    let listener =
        MuxListener::bind(&args.path, server.clone()).map_err(|err| mux_error("bind failed", err))?;
    tracing::info!(path = ?listener.path(), "serving");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let served = listener.serve(&running);
    server.shutdown();
    for worker in workers {
        if worker.join().is_err() {
            tracing::warn!("service thread panicked");
        }
    }
    served.map_err(|err| mux_error("serve failed", err))?;

    Ok(SUCCESS)
}

fn search_config(args: &ServeArgs) -> SearchConfig {
    SearchConfig {
        batch_size: args.batch_size.max(1),
        default_max_results: (args.max_results > 0).then_some(args.max_results),
        max_file_size: args.max_file_size,
        include_hidden: args.include_hidden,
        workspace: args.workspace.clone(),
    }
}

fn spawn_echo(endpoint: Endpoint) -> CliResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("scripted-{ECHO_CHANNEL}"))
        .spawn(move || {
            while let Some(channel) = endpoint.accept() {
                let spawned = thread::Builder::new()
                    .name(format!("scripted-{ECHO_CHANNEL}-session"))
                    .spawn(move || echo(channel));
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "failed to start echo session");
                }
            }
        })
        .map_err(|err| io_error("echo service failed to start", err))
}

fn echo(channel: ServerChannel) {
    while let Some(ServerChannelEvent::Data(data)) = channel.next_event() {
        tracing::info!(id = channel.id(), size = data.len(), "echoing message");
        if let Err(err) = channel.write(&data) {
            tracing::debug!(id = channel.id(), error = %err, "echo peer went away");
            break;
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
