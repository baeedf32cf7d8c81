use std::fs;
use std::time::{Duration, Instant};

use scripted_mux::{Channel, ChannelEvent, ConnectionManager, UdsDialer};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, mux_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let manager = ConnectionManager::new(UdsDialer::new(&args.path));
    let channel = manager
        .channel(&args.channel)
        .map_err(|err| mux_error("connect failed", err))?;

    let deadline = Instant::now() + wait_timeout;
    match next_event(&channel, deadline) {
        Some(ChannelEvent::Open) => {}
        Some(_) => return Err(CliError::new(FAILURE, "channel closed before opening")),
        None => return Err(CliError::new(TIMEOUT, "timed out waiting for channel to open")),
    }

    channel
        .send(&payload)
        .map_err(|err| mux_error("send failed", err))?;

    if args.wait {
        let response = wait_for_response(&channel, deadline)?;
        print_message(channel.name(), channel.id(), &response, format);
    }

    channel.close();
    manager.disconnect();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<String> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.clone());
    }
    if let Some(data) = &args.data {
        return Ok(data.clone());
    }
    if let Some(path) = &args.file {
        return fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(String::new())
}

fn next_event(channel: &Channel, deadline: Instant) -> Option<ChannelEvent> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    channel.next_event_timeout(remaining.max(Duration::from_millis(1)))
}

fn wait_for_response(channel: &Channel, deadline: Instant) -> CliResult<String> {
    loop {
        match next_event(channel, deadline) {
            Some(ChannelEvent::Message(data)) => return Ok(data),
            Some(ChannelEvent::Open) => continue,
            Some(ChannelEvent::Close) => {
                return Err(CliError::new(
                    FAILURE,
                    format!("channel {} closed without a response", channel.name()),
                ))
            }
            None => return Err(CliError::new(TIMEOUT, "timed out waiting for response")),
        }
    }
}
