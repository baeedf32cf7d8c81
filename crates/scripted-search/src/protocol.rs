//! JSON payloads carried in `msg` frames of a search channel.
//!
//! Every payload is an object whose keys name events and whose values are
//! positional argument arrays: `{"add": [a, b]}` means "call `add(a, b)`".
//!
//! ```text
//! client -> server   {"query": [root, query, options]}
//!                    {"requery": [query]}
//!                    {"more": []}
//! server -> client   {"add": [hit, ...]}
//!                    {"revoke": [hit, ...]}
//!                    {"done": [paused]}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{Result, SearchError};

/// Which search service a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    /// Incremental file-name search.
    Files,
    /// Incremental content search.
    Text,
}

impl SearchKind {
    pub const ALL: [SearchKind; 2] = [SearchKind::Files, SearchKind::Text];

    /// Name of the channel the service is registered under.
    pub const fn channel_name(self) -> &'static str {
        match self {
            Self::Files => "ifsearch",
            Self::Text => "isearch",
        }
    }

    pub fn from_channel_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.channel_name() == name)
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel_name())
    }
}

/// Options forwarded to the server with the initial query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchOptions(Map<String, Value>);

impl SearchOptions {
    pub const MAX_RESULTS: &'static str = "maxResults";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_max_results(self, max: u64) -> Self {
        self.with(Self::MAX_RESULTS, max)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `maxResults` cap, if present and a non-negative integer.
    pub fn max_results(&self) -> Option<u64> {
        self.get(Self::MAX_RESULTS).and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for SearchOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A client-to-server search request.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchRequest {
    /// Start a search. Always the first request on a channel.
    Query {
        root: String,
        query: String,
        options: SearchOptions,
    },
    /// Replace the query of the running search.
    Requery { query: String },
    /// Lift the result cap and resume a paused search.
    More,
}

impl SearchRequest {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Requery { .. } => "requery",
            Self::More => "more",
        }
    }

    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Query {
                root,
                query,
                options,
            } => json!({ "query": [root, query, options] }),
            Self::Requery { query } => json!({ "requery": [query] }),
            Self::More => json!({ "more": [] }),
        };
        value.to_string()
    }

    /// Decode a request payload. The object must hold exactly one known key.
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        let Value::Object(object) = value else {
            return Err(protocol("request is not a JSON object"));
        };
        let mut entries = object.into_iter();
        let (key, args) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(protocol("request must contain exactly one key")),
        };
        let Value::Array(args) = args else {
            return Err(protocol(format!("{key} arguments must be an array")));
        };

        match key.as_str() {
            "query" => {
                let mut args = args.into_iter();
                let root = string_arg(args.next(), "query root")?;
                let query = string_arg(args.next(), "query string")?;
                let options = match args.next() {
                    None | Some(Value::Null) => SearchOptions::default(),
                    Some(Value::Object(map)) => SearchOptions(map),
                    Some(_) => return Err(protocol("query options must be an object")),
                };
                Ok(Self::Query {
                    root,
                    query,
                    options,
                })
            }
            "requery" => Ok(Self::Requery {
                query: string_arg(args.into_iter().next(), "requery string")?,
            }),
            "more" => Ok(Self::More),
            other => Err(protocol(format!("unknown request {other:?}"))),
        }
    }
}

/// Payload of a `done` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneStatus {
    /// Stopped at the result cap; `more` resumes.
    Paused,
    /// Every match has been reported.
    Complete,
}

impl DoneStatus {
    pub fn is_paused(self) -> bool {
        self == Self::Paused
    }
}

/// A server-to-client search event.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Add(Vec<Value>),
    Revoke(Vec<Value>),
    Done(DoneStatus),
    /// Any key the protocol does not define.
    Unknown { key: String, args: Vec<Value> },
}

impl SearchEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Add(_) => "add",
            Self::Revoke(_) => "revoke",
            Self::Done(_) => "done",
            Self::Unknown { key, .. } => key,
        }
    }

    pub fn to_json(&self) -> String {
        let args = match self {
            Self::Add(items) | Self::Revoke(items) => Value::from(items.clone()),
            Self::Done(status) => json!([status.is_paused()]),
            Self::Unknown { args, .. } => Value::from(args.clone()),
        };
        let mut object = Map::new();
        object.insert(self.key().to_string(), args);
        Value::Object(object).to_string()
    }

    fn from_entry(key: String, args: Vec<Value>) -> Self {
        match key.as_str() {
            "add" => Self::Add(args),
            "revoke" => Self::Revoke(args),
            "done" => Self::Done(match args.first() {
                Some(Value::Bool(true)) => DoneStatus::Paused,
                _ => DoneStatus::Complete,
            }),
            _ => Self::Unknown { key, args },
        }
    }
}

/// Decode a server payload into its events, in key order.
///
/// An entry whose arguments are not an array is malformed; it is logged and
/// skipped while the other entries are still decoded.
pub fn decode_events(payload: &str) -> Result<Vec<SearchEvent>> {
    match serde_json::from_str(payload)? {
        Value::Object(object) => Ok(object
            .into_iter()
            .filter_map(|(key, args)| match args {
                Value::Array(args) => Some(SearchEvent::from_entry(key, args)),
                other => {
                    warn!(key = %key, args = %other, "skipping event without an argument array");
                    None
                }
            })
            .collect()),
        _ => Err(protocol("event payload is not a JSON object")),
    }
}

fn string_arg(value: Option<Value>, what: &str) -> Result<String> {
    match value {
        Some(Value::String(text)) => Ok(text),
        _ => Err(protocol(format!("{what} must be a string"))),
    }
}

fn protocol(message: impl Into<String>) -> SearchError {
    SearchError::Protocol(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_encode_to_wire_form() {
        let query = SearchRequest::Query {
            root: "/ws".into(),
            query: "*.js".into(),
            options: SearchOptions::new().with_max_results(5),
        };
        assert_eq!(query.to_json(), r#"{"query":["/ws","*.js",{"maxResults":5}]}"#);
        assert_eq!(
            SearchRequest::Requery { query: "a,b".into() }.to_json(),
            r#"{"requery":["a,b"]}"#
        );
        assert_eq!(SearchRequest::More.to_json(), r#"{"more":[]}"#);
    }

    #[test]
    fn requests_decode() {
        let decoded = SearchRequest::from_json(r#"{"query":["/ws","x",{"maxResults":3}]}"#).unwrap();
        match decoded {
            SearchRequest::Query {
                root,
                query,
                options,
            } => {
                assert_eq!(root, "/ws");
                assert_eq!(query, "x");
                assert_eq!(options.max_results(), Some(3));
            }
            other => panic!("expected query, got {other:?}"),
        }
        assert_eq!(
            SearchRequest::from_json(r#"{"query":["/ws","x"]}"#).unwrap(),
            SearchRequest::Query {
                root: "/ws".into(),
                query: "x".into(),
                options: SearchOptions::default(),
            }
        );
        assert_eq!(SearchRequest::from_json(r#"{"more":[]}"#).unwrap(), SearchRequest::More);
    }

    #[test]
    fn malformed_requests_are_rejected() {
        for payload in [
            "[]",
            "{}",
            r#"{"more":[],"requery":["x"]}"#,
            r#"{"query":[1,"x"]}"#,
            r#"{"query":["/","x",[]]}"#,
            r#"{"stop":[]}"#,
            r#"{"requery":"x"}"#,
        ] {
            assert!(
                matches!(SearchRequest::from_json(payload), Err(SearchError::Protocol(_))),
                "{payload} should be a protocol error"
            );
        }
        assert!(matches!(
            SearchRequest::from_json("{not json"),
            Err(SearchError::Json(_))
        ));
    }

    #[test]
    fn events_keep_positional_arguments() {
        let events = decode_events(r#"{"add":["x","y"]}"#).unwrap();
        assert_eq!(events, vec![SearchEvent::Add(vec![json!("x"), json!("y")])]);
    }

    #[test]
    fn events_decode_in_key_order() {
        let events = decode_events(r#"{"revoke":[1],"add":[2],"done":[true],"total":[3]}"#).unwrap();
        let keys: Vec<&str> = events.iter().map(SearchEvent::key).collect();
        assert_eq!(keys, vec!["revoke", "add", "done", "total"]);
        assert_eq!(events[2], SearchEvent::Done(DoneStatus::Paused));
        assert_eq!(
            events[3],
            SearchEvent::Unknown {
                key: "total".into(),
                args: vec![json!(3)],
            }
        );
    }

    #[test]
    fn entries_without_argument_arrays_are_skipped() {
        let events = decode_events(r#"{"add":"x","revoke":[{"path":"a"}],"done":true}"#).unwrap();
        assert_eq!(events, vec![SearchEvent::Revoke(vec![json!({"path": "a"})])]);
    }

    #[test]
    fn done_without_flag_is_complete() {
        assert_eq!(
            decode_events(r#"{"done":[]}"#).unwrap(),
            vec![SearchEvent::Done(DoneStatus::Complete)]
        );
        assert_eq!(
            decode_events(r#"{"done":[false]}"#).unwrap(),
            vec![SearchEvent::Done(DoneStatus::Complete)]
        );
    }

    #[test]
    fn events_encode_to_wire_form() {
        assert_eq!(SearchEvent::Done(DoneStatus::Paused).to_json(), r#"{"done":[true]}"#);
        assert_eq!(
            SearchEvent::Revoke(vec![json!({"path": "a"})]).to_json(),
            r#"{"revoke":[{"path":"a"}]}"#
        );
    }

    #[test]
    fn options_keep_insertion_order() {
        let options = SearchOptions::new()
            .with("caseSensitive", true)
            .with_max_results(5);

        let keys: Vec<&str> = options.as_map().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["caseSensitive", "maxResults"]);
        assert_eq!(options.as_map()["maxResults"], json!(5));
    }

    #[test]
    fn kinds_map_to_channel_names() {
        assert_eq!(SearchKind::Files.channel_name(), "ifsearch");
        assert_eq!(SearchKind::from_channel_name("isearch"), Some(SearchKind::Text));
        assert_eq!(SearchKind::from_channel_name("echo"), None);
    }
}
