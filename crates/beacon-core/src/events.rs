use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What happened to a watched path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Short tag for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// A debounced filesystem change. Produced by the watcher (or any other
/// mutation source), consumed immediately by the hub; never persisted.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// Unix seconds when the change was accepted.
    pub timestamp: f64,
    /// Best-effort list of changed paths, relative to the served root.
    pub paths: Vec<PathBuf>,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn now(paths: Vec<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            timestamp: unix_now(),
            paths,
            kind,
        }
    }
}

/// Seconds since the epoch as a float, the timestamp format reload frames carry.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Frames pushed to streaming subscribers, one per self-delimited SSE event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Acknowledges a successful subscription. Always the first frame.
    Connected,
    /// Tells the client to reload the page.
    Reload { timestamp: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_wire_shape() {
        let json = serde_json::to_string(&Frame::Connected).unwrap();
        assert_eq!(json, r#"{"type":"connected"}"#);
    }

    #[test]
    fn reload_frame_carries_float_timestamp() {
        let json = serde_json::to_string(&Frame::Reload { timestamp: 1700000000.25 }).unwrap();
        assert!(json.contains(r#""type":"reload""#), "got: {json}");
        assert!(json.contains("1700000000.25"), "got: {json}");
    }

    #[test]
    fn frame_roundtrip() {
        let frame = Frame::Reload { timestamp: 42.5 };
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: Frame = serde_json::from_str(&json).unwrap();
        match parsed {
            Frame::Reload { timestamp } => assert_eq!(timestamp, 42.5),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn change_event_stamps_current_time() {
        let event = ChangeEvent::now(vec![PathBuf::from("index.html")], ChangeKind::Modified);
        assert!(event.timestamp > 1_000_000_000.0);
        assert_eq!(event.kind.as_str(), "modified");
    }
}
