use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only structured log written as `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `seq`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line, `seq` strictly increasing per log
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: Option<PathBuf>,
    state: Mutex<EventLogState>,
}

#[derive(Debug)]
struct EventLogState {
    session_id: String,
    next_seq: u64,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), session_id.into())
    }

    /// A log that builds events but never touches the filesystem.
    pub fn disabled() -> Self {
        Self::build(None, String::new())
    }

    fn build(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path,
                state: Mutex::new(EventLogState {
                    session_id,
                    next_seq: 1,
                }),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> String {
        self.inner
            .state
            .lock()
            .map(|state| state.session_id.clone())
            .unwrap_or_default()
    }

    /// Rebinds subsequent events to a new conversation (after a reset).
    pub fn set_session_id(&self, session_id: impl Into<String>) -> anyhow::Result<()> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        state.session_id = session_id.into();
        Ok(())
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(state.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::Number(state.next_seq.into()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        state.next_seq += 1;

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("images".to_string(), Value::Number(3.into()));
        let emitted = log.emit("estimate_requested", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("estimate_requested".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["seq"], Value::Number(1.into()));
        assert_eq!(parsed["images"], Value::Number(3.into()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn sequence_numbers_increase_across_session_rebinds() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "first");

        log.emit("one", EventPayload::new())?;
        log.set_session_id("second")?;
        log.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["session_id"], Value::String("first".to_string()));
        assert_eq!(rows[1]["session_id"], Value::String("second".to_string()));
        assert_eq!(rows[0]["seq"], Value::Number(1.into()));
        assert_eq!(rows[1]["seq"], Value::Number(2.into()));
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let log = EventLog::disabled();
        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        let emitted = log.emit("history_cleared", payload)?;
        assert_eq!(emitted["type"], Value::String("override".to_string()));
        Ok(())
    }

    #[test]
    fn disabled_log_writes_nothing() -> anyhow::Result<()> {
        let log = EventLog::disabled();
        assert!(log.path().is_none());
        let emitted = log.emit("message_sent", EventPayload::new())?;
        assert_eq!(emitted["seq"], Value::Number(1.into()));
        Ok(())
    }
}
