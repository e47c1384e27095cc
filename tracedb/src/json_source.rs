// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Loader for JSON traces: an array (or `{"events": [...]}`) of define
//! records and `{"event", "time", "args"}` entries.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use protocol::ArgValue;
use serde::Deserialize;

use crate::error::SourceError;
use crate::event_type::{builtin, EventClass, EventFlags, EventType};
use crate::store::EventStore;

pub const JSON_FORMAT_VERSION: u32 = 1;

/// Event id that refers to `wtf.scope#leave` without a define record.
const LEAVE_EVENT_ID: i64 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub defined_types: usize,
    pub inserted: usize,
    pub dropped: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TraceData {
    Bare(Vec<Entry>),
    Wrapped { events: Vec<Entry> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry {
    Event(EventEntry),
    Record(Record),
}

#[derive(Deserialize)]
struct EventEntry {
    event: EventRef,
    time: f64,
    #[serde(default)]
    args: Option<Vec<ArgValue>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventRef {
    Id(i64),
    Name(String),
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Record {
    #[serde(rename = "wtf.json#header")]
    Header {
        #[serde(default)]
        format_version: Option<u32>,
    },
    #[serde(rename = "wtf.event#define")]
    Define {
        signature: String,
        #[serde(default)]
        class: Option<String>,
        #[serde(default)]
        flags: u32,
        #[serde(default)]
        event_id: Option<i64>,
    },
    #[serde(other)]
    Other,
}

/// Closes an array cut off mid-write: a trailing comma or a missing `]`.
fn repair_truncated(text: &str) -> String {
    let trimmed = text.trim_end();
    if let Some(body) = trimmed.strip_suffix(',') {
        format!("{body}]")
    } else if trimmed.ends_with(']') {
        trimmed.to_string()
    } else {
        format!("{trimmed}]")
    }
}

fn parse_entries(text: &str) -> Result<Vec<Entry>, SourceError> {
    let text = text.trim_start();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let data: TraceData = if text.starts_with('{') {
        serde_json::from_str(text)?
    } else {
        serde_json::from_str(&repair_truncated(text))?
    };
    Ok(match data {
        TraceData::Bare(events) | TraceData::Wrapped { events } => events,
    })
}

struct Loader<'a> {
    store: &'a mut EventStore,
    by_event_id: HashMap<i64, Rc<EventType>>,
    batch_open: bool,
    /// False when the caller already had a batch open; that batch is left
    /// for the caller to end.
    owns_batch: bool,
    summary: LoadSummary,
}

impl Loader<'_> {
    fn begin_batch(&mut self, format_version: Option<u32>) -> Result<(), SourceError> {
        let version = format_version.filter(|&v| v != 0).unwrap_or(JSON_FORMAT_VERSION);
        if version != JSON_FORMAT_VERSION {
            return Err(SourceError::UnsupportedVersion(version));
        }
        if !self.store.is_inserting() {
            self.store.begin_inserting_events();
            self.owns_batch = true;
        }
        self.batch_open = true;
        Ok(())
    }

    fn define(&mut self, signature: &str, class: Option<&str>, flags: u32, event_id: Option<i64>) {
        let class = match class {
            Some("instance") => EventClass::Instance,
            _ => EventClass::Scope,
        };
        let defined = self
            .store
            .types_mut()
            .define_from_signature(signature, class, EventFlags::from_bits(flags));
        match defined {
            Ok(event_type) => {
                self.summary.defined_types += 1;
                if let Some(id) = event_id {
                    self.by_event_id.insert(id, event_type);
                }
            }
            Err(e) => tracing::warn!(signature, error = %e, "could not define event type"),
        }
    }

    fn resolve(&self, event: &EventRef) -> Result<Rc<EventType>, SourceError> {
        let found = match event {
            EventRef::Id(id) => self.by_event_id.get(id).cloned(),
            EventRef::Name(name) => self.store.types().get_by_name(name).cloned(),
        };
        found.ok_or_else(|| {
            SourceError::UndefinedEvent(match event {
                EventRef::Id(id) => id.to_string(),
                EventRef::Name(name) => name.clone(),
            })
        })
    }

    fn insert(&mut self, entry: EventEntry) -> Result<(), SourceError> {
        if !self.batch_open {
            self.begin_batch(None)?;
        }
        let event_type = self.resolve(&entry.event)?;
        let args = entry.args.filter(|args| !args.is_empty());
        match self.store.insert(event_type.id(), entry.time, args) {
            Ok(_) => self.summary.inserted += 1,
            // already logged by the store
            Err(_) => self.summary.dropped += 1,
        }
        Ok(())
    }

    fn load(&mut self, entries: Vec<Entry>) -> Result<(), SourceError> {
        for entry in entries {
            match entry {
                Entry::Event(event) => self.insert(event)?,
                Entry::Record(Record::Header { format_version }) => {
                    if !self.batch_open {
                        self.begin_batch(format_version)?;
                    }
                }
                Entry::Record(Record::Define {
                    signature,
                    class,
                    flags,
                    event_id,
                }) => self.define(&signature, class.as_deref(), flags, event_id),
                Entry::Record(Record::Other) => {}
            }
        }
        Ok(())
    }
}

/// Loads a JSON trace into `store` as a single insertion batch. The batch is
/// closed even when loading stops on an error, so everything inserted before
/// the failure stays queryable. If the caller already has a batch open the
/// events join it and the caller ends it.
pub fn load_json_str(store: &mut EventStore, text: &str) -> Result<LoadSummary, SourceError> {
    let entries = parse_entries(text)?;
    let mut by_event_id = HashMap::new();
    if let Some(leave) = store.types().get_by_name(builtin::SCOPE_LEAVE) {
        by_event_id.insert(LEAVE_EVENT_ID, leave.clone());
    }

    let mut loader = Loader {
        store,
        by_event_id,
        batch_open: false,
        owns_batch: false,
        summary: LoadSummary::default(),
    };
    let result = loader.load(entries);
    if loader.owns_batch {
        loader.store.end_inserting_events();
    }
    let summary = loader.summary;
    result?;
    tracing::info!(
        types = summary.defined_types,
        inserted = summary.inserted,
        dropped = summary.dropped,
        "loaded json trace"
    );
    Ok(summary)
}

pub fn load_json_file(store: &mut EventStore, path: impl AsRef<Path>) -> Result<LoadSummary, SourceError> {
    let text = std::fs::read_to_string(path)?;
    load_json_str(store, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn trace() -> serde_json::Value {
        json!([
            {"type": "wtf.json#header", "format_version": 1},
            {"type": "wtf.event#define", "signature": "app#frame(int32 n)", "class": "scope", "event_id": 1},
            {"type": "wtf.event#define", "signature": "app#click(ascii button)", "class": "instance", "flags": 0},
            {"event": 1, "time": 10.0, "args": [1]},
            {"event": "app#click", "time": 12.0, "args": ["left"]},
            {"event": -1, "time": 20.0},
        ])
    }

    #[test]
    fn test_loads_defines_and_events() {
        let mut store = EventStore::default();
        let summary = load_json_str(&mut store, &trace().to_string()).unwrap();
        assert_eq!(
            summary,
            LoadSummary {
                defined_types: 2,
                inserted: 3,
                dropped: 0
            }
        );
        assert!(!store.is_inserting());
        let frame = store.iter().next().unwrap();
        assert_eq!(frame.total_duration(), Some(10.0));
        let click = store.types().get_by_name("app#click").unwrap();
        assert_eq!(click.class(), EventClass::Instance);
    }

    #[rstest]
    #[case::wrapped(json!({"events": trace()}).to_string())]
    #[case::trailing_comma({
        let text = trace().to_string();
        format!("{},\n\n", &text[..text.len() - 1])
    })]
    #[case::missing_bracket({
        let text = trace().to_string();
        text[..text.len() - 1].to_string()
    })]
    fn test_accepted_shapes(#[case] text: String) {
        let mut store = EventStore::default();
        let summary = load_json_str(&mut store, &text).unwrap();
        assert_eq!(summary.inserted, 3);
    }

    #[test]
    fn test_empty_input() {
        let mut store = EventStore::default();
        assert_eq!(load_json_str(&mut store, "  ").unwrap(), LoadSummary::default());
    }

    #[test]
    fn test_unsupported_version() {
        let mut store = EventStore::default();
        let text = json!([{"type": "wtf.json#header", "format_version": 3}]).to_string();
        assert!(matches!(
            load_json_str(&mut store, &text),
            Err(SourceError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_undefined_event_closes_batch() {
        let mut store = EventStore::default();
        let text = json!([
            {"type": "wtf.event#define", "signature": "a#b()", "class": "instance"},
            {"event": "a#b", "time": 1.0},
            {"event": "nope#missing", "time": 2.0},
            {"event": "a#b", "time": 3.0},
        ])
        .to_string();
        let err = load_json_str(&mut store, &text).unwrap_err();
        assert!(matches!(err, SourceError::UndefinedEvent(ref name) if name == "nope#missing"));
        assert!(!store.is_inserting());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_joins_caller_batch() {
        let mut store = EventStore::default();
        let tick = store
            .types_mut()
            .define_from_signature("app#tick", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();

        store.begin_inserting_events();
        store.insert(tick, 30.0, None).unwrap();
        let summary = load_json_str(&mut store, &trace().to_string()).unwrap();
        assert_eq!(summary.inserted, 3);
        assert!(store.is_inserting());
        store.insert(tick, 5.0, None).unwrap();
        store.end_inserting_events();

        assert!(!store.is_inserting());
        let times: Vec<f64> = store.iter().map(|e| e.time()).collect();
        assert_eq!(times, vec![5.0, 10.0, 12.0, 20.0, 30.0]);
        assert_eq!(store.iter().nth(1).unwrap().total_duration(), Some(10.0));
    }

    #[test]
    fn test_argument_mismatch_is_dropped() {
        let mut store = EventStore::default();
        let text = json!([
            {"type": "wtf.event#define", "signature": "a#b(int32 x, int32 y)", "class": "instance"},
            {"event": "a#b", "time": 1.0, "args": [1]},
            {"event": "a#b", "time": 2.0, "args": [1, 2]},
        ])
        .to_string();
        let summary = load_json_str(&mut store, &text).unwrap();
        assert_eq!((summary.inserted, summary.dropped), (1, 1));
    }

    #[test]
    fn test_bad_signature_defines_placeholder() {
        let mut store = EventStore::default();
        let text = json!([
            {"type": "wtf.event#define", "signature": "broken(", "class": "instance", "event_id": 5},
            {"event": 5, "time": 1.0},
        ])
        .to_string();
        let summary = load_json_str(&mut store, &text).unwrap();
        assert_eq!(summary.inserted, 1);
        assert!(store.types().get_by_name("wtf.invalid#signature1").is_some());
    }

    #[test]
    fn test_missing_file() {
        let mut store = EventStore::default();
        let err = load_json_file(&mut store, "/nonexistent/trace.json").unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
