//! Parse event stream for external debuggers.
//!
//! With an [`EventSink`] installed, the interpreter reports every field it
//! touches, depth-first in schema order; nested user types produce nested
//! enter/exit pairs. Offsets and sizes are relative to the stream the field
//! was read from. Values are shipped pre-rendered to JSON so sinks do not
//! hold references into the parse tree.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseEvent {
    FieldEnter {
        path: String,
        field_name: String,
        offset: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    FieldExit {
        path: String,
        field_name: String,
        offset: usize,
        size: usize,
        value: serde_json::Value,
    },
    Error {
        path: String,
        offset: usize,
        error: String,
    },
    Complete,
}

pub trait EventSink {
    fn on_event(&mut self, event: ParseEvent);
}

/// The trivial sink: collect everything.
impl EventSink for Vec<ParseEvent> {
    fn on_event(&mut self, event: ParseEvent) {
        self.push(event);
    }
}
