//! Typed adapter event bodies.

use crate::proto::types::{Capabilities, DapBreakpoint, DapSource};
use crate::proto::EventEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded adapter event. Events the runtime does not act on are kept as
/// [`Event::Unknown`] so the embedder can observe them.
#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Thread(ThreadEventBody),
    Output(OutputEventBody),
    Breakpoint(BreakpointEventBody),
    LoadedSource(LoadedSourceEventBody),
    Process(ProcessEventBody),
    Capabilities(CapabilitiesEventBody),
    Terminated(Option<TerminatedEventBody>),
    Exited(ExitedEventBody),
    Unknown { name: String, body: Value },
}

impl Event {
    pub fn parse(envelope: EventEnvelope) -> Result<Event, serde_json::Error> {
        let EventEnvelope { event, body, .. } = envelope;
        Ok(match event.as_str() {
            "initialized" => Event::Initialized,
            "stopped" => Event::Stopped(serde_json::from_value(body)?),
            "continued" => Event::Continued(serde_json::from_value(body)?),
            "thread" => Event::Thread(serde_json::from_value(body)?),
            "output" => Event::Output(serde_json::from_value(body)?),
            "breakpoint" => Event::Breakpoint(serde_json::from_value(body)?),
            "loadedSource" => Event::LoadedSource(serde_json::from_value(body)?),
            "process" => Event::Process(serde_json::from_value(body)?),
            "capabilities" => Event::Capabilities(serde_json::from_value(body)?),
            "terminated" => Event::Terminated(serde_json::from_value(body)?),
            "exited" => Event::Exited(serde_json::from_value(body)?),
            _ => Event::Unknown { name: event, body },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_focus_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_breakpoint_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    pub thread_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_threads_continued: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    pub reason: String,
    pub thread_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables_reference: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DapSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointEventBody {
    pub reason: String,
    pub breakpoint: DapBreakpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedSourceEventBody {
    pub reason: String,
    pub source: DapSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_process_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_local_process: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesEventBody {
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminatedEventBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn envelope(event: &str, body: Value) -> EventEnvelope {
        EventEnvelope {
            seq: 1,
            event: event.to_string(),
            body,
        }
    }

    #[test]
    fn test_parse_stopped() {
        let event = Event::parse(envelope(
            "stopped",
            json!({"reason": "breakpoint", "threadId": 1, "hitBreakpointIds": [17]}),
        ))
        .unwrap();
        match event {
            Event::Stopped(body) => {
                assert_eq!(body.reason, "breakpoint");
                assert_eq!(body.thread_id, Some(1));
                assert_eq!(body.hit_breakpoint_ids, Some(vec![17]));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_terminated_without_body() {
        let event = Event::parse(envelope("terminated", Value::Null)).unwrap();
        assert!(matches!(event, Event::Terminated(None)));
    }

    #[test]
    fn test_unknown_event_is_kept() {
        let event = Event::parse(envelope("progressStart", json!({"progressId": "p1"}))).unwrap();
        match event {
            Event::Unknown { name, body } => {
                assert_eq!(name, "progressStart");
                assert_eq!(body["progressId"], "p1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
