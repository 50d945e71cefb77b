//! Progress events emitted by a flow.
//!
//! A flow never calls back into the UI. It pushes [`FlowEvent`]s into an
//! [`EventSink`]; whoever owns the matching [`EventStream`] decides how to
//! deliver them (socket push, polling, tests draining the queue).

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::flow::{FlowState, StepState};

/// One event produced while a flow runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// Incremental transcript text, exactly as appended to the logger.
    #[serde(rename = "log")]
    Log { id: String, data: String },
    /// A task changed state.
    #[serde(rename = "step")]
    Step {
        id: String,
        task: String,
        state: StepState,
    },
    /// The flow reached a terminal success or failure.
    #[serde(rename = "state")]
    State {
        id: String,
        state: FlowState,
        data: StatePayload,
    },
}

/// Payload carried by [`FlowEvent::State`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FlowEvent {
    /// Socket message type the dashboard listens for.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Log { .. } => "org.umi.block.add-blocks-log",
            Self::Step { .. } => "org.umi.block.add-blocks-step",
            Self::State {
                state: FlowState::Success,
                ..
            } => "org.umi.block.add-blocks-success",
            Self::State { .. } => "org.umi.block.add-blocks-fail",
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Sending half handed to flows and loggers. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<FlowEvent>>,
}

impl EventSink {
    /// A sink that drops every event.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: FlowEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver just means nobody is watching any more.
            let _ = tx.send(event);
        }
    }
}

/// Receiving half owned by the UI-facing collaborator.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<FlowEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<FlowEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll.
    pub fn try_recv(&mut self) -> Option<FlowEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<FlowEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn into_stream(self) -> impl Stream<Item = FlowEvent> {
        let mut rx = self.rx;
        async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }
}

pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx: Some(tx) }, EventStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn log(data: &str) -> FlowEvent {
        FlowEvent::Log {
            id: "f1".into(),
            data: data.into(),
        }
    }

    #[test]
    fn drain_returns_events_in_order() {
        let (sink, mut events) = channel();
        sink.send(log("a"));
        sink.send(log("b"));
        assert_eq!(events.drain(), vec![log("a"), log("b")]);
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn detached_sink_drops_silently() {
        EventSink::detached().send(log("ignored"));
    }

    #[tokio::test]
    async fn stream_ends_when_all_sinks_drop() {
        let (sink, events) = channel();
        sink.send(log("only"));
        drop(sink);
        let collected: Vec<FlowEvent> = events.into_stream().collect().await;
        assert_eq!(collected, vec![log("only")]);
    }

    #[test]
    fn message_types_match_dashboard_protocol() {
        let ok = FlowEvent::State {
            id: "f1".into(),
            state: FlowState::Success,
            data: StatePayload::default(),
        };
        let failed = FlowEvent::State {
            id: "f1".into(),
            state: FlowState::Fail,
            data: StatePayload::default(),
        };
        assert_eq!(log("x").message_type(), "org.umi.block.add-blocks-log");
        assert_eq!(ok.message_type(), "org.umi.block.add-blocks-success");
        assert_eq!(failed.message_type(), "org.umi.block.add-blocks-fail");
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(FlowEvent::State {
            id: "f1".into(),
            state: FlowState::Fail,
            data: StatePayload {
                message: Some("boom".into()),
                ..Default::default()
            },
        })
        .unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["state"], "FAIL");
        assert_eq!(json["data"]["message"], "boom");
        assert!(json["data"].get("previewUrl").is_none());
    }
}
