//! Offline realtime transport that replays a recorded JSONL event log.

use crate::session::controller::{RealtimeTransport, TransportSignal};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ReplayTransport {
    events: Vec<Value>,
    sent: Vec<Value>,
    root_agents: Vec<Option<String>>,
}

impl ReplayTransport {
    pub fn new(events: Vec<Value>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Reads one JSON event per line. Blank lines are skipped; lines that do
    /// not parse are logged and skipped.
    pub fn from_jsonl(contents: &str) -> Self {
        let events = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(index, line)| match serde_json::from_str::<Value>(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(line = index + 1, error = %err, "Skipping malformed replay line");
                    None
                }
            })
            .collect();
        Self::new(events)
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("Failed to read {}: {err}", path.display()))?;
        Ok(Self::from_jsonl(&contents))
    }

    pub fn events(&self) -> &[Value] {
        &self.events
    }

    /// Outbound events the controller sent, in order.
    pub fn sent(&self) -> &[Value] {
        &self.sent
    }

    /// Root agent requested by each connect.
    pub fn root_agents(&self) -> &[Option<String>] {
        &self.root_agents
    }
}

#[async_trait]
impl RealtimeTransport for ReplayTransport {
    async fn connect(
        &mut self,
        root_agent: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<TransportSignal>, String> {
        self.root_agents.push(root_agent.map(str::to_string));
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &self.events {
            tx.send(TransportSignal::Event(event.clone()))
                .map_err(|err| err.to_string())?;
        }
        tx.send(TransportSignal::Disconnected {
            reason: Some("replay finished".to_string()),
        })
        .map_err(|err| err.to_string())?;
        debug!(events = self.events.len(), "Replay queued");
        Ok(rx)
    }

    async fn disconnect(&mut self) {}

    async fn send_event(&mut self, event: Value) -> Result<(), String> {
        self.sent.push(event);
        Ok(())
    }

    async fn send_user_text(&mut self, text: &str) -> Result<(), String> {
        self.sent.push(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": text}],
            },
        }));
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), String> {
        self.sent.push(json!({"type": "response.cancel"}));
        Ok(())
    }

    async fn mute(&mut self, _muted: bool) -> Result<(), String> {
        Ok(())
    }
}
