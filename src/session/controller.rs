//! Session controller.
//!
//! The single writer of session state: it owns the realtime transport, feeds
//! transport events through the [`SessionReducer`], and publishes
//! [`SessionNotification`]s. Observers only ever receive notifications and
//! read snapshots.

use crate::core::config::SessionSettings;
use crate::mcp::{McpSessionClient, ToolCallResponse};
use crate::session::handoff::AgentRoster;
use crate::session::reducer::{Reduction, SessionReducer};
use crate::session::transcript::{Transcript, TranscriptItem};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "DISCONNECTED",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Connected => "CONNECTED",
        }
    }
}

/// What a realtime transport delivers to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Event(Value),
    Disconnected { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    ConnectionChange(SessionStatus),
    TranscriptChanged,
    HistoryUpdated,
    ActiveAgentChanged(String),
}

/// The realtime voice session as seen from the controller. Audio and codec
/// negotiation stay behind this trait.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Opens a session rooted at `root_agent` and returns its signal stream.
    async fn connect(
        &mut self,
        root_agent: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<TransportSignal>, String>;

    async fn disconnect(&mut self);

    async fn send_event(&mut self, event: Value) -> Result<(), String>;

    async fn send_user_text(&mut self, text: &str) -> Result<(), String>;

    /// Stops any assistant speech in progress.
    async fn interrupt(&mut self) -> Result<(), String>;

    async fn mute(&mut self, muted: bool) -> Result<(), String>;
}

/// `turn_detection` value for `session.update`.
pub fn turn_detection(push_to_talk: bool) -> Value {
    if push_to_talk {
        Value::Null
    } else {
        json!({
            "type": "server_vad",
            "threshold": 0.9,
            "prefix_padding_ms": 300,
            "silence_duration_ms": 500,
            "create_response": true,
        })
    }
}

pub struct SessionController<T: RealtimeTransport> {
    transport: T,
    reducer: SessionReducer,
    status: SessionStatus,
    push_to_talk: bool,
    user_speaking: bool,
    muted: bool,
    signals: Option<mpsc::UnboundedReceiver<TransportSignal>>,
    notifications: broadcast::Sender<SessionNotification>,
}

impl<T: RealtimeTransport> SessionController<T> {
    pub fn new(transport: T, settings: &SessionSettings) -> Self {
        let roster = AgentRoster::new(
            settings.agents.clone(),
            settings.root_agent().map(str::to_string),
        );
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            transport,
            reducer: SessionReducer::new(roster),
            status: SessionStatus::Disconnected,
            push_to_talk: settings.push_to_talk,
            user_speaking: false,
            muted: false,
            signals: None,
            notifications,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifications.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn transcript(&self) -> &Transcript {
        self.reducer.transcript()
    }

    pub fn transcript_snapshot(&self) -> Vec<TranscriptItem> {
        self.reducer.transcript().items().to_vec()
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.reducer.active_agent()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn push_to_talk(&self) -> bool {
        self.push_to_talk
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn notify(&self, notification: SessionNotification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            info!(status = status.as_str(), "Session status changed");
            self.status = status;
            self.notify(SessionNotification::ConnectionChange(status));
        }
    }

    fn publish(&self, reduction: &Reduction) {
        if reduction.transcript_changed {
            self.notify(SessionNotification::TranscriptChanged);
        }
        if reduction.history_updated {
            self.notify(SessionNotification::HistoryUpdated);
        }
        if let Some(agent) = &reduction.active_agent {
            self.notify(SessionNotification::ActiveAgentChanged(agent.clone()));
        }
    }

    fn require_connected(&self) -> Result<(), String> {
        if self.status == SessionStatus::Connected {
            Ok(())
        } else {
            Err("Realtime session is not connected.".to_string())
        }
    }

    /// Connects with the active agent as root. A no-op unless disconnected.
    pub async fn connect(&mut self) -> Result<(), String> {
        if self.status != SessionStatus::Disconnected {
            return Ok(());
        }
        self.set_status(SessionStatus::Connecting);

        let root_agent = self.reducer.active_agent().map(str::to_string);
        match self.transport.connect(root_agent.as_deref()).await {
            Ok(signals) => self.signals = Some(signals),
            Err(err) => {
                warn!(error = %err, "Realtime connection failed");
                self.set_status(SessionStatus::Disconnected);
                return Err(err);
            }
        }
        self.set_status(SessionStatus::Connected);

        if self.reducer.note_active_agent().is_some() {
            self.notify(SessionNotification::TranscriptChanged);
        }
        self.send_session_update().await;
        if self.muted {
            if let Err(err) = self.transport.mute(true).await {
                warn!(error = %err, "Failed to sync mute state after connect");
            }
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if self.status == SessionStatus::Disconnected {
            return;
        }
        self.transport.disconnect().await;
        self.signals = None;
        self.user_speaking = false;
        self.set_status(SessionStatus::Disconnected);
    }

    /// Tears the session down and forgets its transcript.
    pub async fn reset_session(&mut self) {
        self.disconnect().await;
        self.reducer.reset();
        self.notify(SessionNotification::TranscriptChanged);
    }

    /// Makes `name` the active agent and reconnects with it as root when a
    /// session is open.
    pub async fn select_agent(&mut self, name: &str) -> Result<String, String> {
        let agent = self.reducer.select_agent(name)?;
        self.notify(SessionNotification::ActiveAgentChanged(agent.clone()));
        if self.status != SessionStatus::Disconnected {
            self.disconnect().await;
            self.connect().await?;
        }
        Ok(agent)
    }

    /// Sends typed user text, interrupting assistant speech first.
    pub async fn send_user_text(&mut self, text: &str) -> Result<(), String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("Message is empty.".to_string());
        }
        self.require_connected()?;
        self.cancel_assistant_speech().await;
        self.transport.send_user_text(text).await
    }

    pub async fn interrupt(&mut self) -> Result<(), String> {
        self.require_connected()?;
        self.transport.interrupt().await
    }

    async fn cancel_assistant_speech(&mut self) {
        if let Err(err) = self.transport.interrupt().await {
            warn!(error = %err, "Failed to interrupt assistant speech");
        }
    }

    pub async fn push_to_talk_start(&mut self) -> Result<(), String> {
        self.require_connected()?;
        self.cancel_assistant_speech().await;
        self.user_speaking = true;
        self.transport
            .send_event(json!({"type": "input_audio_buffer.clear"}))
            .await
    }

    /// Commits the buffered audio and asks for a response. Does nothing
    /// unless a push-to-talk turn is open.
    pub async fn push_to_talk_stop(&mut self) -> Result<(), String> {
        if self.status != SessionStatus::Connected || !self.user_speaking {
            return Ok(());
        }
        self.user_speaking = false;
        self.transport
            .send_event(json!({"type": "input_audio_buffer.commit"}))
            .await?;
        self.transport
            .send_event(json!({"type": "response.create"}))
            .await
    }

    pub async fn set_push_to_talk(&mut self, enabled: bool) {
        if self.push_to_talk == enabled {
            return;
        }
        self.push_to_talk = enabled;
        if self.status == SessionStatus::Connected {
            self.send_session_update().await;
        }
    }

    async fn send_session_update(&mut self) {
        let update = json!({
            "type": "session.update",
            "session": {"turn_detection": turn_detection(self.push_to_talk)},
        });
        if let Err(err) = self.transport.send_event(update).await {
            warn!(error = %err, "Failed to update session");
        }
    }

    pub async fn mute(&mut self, muted: bool) -> Result<(), String> {
        self.muted = muted;
        if self.status == SessionStatus::Connected {
            self.transport.mute(muted).await?;
        }
        Ok(())
    }

    /// Applies one transport signal.
    pub fn handle_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Event(raw) => {
                let reduction = self.reducer.apply_raw(&raw);
                self.publish(&reduction);
            }
            TransportSignal::Disconnected { reason } => {
                info!(reason = reason.as_deref().unwrap_or("-"), "Realtime transport disconnected");
                self.signals = None;
                self.user_speaking = false;
                self.set_status(SessionStatus::Disconnected);
            }
        }
    }

    /// Processes transport signals until the session ends. Returns how many
    /// events were applied.
    pub async fn pump(&mut self) -> usize {
        let Some(mut signals) = self.signals.take() else {
            return 0;
        };
        let mut applied = 0;
        loop {
            match signals.recv().await {
                Some(TransportSignal::Event(raw)) => {
                    applied += 1;
                    self.handle_signal(TransportSignal::Event(raw));
                }
                Some(signal) => {
                    self.handle_signal(signal);
                    break;
                }
                None => {
                    self.handle_signal(TransportSignal::Disconnected {
                        reason: Some("signal stream closed".to_string()),
                    });
                    break;
                }
            }
        }
        debug!(applied, "Session signal pump finished");
        applied
    }

    /// Calls an MCP tool on behalf of the agent and records the outcome as a
    /// `Tool result:` breadcrumb.
    pub async fn invoke_tool(
        &mut self,
        client: &McpSessionClient,
        name: &str,
        arguments: Value,
    ) -> ToolCallResponse {
        let response = client.call_tool(name, arguments.clone()).await;
        let mut data = json!({
            "arguments": arguments,
            "success": response.success,
        });
        if response.success {
            data["output"] = Value::String(response.extract_text());
        } else if let Some(error) = &response.error {
            data["error"] = Value::String(error.clone());
        }
        self.reducer
            .add_breadcrumb(format!("Tool result: {name}"), Some(data));
        self.notify(SessionNotification::TranscriptChanged);
        response
    }
}
