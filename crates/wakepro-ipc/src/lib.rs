//! Wakepro IPC
//!
//! Message records exchanged with the host pipeline and the event bus that
//! carries them to the runtime.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

fn default_envelope_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One group chat message as delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub group_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Id of the agent account the host runs as.
    pub agent_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender_is_privileged: bool,
    /// Platform-level mention of the agent or an explicit wake command.
    #[serde(default)]
    pub has_explicit_address: bool,
    /// The host's command registry recognised the first word as a command.
    #[serde(default)]
    pub is_command: bool,
}

impl InboundMessage {
    pub fn new(group_id: &str, sender_id: &str, agent_id: &str, text: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            agent_id: agent_id.to_string(),
            text: text.to_string(),
            sender_is_privileged: false,
            has_explicit_address: false,
            is_command: false,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.sender_is_privileged = true;
        self
    }

    pub fn addressed(mut self) -> Self {
        self.has_explicit_address = true;
        self
    }

    pub fn command(mut self) -> Self {
        self.is_command = true;
        self
    }

    pub fn with_sender_name(mut self, name: &str) -> Self {
        self.sender_name = Some(name.to_string());
        self
    }

    pub fn display_name(&self) -> &str {
        self.sender_name.as_deref().unwrap_or(&self.sender_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    #[serde(default = "default_envelope_id")]
    pub id: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    #[serde(rename = "inbound")]
    Inbound(InboundMessage),

    /// The agent answered a user; feeds relevance candidates and the
    /// wake-extend anchor.
    #[serde(rename = "bot_reply")]
    BotReply {
        group_id: String,
        user_id: String,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Not this engine's business; the host continues as if it never ran.
    Ignore,
    /// Stop further processing of the message.
    Consume,
    /// Pass on, possibly with rewritten text and the wake flag set.
    Forward,
    /// Folded into another message's merge session.
    Absorbed,
    /// Empty mention; the host should answer with the given prompt.
    ReplyPrompt,
}

/// Serializable outcome for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disposition {
    pub action: Action,
    pub wake: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub trace_id: String,
    pub group_id: String,
    pub sender_id: String,
    pub disposition: Disposition,
}

impl Envelope {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            id: default_envelope_id(),
            kind,
        }
    }

    pub fn inbound(message: InboundMessage) -> Self {
        Self::new(MessageKind::Inbound(message))
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub const EVENT_BUS_CAPACITY: usize = 256;
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
    outbound: broadcast::Sender<Decision>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            inbound: inbound_tx,
            outbound: outbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.inbound.send(envelope)?;
        Ok(())
    }

    pub fn outbound_sender(&self) -> broadcast::Sender<Decision> {
        self.outbound.clone()
    }

    pub fn outbound_subscribe(&self) -> broadcast::Receiver<Decision> {
        self.outbound.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_line_parses_with_defaults() {
        let line = r#"{
            "kind": {"type": "inbound", "group_id": "G1", "sender_id": "u1", "agent_id": "bot", "text": "hi"}
        }"#;
        let env = Envelope::from_json(line).expect("parse");
        assert_eq!(env.schema_version, 1);
        assert!(env.trace_id.starts_with("trace-"));
        assert!(!env.id.is_empty());
        match env.kind {
            MessageKind::Inbound(msg) => {
                assert_eq!(msg.group_id, "G1");
                assert!(!msg.sender_is_privileged);
                assert!(!msg.has_explicit_address);
                assert!(!msg.is_command);
                assert_eq!(msg.display_name(), "u1");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn bot_reply_line_parses() {
        let line = r#"{"kind": {"type": "bot_reply", "group_id": "G1", "user_id": "u1", "text": "sunny today"}}"#;
        let env = Envelope::from_json(line).expect("parse");
        assert!(matches!(env.kind, MessageKind::BotReply { ref text, .. } if text == "sunny today"));
    }

    #[test]
    fn trace_id_different_for_each_envelope() {
        let a = Envelope::inbound(InboundMessage::new("G", "u", "bot", "x"));
        let b = Envelope::inbound(InboundMessage::new("G", "u", "bot", "x"));
        assert_ne!(a.trace_id, b.trace_id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn disposition_omits_empty_fields() {
        let d = Disposition {
            action: Action::Consume,
            wake: false,
            text: None,
            reason: "user_blacklisted".to_string(),
            history: Vec::new(),
        };
        let json = serde_json::to_string(&d).expect("serialize");
        assert_eq!(
            json,
            r#"{"action":"consume","wake":false,"reason":"user_blacklisted"}"#
        );
    }

    #[tokio::test]
    async fn bus_delivers_published_envelope() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Envelope::inbound(
            InboundMessage::new("G", "u", "bot", "hello").addressed(),
        ))
        .expect("publish");
        let env = rx.recv().await.expect("recv");
        assert!(matches!(env.kind, MessageKind::Inbound(ref m) if m.has_explicit_address));
    }
}
