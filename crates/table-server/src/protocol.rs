//! JSON messages exchanged over the WebSocket transport.
//!
//! Framing is one JSON object per text frame, internally tagged by `type`.

use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

use crate::session::FinishReason;

/// Server -> client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the connection is accepted.
    Welcome { participant_id: ParticipantId },

    /// Sent when the participant (re)enters the waiting room.
    Waiting { position: usize },

    /// Sent to every roster member when a session begins.
    SessionStarted {
        session_id: SessionId,
        roster: Vec<ParticipantId>,
    },

    /// Free-form output from the rules engine.
    Table { text: String },

    /// Sent to surviving members when a session ends.
    SessionFinished {
        reason: FinishReason,
        description: String,
    },
}

impl ServerMessage {
    /// Builds the finish notification for `reason`.
    #[must_use]
    pub fn session_finished(reason: FinishReason) -> Self {
        ServerMessage::SessionFinished {
            reason,
            description: reason.description().to_string(),
        }
    }

    /// Message kind, used as a bounded log/metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::Waiting { .. } => "waiting",
            ServerMessage::SessionStarted { .. } => "session_started",
            ServerMessage::Table { .. } => "table",
            ServerMessage::SessionFinished { .. } => "session_finished",
        }
    }
}

/// Client -> server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Chat line; logged only.
    Chat { text: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_welcome_wire_format() {
        let msg = ServerMessage::Welcome {
            participant_id: ParticipantId(12),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "welcome", "participant_id": 12}));
    }

    #[test]
    fn test_session_finished_carries_description() {
        let msg = ServerMessage::session_finished(FinishReason::ParticipantLeft);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session_finished",
                "reason": "participant_left",
                "description": "A player has left"
            })
        );
    }

    #[test]
    fn test_client_message_parse() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"chat","text":"gg"}"#).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::Chat {
                text: "gg".to_string()
            }
        );

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"fold"}"#).is_err());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ServerMessage::Waiting { position: 1 }.kind(), "waiting");
        assert_eq!(
            ServerMessage::Table {
                text: String::new()
            }
            .kind(),
            "table"
        );
    }
}
