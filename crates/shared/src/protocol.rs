use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AdminId, MessageId, MessageKind, RoomId, RoomKind, UserId},
    error::ApiFailure,
};

/// A chat message as the backend stores and echoes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_room_id: RoomId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub message_type: MessageKind,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// One row of the room listing. Counterpart fields depend on the room kind:
/// match rooms carry the other user, admin rooms the other staff member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_admin_id: Option<AdminId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_admin_name: Option<String>,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Signals the client sends over the live transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientSignal {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
    },
    Typing {
        room_id: RoomId,
        is_typing: bool,
    },
    MarkRead {
        room_id: RoomId,
    },
}

/// Events the server pushes over the live transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerSignal {
    NewMessage {
        room_id: RoomId,
        message: ChatMessage,
    },
    MessagesHistory {
        room_id: RoomId,
        messages: Vec<ChatMessage>,
    },
    UserTyping {
        user_id: UserId,
        room_id: RoomId,
        is_typing: bool,
    },
    UserJoined {
        user_id: UserId,
        room_id: RoomId,
    },
    UserLeft {
        user_id: UserId,
        room_id: RoomId,
    },
    /// Delivered when the recipient is not actively subscribed to the room.
    MessageNotification {
        room_id: RoomId,
        message: ChatMessage,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsResponse {
    pub success: bool,
    #[serde(default)]
    pub rooms: Vec<RoomSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRoomRequest {
    pub other_admin_id: AdminId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRoomResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn envelope_error(error: Option<String>) -> ApiFailure {
    ApiFailure::new(error.unwrap_or_else(|| "request rejected by server".to_string()))
}

impl RoomsResponse {
    pub fn into_rooms(self) -> Result<Vec<RoomSummary>, ApiFailure> {
        if self.success {
            Ok(self.rooms)
        } else {
            Err(envelope_error(self.error))
        }
    }
}

impl MessagesResponse {
    pub fn into_messages(self) -> Result<Vec<ChatMessage>, ApiFailure> {
        if self.success {
            Ok(self.messages)
        } else {
            Err(envelope_error(self.error))
        }
    }
}

impl AckResponse {
    pub fn into_result(self) -> Result<(), ApiFailure> {
        if self.success {
            Ok(())
        } else {
            Err(envelope_error(self.error))
        }
    }
}

impl AdminRoomResponse {
    pub fn into_room_id(self) -> Result<RoomId, ApiFailure> {
        match (self.success, self.room_id) {
            (true, Some(room_id)) => Ok(room_id),
            (true, None) => Err(ApiFailure::new("admin room response missing roomId")),
            (false, _) => Err(envelope_error(self.error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_signals_use_snake_case_tags_and_camel_case_fields() {
        let signal = ClientSignal::Typing {
            room_id: RoomId::from("r1"),
            is_typing: true,
        };
        let json = serde_json::to_value(&signal).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "type": "typing",
                "payload": { "roomId": "r1", "isTyping": true }
            })
        );
    }

    #[test]
    fn server_new_message_parses_backend_shape() {
        let raw = serde_json::json!({
            "type": "new_message",
            "payload": {
                "roomId": "room-9",
                "message": {
                    "id": "m-1",
                    "chatRoomId": "room-9",
                    "senderId": "u-2",
                    "receiverId": null,
                    "content": "hi",
                    "messageType": "text",
                    "isRead": false,
                    "createdAt": "2025-06-01T10:00:00Z",
                    "updatedAt": "2025-06-01T10:00:00Z"
                }
            }
        });
        let signal: ServerSignal = serde_json::from_value(raw).expect("parse");
        match signal {
            ServerSignal::NewMessage { room_id, message } => {
                assert_eq!(room_id.as_str(), "room-9");
                assert_eq!(message.content, "hi");
                assert_eq!(message.message_type, MessageKind::Text);
                assert!(message.receiver_id.is_none());
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[test]
    fn failed_envelope_surfaces_server_error() {
        let response = MessagesResponse {
            success: false,
            messages: Vec::new(),
            error: Some("room not found".to_string()),
        };
        let err = response.into_messages().expect_err("must fail");
        assert_eq!(err.message, "room not found");
    }
}
