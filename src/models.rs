use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUTHOR_USER: &str = "user";
pub const AUTHOR_SYSTEM: &str = "system";

/// A durable record of one successfully ingested document.
/// Created only after its chunks are in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Knowledge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

/// Response for one chat turn. On success only `system_message` is set;
/// when the answer pipeline fails the user message is echoed back with
/// an error description and a null system message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageTurnResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<Message>,
    pub system_message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadAck {
    pub detail: String,
}
