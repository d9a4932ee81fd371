use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use super::{Message, UploadedDocument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationExport {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub uploaded_doc: Option<UploadedDocument>,
    pub exported_at: DateTime<Utc>,
}

impl ConversationExport {
    pub fn file_name(&self) -> String {
        match &self.conversation_id {
            Some(id) if !id.is_empty() => format!("{}.json", id),
            _ => "conversation.json".to_string(),
        }
    }
}
