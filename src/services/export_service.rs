use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use crate::error::Result;
use crate::models::ConversationExport;

pub fn export_to_json(export: &ConversationExport) -> Result<String> {
    Ok(serde_json::to_string_pretty(export)?)
}

/// Writes the export into `dir`, named after the conversation id.
pub fn write_export(export: &ConversationExport, dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    let path = dir.join(export.file_name());
    write_export_to(export, &path)?;
    Ok(path)
}

pub fn write_export_to(export: &ConversationExport, path: &Path) -> Result<()> {
    fs::write(path, export_to_json(export)?)?;
    info!("Exported {} messages to {}", export.messages.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, UploadedDocument};
    use chrono::Utc;
    use serde_json::Value;
    use tempfile::tempdir;

    fn sample(id: Option<&str>) -> ConversationExport {
        ConversationExport {
            conversation_id: id.map(str::to_string),
            messages: vec![Message::user("What is $x$?"), Message::assistant("Four.")],
            uploaded_doc: Some(UploadedDocument {
                id: "d1".into(),
                name: "a.pdf".into(),
            }),
            exported_at: Utc::now(),
        }
    }

    #[test]
    fn json_uses_camel_case_fields() {
        let value: Value = serde_json::from_str(&export_to_json(&sample(Some("c1"))).unwrap()).unwrap();

        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["uploadedDoc"]["id"], "d1");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert!(value["messages"][0]["createdAt"].is_string());
        assert!(value["exportedAt"].is_string());
    }

    #[test]
    fn file_is_named_after_conversation() {
        let dir = tempdir().unwrap();
        let path = write_export(&sample(Some("c1")), &dir.path().join("exports")).unwrap();
        assert_eq!(path.file_name().unwrap(), "c1.json");

        let back: ConversationExport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.messages.len(), 2);

        let path = write_export(&sample(None), dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "conversation.json");
    }
}
