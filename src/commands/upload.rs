use std::path::Path;
use std::sync::Arc;
use crate::app_state::AppState;
use crate::models::{UploadFile, UploadedDocument};
use tauri::{AppHandle, Emitter, State};

#[tauri::command]
pub fn open_upload_modal(state: State<'_, AppState>) {
    state.with_view(|v| v.open_upload_modal());
}

#[tauri::command]
pub fn close_upload_modal(state: State<'_, AppState>) {
    state.with_view(|v| v.close_upload_modal());
}

#[tauri::command]
pub async fn upload_document(
    app: AppHandle,
    state: State<'_, AppState>,
    path: String,
) -> Result<UploadedDocument, String> {
    let file = UploadFile::from_path(Path::new(&path))
        .map_err(|e| format!("Failed to read file: {}", e))?;

    state
        .upload(
            file,
            Arc::new(move |percent| {
                let _ = app.emit("upload-progress", percent);
            }),
        )
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn clear_document(state: State<'_, AppState>) {
    state.conversation.clear_document();
}
