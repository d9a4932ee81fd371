use crate::app_state::AppState;
use crate::services::export_service;
use crate::services::file_service::get_exports_dir;
use tauri::{AppHandle, State};
use tauri_plugin_dialog::DialogExt;
use tokio::sync::oneshot;

/// Writes the conversation to the exports directory and returns the path.
#[tauri::command]
pub fn export_conversation(state: State<'_, AppState>) -> Result<String, String> {
    let export = state.conversation.export();
    let dir = get_exports_dir().map_err(|e| e.to_string())?;
    let path = export_service::write_export(&export, &dir).map_err(|e| e.to_string())?;
    Ok(path.to_string_lossy().to_string())
}

/// Asks the user where to save. `None` when the dialog was cancelled.
#[tauri::command]
pub async fn export_conversation_as(
    app: AppHandle,
    state: State<'_, AppState>,
) -> Result<Option<String>, String> {
    let export = state.conversation.export();

    let (tx, rx) = oneshot::channel();
    app.dialog()
        .file()
        .set_file_name(export.file_name())
        .add_filter("JSON", &["json"])
        .save_file(move |path| {
            let _ = tx.send(path);
        });

    let Some(path) = rx.await.map_err(|e| e.to_string())? else {
        return Ok(None);
    };
    let path = path.into_path().map_err(|e| e.to_string())?;

    export_service::write_export_to(&export, &path).map_err(|e| e.to_string())?;
    Ok(Some(path.to_string_lossy().to_string()))
}

#[tauri::command]
pub fn get_exports_dir_path() -> Result<String, String> {
    get_exports_dir()
        .map(|dir| dir.to_string_lossy().to_string())
        .map_err(|e| e.to_string())
}
