use crate::app_state::AppState;
use crate::services::conversation_service::VoiceOutcome;
use tauri::State;

#[tauri::command]
pub async fn toggle_recording(state: State<'_, AppState>) -> Result<VoiceOutcome, String> {
    state
        .conversation
        .toggle_recording()
        .await
        .map_err(|e| e.to_string())
}
