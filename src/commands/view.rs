use crate::app_state::AppState;
use crate::models::{Message, ReportedSelection};
use crate::services::view_state::ViewState;
use tauri::State;

#[tauri::command]
pub fn get_view(state: State<'_, AppState>) -> ViewState {
    state.view()
}

#[tauri::command]
pub fn set_input(state: State<'_, AppState>, text: String) {
    state.with_view(|v| v.set_input(&text));
}

/// Called by the webview on every `selectionchange`.
#[tauri::command]
pub fn update_selection(state: State<'_, AppState>, selection: ReportedSelection) -> ViewState {
    state.with_view(|v| {
        v.sync_selection(&selection);
        v.clone()
    })
}

#[tauri::command]
pub async fn ask_about_selection(state: State<'_, AppState>) -> Result<Option<Message>, String> {
    state.ask_about_selection().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub fn open_reference_popup(state: State<'_, AppState>) {
    state.with_view(|v| v.open_reference_popup());
}

#[tauri::command]
pub fn set_reference_draft(state: State<'_, AppState>, text: String) {
    state.with_view(|v| v.set_reference_draft(&text));
}

#[tauri::command]
pub fn confirm_reference(state: State<'_, AppState>) -> ViewState {
    state.with_view(|v| {
        v.confirm_reference();
        v.clone()
    })
}

#[tauri::command]
pub fn cancel_reference(state: State<'_, AppState>) {
    state.with_view(|v| v.cancel_reference());
}
