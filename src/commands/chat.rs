use crate::app_state::AppState;
use crate::models::Message;
use crate::services::conversation_service::ConversationSnapshot;
use crate::services::math_render::{self, Span};
use tauri::State;

#[tauri::command]
pub fn get_conversation(state: State<'_, AppState>) -> ConversationSnapshot {
    state.conversation.snapshot()
}

#[tauri::command]
pub async fn submit_query(state: State<'_, AppState>, text: String) -> Result<Message, String> {
    state
        .conversation
        .submit_query(&text)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn send_input(state: State<'_, AppState>) -> Result<Message, String> {
    state.send_input().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub fn render_math(text: String) -> Vec<Span<'static>> {
    math_render::render_owned(&text)
}

#[tauri::command]
pub fn render_message(state: State<'_, AppState>, message_id: String) -> Result<Vec<Span<'static>>, String> {
    let message = state
        .conversation
        .message(&message_id)
        .ok_or("Message not found")?;
    Ok(math_render::render_owned(&message.content))
}

#[tauri::command]
pub fn dismiss_banner(state: State<'_, AppState>) {
    state.conversation.dismiss_banner();
}

#[tauri::command]
pub fn dismiss_notice(state: State<'_, AppState>) {
    state.conversation.dismiss_notice();
}
