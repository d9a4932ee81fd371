pub mod app_state;
pub mod error;
pub mod models;
pub mod services;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(feature = "desktop")]
pub use desktop::run;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Arc;

    use crate::app_state::AppState;
    use crate::commands::*;
    use crate::services::microphone::MicrophoneCapture;
    use tauri::{Emitter, Manager};

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        tauri::Builder::default()
            .plugin(tauri_plugin_dialog::init())
            .setup(|app| {
                let state = AppState::bootstrap(Arc::new(MicrophoneCapture::new()))?;
                let handle = app.handle().clone();
                state.conversation.set_change_listener(Arc::new(move || {
                    if let Err(e) = handle.emit("conversation-updated", ()) {
                        log::warn!("Failed to notify the view: {}", e);
                    }
                }));
                app.manage(state);
                Ok(())
            })
            .invoke_handler(tauri::generate_handler![
                // Config commands
                get_base_url,
                set_base_url,
                get_config,
                // Chat commands
                get_conversation,
                submit_query,
                send_input,
                render_math,
                render_message,
                dismiss_banner,
                dismiss_notice,
                // Upload commands
                open_upload_modal,
                close_upload_modal,
                upload_document,
                clear_document,
                // Voice commands
                toggle_recording,
                // View commands
                get_view,
                set_input,
                update_selection,
                ask_about_selection,
                open_reference_popup,
                set_reference_draft,
                confirm_reference,
                cancel_reference,
                // Export commands
                export_conversation,
                export_conversation_as,
                get_exports_dir_path,
            ])
            .run(tauri::generate_context!())
            .expect("error while running tauri application");
    }
}
