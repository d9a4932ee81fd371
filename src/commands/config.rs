use crate::services::config_service;

#[tauri::command]
pub fn get_base_url() -> Result<Option<String>, String> {
    config_service::get_base_url().map_err(|e| e.to_string())
}

/// Takes effect on the next launch.
#[tauri::command]
pub fn set_base_url(url: String) -> Result<(), String> {
    config_service::set_base_url(&url).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_config() -> Result<config_service::Config, String> {
    config_service::load_config().map_err(|e| e.to_string())
}
