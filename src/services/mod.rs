pub mod api_client;
pub mod config_service;
pub mod conversation_service;
pub mod export_service;
pub mod file_service;
pub mod math_render;
pub mod view_state;
pub mod voice_service;

#[cfg(feature = "desktop")]
pub mod microphone;
