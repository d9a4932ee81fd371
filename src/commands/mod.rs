mod config;
mod chat;
mod upload;
mod voice;
mod view;
mod export;

pub use config::*;
pub use chat::*;
pub use upload::*;
pub use voice::*;
pub use view::*;
pub use export::*;
