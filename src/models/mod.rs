mod chat;
mod document;
mod export;
mod selection;

pub use chat::*;
pub use document::*;
pub use export::*;
pub use selection::*;
