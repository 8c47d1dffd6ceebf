// author: kodeholic (powered by Claude)

pub mod error_code;
pub mod event;
pub mod message;
pub mod relay;
pub mod sdp;

pub use relay::{ws_handler, AppState};
