//! WebSocket channel pushing completion progress to browsers.

mod handler;

pub use handler::progress_ws_handler;
