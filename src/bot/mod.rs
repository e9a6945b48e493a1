/// Inline keyboard callbacks
pub mod callbacks;
/// Session steps shared by handlers and callbacks
pub mod flow;
/// Command, upload and text handlers
pub mod handlers;
/// Telegram file downloads
pub mod media;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// View layer for UI components (keyboards, messages)
pub mod views;

pub use callbacks::handle_callback;
pub use handlers::{get_user_id_safe, Command};
