pub mod auth;
pub mod chunk;
pub mod client;
pub mod error;
pub mod magic;
pub mod retry;
pub mod telegram;
pub mod whatsapp;

pub use client::{is_safe_file_path, PlatformClient, Validator};
pub use error::{PlatformError, Result};
pub use telegram::TelegramClient;
pub use whatsapp::WhatsAppClient;
