pub mod bot;
pub mod env_file;
pub mod error;
pub mod installation;
pub mod registry;

pub use bot::{validate_bot_id, Bot, TelegramCredentials, WhatsAppCredentials};
pub use error::{ConfigError, Result};
pub use installation::InstallationConfig;
pub use registry::BotRegistry;
