pub mod config;
pub mod errors;
pub mod text;

pub use config::{AppConfig, ConfigError, LlmProvider, LoadOptions};
pub use errors::{error_message, exception_message};
