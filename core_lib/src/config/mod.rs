pub mod services;
pub mod settings;

pub use services::ServicesFile;
pub use settings::{AppConfig, CheckConfig, ServerConfig};
