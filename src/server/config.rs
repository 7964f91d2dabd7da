use super::RequestsLoggingLevel;
use crate::config::{AppConfig, DEFAULT_CORS_ALLOWED_ORIGIN};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub metrics_port: u16,
    pub frontend_dir_path: Option<String>,
    /// Origins allowed to call the API and open the progress socket
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            metrics_port: 9091,
            frontend_dir_path: None,
            cors_allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
        }
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        ServerConfig {
            requests_logging_level: config.logging_level.clone(),
            port: config.port,
            metrics_port: config.metrics_port,
            frontend_dir_path: config.frontend_dir_path.clone(),
            cors_allowed_origins: config.cors_allowed_origins.clone(),
        }
    }
}
