use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub seed_demo_items: Option<usize>,

    pub completion: Option<CompletionConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    /// Pause between two items of a run, in milliseconds
    pub item_delay_ms: Option<u64>,
    /// Capacity of each progress subscriber's queue
    pub subscriber_buffer: Option<usize>,
    /// Finished runs kept for status queries
    pub run_history_limit: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
db_dir = "/data"
port = 8080
logging_level = "headers"
cors_allowed_origins = ["http://localhost:3000", "https://todo.example.com"]
seed_demo_items = 0

[completion]
item_delay_ms = 25
run_history_limit = 10
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.logging_level.as_deref(), Some("headers"));
        assert_eq!(config.cors_allowed_origins.unwrap().len(), 2);
        assert_eq!(config.seed_demo_items, Some(0));

        let completion = config.completion.unwrap();
        assert_eq!(completion.item_delay_ms, Some(25));
        assert_eq!(completion.subscriber_buffer, None);
        assert_eq!(completion.run_history_limit, Some(10));
    }

    #[test]
    fn test_load_empty_config() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.completion.is_none());
    }

    #[test]
    fn test_load_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "port = \"not a number\"").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
