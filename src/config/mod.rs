use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::retry::MAX_BACKOFF_MULTIPLIER;

pub mod prompts;
pub mod sites;

pub use prompts::PromptTemplates;
pub use sites::{SearchConfig, SiteOverride, SiteTable};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub browser: BrowserSettings,
    pub timing: TimingConfig,
    pub retry: RetryConfig,
    pub planner: PlannerConfig,
    pub matching: MatchingConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default = "sites::default_sites")]
    pub sites: Vec<SiteOverride>,
    #[serde(default)]
    pub prompts: PromptTemplates,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub start_url: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
    pub launch_attempts: u32,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// page counts as stable once no DOM mutation happened for this long
    #[serde(with = "humantime_serde")]
    pub dom_quiet_window: Duration,
    #[serde(with = "humantime_serde")]
    pub stability_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub stability_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub action_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    pub max_iterations: u32,
    #[serde(with = "humantime_serde")]
    pub time_budget: Duration,
    pub max_replans: u32,
    pub auto_execute: bool,
    pub check_goal_after_extraction: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    pub max_edit_distance: usize,
    /// distance bound relative to the target length, the smaller bound wins
    pub edit_distance_ratio: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub api_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser: BrowserSettings {
                headless: false,
                start_url: None,
                window_width: 1280,
                window_height: 800,
                launch_attempts: 3,
                extra_args: vec![],
            },
            timing: TimingConfig {
                dom_quiet_window: Duration::from_millis(500),
                stability_timeout: Duration::from_secs(10),
                stability_poll_interval: Duration::from_millis(100),
                action_timeout: Duration::from_secs(15),
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff: Duration::from_millis(250),
                backoff_multiplier: 2.0,
                max_backoff: Duration::from_secs(4),
                jitter: Duration::from_millis(0),
            },
            planner: PlannerConfig {
                max_iterations: 25,
                time_budget: Duration::from_secs(300),
                max_replans: 1,
                auto_execute: true,
                check_goal_after_extraction: true,
            },
            matching: MatchingConfig {
                max_edit_distance: 3,
                edit_distance_ratio: 0.34,
            },
            model: ModelConfig {
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                chat_model: "gpt-4o".to_string(),
                vision_model: "gpt-4o".to_string(),
                temperature: 0.2,
                max_tokens: 1500,
                request_timeout: Duration::from_secs(60),
            },
            search: SearchConfig::default(),
            sites: sites::default_sites(),
            prompts: PromptTemplates::default(),
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        // first run writes a default file to edit
        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path)
            .map_err(|e| AgentError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_content)
            .map_err(|e| AgentError::Config(format!("Failed to parse TOML config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| AgentError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| AgentError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        if config.browser.launch_attempts == 0 {
            return Err(AgentError::Config("launch_attempts must be greater than 0".to_string()));
        }
        if config.browser.window_width < 320 || config.browser.window_height < 240 {
            return Err(AgentError::Config("window size must be at least 320x240".to_string()));
        }

        // timing
        if config.timing.dom_quiet_window >= config.timing.stability_timeout {
            return Err(AgentError::Config(
                "dom_quiet_window must be shorter than stability_timeout".to_string(),
            ));
        }
        if config.timing.stability_poll_interval.is_zero() {
            return Err(AgentError::Config("stability_poll_interval cannot be zero".to_string()));
        }

        // retry
        if config.retry.max_retries > 10 {
            return Err(AgentError::Config("max_retries cannot exceed 10".to_string()));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&config.retry.backoff_multiplier) {
            return Err(AgentError::Config(format!(
                "backoff_multiplier must be between 1.0 and {}",
                MAX_BACKOFF_MULTIPLIER
            )));
        }
        if config.retry.initial_backoff > config.retry.max_backoff {
            return Err(AgentError::Config(
                "initial_backoff cannot exceed max_backoff".to_string(),
            ));
        }

        // planner
        if config.planner.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be greater than 0".to_string()));
        }
        if config.planner.max_replans > 3 {
            return Err(AgentError::Config("max_replans cannot exceed 3".to_string()));
        }
        if config.planner.time_budget.is_zero() {
            return Err(AgentError::Config("time_budget cannot be zero".to_string()));
        }

        if !(0.0..=1.0).contains(&config.matching.edit_distance_ratio) {
            return Err(AgentError::Config(
                "edit_distance_ratio must be between 0 and 1".to_string(),
            ));
        }

        if !config.model.api_url.starts_with("http://") && !config.model.api_url.starts_with("https://") {
            return Err(AgentError::Config("model.api_url must start with http:// or https://".to_string()));
        }

        if config.search.default_search_url.trim().is_empty() {
            return Err(AgentError::Config("default_search_url cannot be empty".to_string()));
        }

        if config.sites.iter().any(|site| site.name.trim().is_empty()) {
            return Err(AgentError::Config("site override name cannot be empty".to_string()));
        }
        SiteTable::new(&config.sites)?;

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl FileConfigManager {
    /// Create a default configuration file
    async fn create_default_config(&self) -> Result<()> {
        let default_config = Config::default();
        let toml_content = toml::to_string_pretty(&default_config)
            .map_err(|e| AgentError::Config(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AgentError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(&self.config_path, toml_content)
            .map_err(|e| AgentError::Config(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("webpilot.toml");
        let manager = FileConfigManager::new(config_path.clone());

        let config = manager.load_config().await.unwrap();

        assert_eq!(config.timing.dom_quiet_window, Duration::from_millis(500));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.planner.max_replans, 1);
        assert!(!config.sites.is_empty());
        assert!(config_path.exists());
    }

    #[tokio::test]
    async fn test_human_readable_durations() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("webpilot.toml");
        let manager = FileConfigManager::new(config_path.clone());

        let mut config = Config::default();
        config.timing.dom_quiet_window = Duration::from_millis(750);
        config.planner.time_budget = Duration::from_secs(120);
        manager.save_config(&config).await.unwrap();

        let written = fs::read_to_string(&config_path).unwrap();
        assert!(written.contains("750ms"));
        assert!(written.contains("2m"));

        let reloaded = manager.load_config().await.unwrap();
        assert_eq!(reloaded.timing.dom_quiet_window, Duration::from_millis(750));
        assert_eq!(reloaded.planner.time_budget, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_config_validation() {
        let manager = FileConfigManager::new(PathBuf::from("test.toml"));

        let valid_config = Config::default();
        assert!(manager.validate_config(&valid_config).is_ok());

        let mut invalid_config = Config::default();
        invalid_config.planner.max_iterations = 0;
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.timing.dom_quiet_window = Duration::from_secs(30);
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.retry.backoff_multiplier = 0.5;
        assert!(manager.validate_config(&invalid_config).is_err());

        for multiplier in [1e30, f64::INFINITY, f64::NAN] {
            let mut invalid_config = Config::default();
            invalid_config.retry.backoff_multiplier = multiplier;
            assert!(manager.validate_config(&invalid_config).is_err(), "accepted {}", multiplier);
        }

        let mut invalid_config = Config::default();
        invalid_config.sites[0].pattern = "amazon\\.(".to_string();
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.model.api_url = "ftp://models".to_string();
        assert!(manager.validate_config(&invalid_config).is_err());
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let mut table = toml::Value::try_from(Config::default()).unwrap();
        let root = table.as_table_mut().unwrap();
        root.remove("sites");
        root.remove("prompts");
        root.remove("search");
        let text = toml::to_string(&table).unwrap();

        let config: Config = toml::from_str(&text).unwrap();
        assert_eq!(config.sites.len(), sites::default_sites().len());
        assert!(config.prompts.planner.contains("{goal}"));
        assert!(config.search.default_search_url.contains("{query}"));
    }
}
