//! Application configuration management

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Desktop Chrome user agent; the player refuses to start for headless UAs
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Main application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub download: DownloadConfig,
    pub advanced: AdvancedConfig,
}

/// Browser and page-extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub headless: bool,
    pub chrome_executable: Option<String>,
    /// Deadline for a single page render
    pub navigation_timeout_secs: u64,
    /// Extra wait after load on title pages (lazy loading)
    pub detail_settle_ms: u64,
    /// Extra wait after load on season pages
    pub season_settle_ms: u64,
    /// Wait for the player to initialize before clicking play
    pub player_settle_ms: u64,
    /// How long to watch the network for a media request
    pub video_capture_timeout_secs: u64,
}

/// Media download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for `<title>/Season N/` folders
    pub output_directory: String,
    /// Directory receiving `downloads_<task_id>.json` records
    pub records_directory: String,
    pub connect_timeout_seconds: u64,
    /// Maximum silence between two received chunks
    pub read_timeout_seconds: u64,
    pub user_agent: String,
    /// Attempts per episode for resolution and download (1 = no retry)
    pub episode_attempts: u32,
    pub retry_base_delay_ms: u64,
}

/// Advanced configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    pub log_level: String, // "error", "warn", "info", "debug"
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            download: DownloadConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://animecix.tv".to_string(),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            headless: true,
            chrome_executable: None,
            navigation_timeout_secs: 45,
            detail_settle_ms: 2000,
            season_settle_ms: 1000,
            player_settle_ms: 2000,
            video_capture_timeout_secs: 15,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_directory: "data".to_string(),
            records_directory: ".".to_string(),
            connect_timeout_seconds: 30,
            read_timeout_seconds: 60,
            user_agent: DESKTOP_USER_AGENT.to_string(),
            episode_attempts: 1,
            retry_base_delay_ms: 2000,
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn video_capture_timeout(&self) -> Duration {
        Duration::from_secs(self.video_capture_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from file, creating default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: AppConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load from disk, fall back to defaults on any problem, then apply
    /// environment overrides
    pub fn load_or_default() -> Self {
        let mut config = match Self::load() {
            Ok(cfg) => match cfg.validate() {
                Ok(()) => cfg,
                Err(err) => {
                    tracing::warn!(
                        "Invalid configuration detected ({}), falling back to defaults",
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    "Failed to load configuration from disk: {}. Using defaults",
                    err
                );
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `ANIMECIX_*` overrides. The lookup is injected so tests do not
    /// touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("ANIMECIX_BASE_URL") {
            self.scraper.base_url = base_url;
        }
        if let Some(output_dir) = lookup("ANIMECIX_OUTPUT_DIR") {
            self.download.output_directory = output_dir;
        }
        if let Some(records_dir) = lookup("ANIMECIX_RECORDS_DIR") {
            self.download.records_directory = records_dir;
        }
        if let Some(chrome) = lookup("ANIMECIX_CHROME_PATH") {
            self.scraper.chrome_executable = Some(chrome);
        }
        if let Some(headless) = lookup("ANIMECIX_HEADLESS") {
            self.scraper.headless = !matches!(headless.as_str(), "0" | "false" | "no");
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("tv", "animecix", "downloader")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Reset configuration to defaults
    pub fn reset() -> Result<Self> {
        let config = Self::default();
        config.save()?;
        tracing::info!("Reset configuration to defaults");
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_url(&self.scraper.base_url)
            .with_context(|| format!("Invalid base_url: {}", self.scraper.base_url))?;
        if self.scraper.navigation_timeout_secs == 0 {
            bail!("navigation_timeout_secs must be greater than 0");
        }
        if self.scraper.video_capture_timeout_secs == 0 {
            bail!("video_capture_timeout_secs must be greater than 0");
        }
        if self.download.output_directory.trim().is_empty() {
            bail!("output_directory cannot be empty");
        }
        if self.download.records_directory.trim().is_empty() {
            bail!("records_directory cannot be empty");
        }
        if self.download.episode_attempts == 0 {
            bail!("episode_attempts must be at least 1");
        }
        if !["error", "warn", "info", "debug", "trace"].contains(&self.advanced.log_level.as_str())
        {
            bail!("Unknown log level: {}", self.advanced.log_level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scraper.base_url, "https://animecix.tv");
        assert_eq!(config.download.episode_attempts, 1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.scraper.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.download.episode_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.advanced.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ANIMECIX_BASE_URL", "http://127.0.0.1:9000"),
            ("ANIMECIX_OUTPUT_DIR", "/tmp/anime"),
            ("ANIMECIX_HEADLESS", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.scraper.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.download.output_directory, "/tmp/anime");
        assert!(!config.scraper.headless);
        assert!(config.scraper.chrome_executable.is_none());
    }

    #[test]
    fn test_roundtrip_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.download.output_directory, "data");
        assert_eq!(parsed.scraper.video_capture_timeout_secs, 15);
    }
}
