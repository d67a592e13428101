use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::{Host, Url};

use crate::core::state::StoryInput;

pub const CONFIG_FILE: &str = "config.yml";
pub const TOKEN_ENV: &str = "STORY_API_TOKEN";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default = "default_library")]
    pub library_folder: String,

    #[serde(default)]
    pub unattended: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    #[default]
    Auto,
    Local,
    Remote,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub locality: Locality,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    pub api_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoryConfig {
    #[serde(default = "default_min_words")]
    pub min_words: u32,
    #[serde(default = "default_max_words")]
    pub max_words: u32,
    #[serde(default = "default_chars_per_word")]
    pub chars_per_word: f64,
    pub preset: Option<StoryInput>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            max_words: default_max_words(),
            chars_per_word: default_chars_per_word(),
            preset: None,
        }
    }
}

fn default_library() -> String {
    "library".to_string()
}
fn default_health_timeout() -> u64 {
    5
}
fn default_stream_timeout() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    120
}
fn default_min_words() -> u32 {
    50
}
fn default_max_words() -> u32 {
    1500
}
fn default_chars_per_word() -> f64 {
    5.5
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", CONFIG_FILE);
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml_ng::from_str(content).context("Failed to parse config.yml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.library_folder)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.backend.base_url)
            .with_context(|| format!("Invalid backend base_url: {}", self.backend.base_url))?;
        if self.story.min_words == 0 || self.story.min_words > self.story.max_words {
            return Err(anyhow!(
                "story.min_words must be positive and not above max_words ({} > {})",
                self.story.min_words,
                self.story.max_words
            ));
        }
        if !self.story.chars_per_word.is_finite() || self.story.chars_per_word <= 0.0 {
            return Err(anyhow!("story.chars_per_word must be a positive number"));
        }
        Ok(())
    }
}

impl BackendConfig {
    /// Resolves `Auto` by looking at the parsed URL host; explicit settings win.
    pub fn is_local(&self) -> bool {
        match self.locality {
            Locality::Local => true,
            Locality::Remote => false,
            Locality::Auto => Url::parse(&self.base_url)
                .ok()
                .and_then(|url| url.host().map(|h| h.to_owned()))
                .map(|host| match host {
                    Host::Ipv4(ip) => ip.is_loopback() || ip.is_unspecified(),
                    Host::Ipv6(ip) => ip.is_loopback() || ip.is_unspecified(),
                    Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
                })
                .unwrap_or(false),
        }
    }

    /// Env var wins over the config file so tokens need not be written to disk.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.api_token.clone())
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_seconds)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        backend: BackendConfig {
            base_url: base_url.to_string(),
            locality: Locality::Auto,
            health_timeout_seconds: default_health_timeout(),
            stream_timeout_seconds: default_stream_timeout(),
            request_timeout_seconds: default_request_timeout(),
            api_token: None,
        },
        story: StoryConfig::default(),
        library_folder: default_library(),
        unattended: true,
    }
}
