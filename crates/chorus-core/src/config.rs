//! Runtime configuration.
//!
//! Non-secret tuning lives in an optional TOML file (`CHORUS_CONFIG`,
//! default `chorus.toml`). Secrets and deployment values come from the
//! environment and win over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Where the OAuth callback is mounted; the redirect URI is
/// `CALLBACK_HOST` followed by this path.
pub const SPOTIFY_CALLBACK_PATH: &str = "/v1/spotify/auth/callback";

pub const DEFAULT_CONFIG_FILE: &str = "chorus.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://chorus.db";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// What a scrape pass does when one account fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure in the pass report and move to the next account.
    #[default]
    ContinueOnError,
    /// Stop the pass at the first failing account.
    AbortPass,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub interval_secs: u64,
    pub page_size: u32,
    pub max_pages: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            page_size: crate::providers::SPOTIFY_RECENTLY_PLAYED_LIMIT,
            max_pages: 20,
            failure_policy: FailurePolicy::ContinueOnError,
        }
    }
}

impl ScraperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub tracks_per_member: u32,
    pub max_tracks: usize,
    pub max_member_pages: usize,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            tracks_per_member: crate::playlist::TOP_TRACKS_PER_MEMBER,
            max_tracks: crate::playlist::MAX_PLAYLIST_TRACKS,
            max_member_pages: 10,
        }
    }
}

/// Shape of the optional TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen_addr: Option<String>,
    pub database_url: Option<String>,
    pub scraper: ScraperConfig,
    pub playlist: PlaylistConfig,
}

impl FileConfig {
    /// Parse the file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub discord_bot_token: String,
    pub discord_public_key: [u8; 32],
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub callback_host: String,
    pub database_url: String,
    pub listen_addr: String,
    /// Commands are declared in this guild only, when set.
    pub test_guild_id: Option<String>,
    pub scraper: ScraperConfig,
    pub playlist: PlaylistConfig,
}

impl AppConfig {
    /// Load the config file named by `CHORUS_CONFIG` and the process environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("CHORUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = FileConfig::load(&path)?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Combine file settings with variables looked up through `env`.
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            env(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} must be set", key)))
        };
        let optional = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let discord_public_key = parse_public_key(&required("DISCORD_PUBLIC_KEY")?)?;

        Ok(Self {
            discord_bot_token: required("DISCORD_BOT_TOKEN")?,
            discord_public_key,
            spotify_client_id: required("SPOTIFY_CLIENT_ID")?,
            spotify_client_secret: required("SPOTIFY_CLIENT_SECRET")?,
            callback_host: required("CALLBACK_HOST")?
                .trim_end_matches('/')
                .to_string(),
            database_url: optional("DATABASE_URL")
                .or(file.database_url)
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            listen_addr: optional("LISTEN_ADDR")
                .or(file.listen_addr)
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            test_guild_id: optional("TEST_GUILD_ID"),
            scraper: file.scraper,
            playlist: file.playlist,
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.callback_host, SPOTIFY_CALLBACK_PATH)
    }
}

fn parse_public_key(raw: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(raw.trim())
        .map_err(|e| Error::Config(format!("DISCORD_PUBLIC_KEY is not hex: {}", e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::Config(format!(
            "DISCORD_PUBLIC_KEY must be 32 bytes, got {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DISCORD_BOT_TOKEN", "bot"),
            ("DISCORD_PUBLIC_KEY", "ab"),
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
            ("CALLBACK_HOST", "https://bot.example/"),
        ]
    }

    #[test]
    fn test_missing_variable_is_named() {
        let err = AppConfig::from_sources(FileConfig::default(), env_with(&[])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_PUBLIC_KEY"));
    }

    #[test]
    fn test_public_key_must_be_32_bytes() {
        let err = AppConfig::from_sources(FileConfig::default(), env_with(&base_env())).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("32 bytes")));
    }

    #[test]
    fn test_env_overrides_file() {
        let key = "11".repeat(32);
        let mut env = base_env();
        env[1] = ("DISCORD_PUBLIC_KEY", key.as_str());
        env.push(("LISTEN_ADDR", "127.0.0.1:9000"));

        let file: FileConfig = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:1"
            database_url = "sqlite://from-file.db"

            [scraper]
            interval_secs = 5
            failure_policy = "abort_pass"
            "#,
        )
        .unwrap();

        let config = AppConfig::from_sources(file, env_with(&env)).unwrap();
        assert_eq!(config.discord_public_key, [0x11; 32]);
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.database_url, "sqlite://from-file.db");
        assert_eq!(config.scraper.interval_secs, 5);
        assert_eq!(config.scraper.page_size, 50);
        assert_eq!(config.scraper.failure_policy, FailurePolicy::AbortPass);
        assert_eq!(config.playlist.max_tracks, 100);
        assert_eq!(config.test_guild_id, None);
        assert_eq!(
            config.redirect_uri(),
            "https://bot.example/v1/spotify/auth/callback"
        );
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let file = FileConfig::load(Path::new("/nonexistent/chorus.toml")).unwrap();
        assert!(file.listen_addr.is_none());
        assert_eq!(file.scraper.interval_secs, 60);
    }
}
