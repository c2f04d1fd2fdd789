use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::SessionSettings;
use crate::sources::ResolverSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,

    // Sesión
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub retry_budget: u32,
    pub max_track_attempts: u32,

    // Inactividad
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,

    // Resolución
    pub resolve_timeout_secs: u64,
    pub stream_ttl_secs: u64,
    pub max_stream_bytes: u64,
    pub avoid_container: Option<String>,
    pub ytdlp_path: String,
    pub ytdlp_concurrency: usize,
    pub search_cache_size: usize,
    pub search_cache_ttl_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or(key, default)
        .trim()
        .parse()
        .with_context(|| format!("Valor inválido para {key}"))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("Falta DISCORD_TOKEN")?,

            // Sesión
            default_volume: parse_env("DEFAULT_VOLUME", "0.5")?,
            max_queue_size: parse_env("MAX_QUEUE_SIZE", "100")?,
            max_playlist_size: parse_env("MAX_PLAYLIST_SIZE", "20")?,
            retry_budget: parse_env("RETRY_BUDGET", "3")?,
            max_track_attempts: parse_env("MAX_TRACK_ATTEMPTS", "2")?,

            // Inactividad
            idle_timeout_secs: parse_env("IDLE_TIMEOUT_SECS", "300")?,
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", "30")?,

            // Resolución
            resolve_timeout_secs: parse_env("RESOLVE_TIMEOUT_SECS", "20")?,
            stream_ttl_secs: parse_env("STREAM_TTL_SECS", "18000")?, // 5 horas
            max_stream_bytes: parse_env("MAX_STREAM_BYTES", "52428800")?, // 50 MiB
            avoid_container: match env_or("AVOID_CONTAINER", "webm").trim() {
                "" | "none" => None,
                container => Some(container.to_lowercase()),
            },
            ytdlp_path: env_or("YTDLP_PATH", "yt-dlp"),
            ytdlp_concurrency: parse_env("YTDLP_CONCURRENCY", "3")?,
            search_cache_size: parse_env("SEARCH_CACHE_SIZE", "256")?,
            search_cache_ttl_secs: parse_env("SEARCH_CACHE_TTL_SECS", "3600")?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 1.0
    /// - Queue and playlist limits must be greater than 0
    /// - Every track gets at least one attempt
    /// - Timeouts and intervals must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN no puede estar vacío");
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 1.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.max_track_attempts == 0 {
            anyhow::bail!("Max track attempts must be greater than 0");
        }

        if self.idle_timeout_secs == 0 || self.sweep_interval_secs == 0 {
            anyhow::bail!("Idle timeout and sweep interval must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.search_cache_size == 0 || self.ytdlp_concurrency == 0 {
            anyhow::bail!("Search cache size and yt-dlp concurrency must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Session: {}% vol, {} queue, {} playlist, retry budget {}, {} attempts/track\n  \
            Idle: timeout {}, sweep every {}\n  \
            Resolver: timeout {}, stream ttl {}, max {} MiB, avoid {}\n  \
            yt-dlp: {} (x{}), search cache {} for {}",
            (self.default_volume * 100.0).round() as u32,
            self.max_queue_size,
            self.max_playlist_size,
            self.retry_budget,
            self.max_track_attempts,
            humantime::format_duration(self.idle_timeout()),
            humantime::format_duration(self.sweep_interval()),
            humantime::format_duration(Duration::from_secs(self.resolve_timeout_secs)),
            humantime::format_duration(Duration::from_secs(self.stream_ttl_secs)),
            self.max_stream_bytes / (1024 * 1024),
            self.avoid_container.as_deref().unwrap_or("nada"),
            self.ytdlp_path,
            self.ytdlp_concurrency,
            self.search_cache_size,
            humantime::format_duration(Duration::from_secs(self.search_cache_ttl_secs)),
        )
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_queue_size: self.max_queue_size,
            max_playlist_size: self.max_playlist_size,
            default_volume: self.default_volume,
            retry_budget: self.retry_budget,
            max_track_attempts: self.max_track_attempts,
            stream_ttl: Duration::from_secs(self.stream_ttl_secs),
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            max_stream_bytes: self.max_stream_bytes,
            avoid_container: self.avoid_container.clone(),
            timeout: Duration::from_secs(self.resolve_timeout_secs),
            search_cache_size: self.search_cache_size,
            search_cache_ttl: Duration::from_secs(self.search_cache_ttl_secs),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),

            default_volume: 0.5,
            max_queue_size: 100,
            max_playlist_size: 20,
            retry_budget: 3,
            max_track_attempts: 2,

            idle_timeout_secs: 300,
            sweep_interval_secs: 30,

            resolve_timeout_secs: 20,
            stream_ttl_secs: 5 * 60 * 60,
            max_stream_bytes: 50 * 1024 * 1024,
            avoid_container: Some("webm".to_string()),
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_concurrency: 3,
            search_cache_size: 256,
            search_cache_ttl_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            discord_token: "token".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = valid();
        config.validate().unwrap();

        let session = config.session_settings();
        let defaults = SessionSettings::default();
        assert_eq!(session.max_queue_size, defaults.max_queue_size);
        assert_eq!(session.retry_budget, defaults.retry_budget);
        assert_eq!(session.stream_ttl, defaults.stream_ttl);

        let resolver = config.resolver_settings();
        assert_eq!(resolver.avoid_container.as_deref(), Some("webm"));
        assert_eq!(resolver.timeout, ResolverSettings::default().timeout);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Config::default().validate().is_err());
        assert!(Config {
            default_volume: 1.5,
            ..valid()
        }
        .validate()
        .is_err());
        assert!(Config {
            max_track_attempts: 0,
            ..valid()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".into(),
            ..Default::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("5m"));
    }
}
