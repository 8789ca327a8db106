use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::session::SessionConfig;
use crate::audio::{MAX_BITRATE, MIN_BITRATE};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_bitrate: u32,
    pub disconnect_grace_ms: u64,
    pub seek_settle_ms: u64,
    pub frame_buffer: usize,

    // Binarios externos
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub user_agent: String,
    pub thumbnail_fallback: String,

    // Permisos
    pub reset_requires_manage_guild: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_bitrate: std::env::var("DEFAULT_BITRATE")
                .unwrap_or_else(|_| "64000".to_string())
                .parse()?,
            disconnect_grace_ms: std::env::var("DISCONNECT_GRACE_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            seek_settle_ms: std::env::var("SEEK_SETTLE_MS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            frame_buffer: std::env::var("FRAME_BUFFER")
                .unwrap_or_else(|_| "50".to_string()) // 1 segundo de audio
                .parse()?,

            // Binarios externos
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            user_agent: std::env::var("USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            thumbnail_fallback: std::env::var("THUMBNAIL_FALLBACK")
                .unwrap_or_else(|_| "https://http.cat/404.jpg".to_string()),

            // Permisos
            reset_requires_manage_guild: std::env::var("RESET_REQUIRES_MANAGE_GUILD")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default bitrate must be between 8kbps and 96kbps
    /// - The frame buffer must hold at least one frame
    /// - Executable paths must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if !(MIN_BITRATE..=MAX_BITRATE).contains(&self.default_bitrate) {
            anyhow::bail!(
                "Default bitrate must be between {} and {}, got: {}",
                MIN_BITRATE,
                MAX_BITRATE,
                self.default_bitrate
            );
        }

        if self.frame_buffer == 0 {
            anyhow::bail!("Frame buffer must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() || self.ffmpeg_path.trim().is_empty() {
            anyhow::bail!("yt-dlp and ffmpeg paths must not be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging, without the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {}\n  \
            Audio: {}kbps, {}ms grace, {}ms seek settle, {} frames buffered\n  \
            Binaries: {} / {}\n  \
            Reset requires Manage Guild: {}",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_bitrate / 1000,
            self.disconnect_grace_ms,
            self.seek_settle_ms,
            self.frame_buffer,
            self.ytdlp_path,
            self.ffmpeg_path,
            self.reset_requires_manage_guild
        )
    }

    /// The subset every playback session runs with.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            default_bitrate: self.default_bitrate,
            grace_window: Duration::from_millis(self.disconnect_grace_ms),
            seek_settle: Duration::from_millis(self.seek_settle_ms),
        }
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
            guild_id: None,

            // Audio defaults
            default_bitrate: 64_000,
            disconnect_grace_ms: 5_000,
            seek_settle_ms: 300,
            frame_buffer: 50,

            // Binary defaults
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            thumbnail_fallback: "https://http.cat/404.jpg".to_string(),

            reset_requires_manage_guild: true,
        }
    }
}
