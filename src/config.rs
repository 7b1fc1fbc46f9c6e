use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed audio output parameters for the voice driver.
///
/// Replaces the free-form ffmpeg option string with a typed structure.
/// Sample rate and channel count are pinned to what Discord expects;
/// only the bitrate is genuinely tunable.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AudioSettings {
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub bitrate_kbps: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 48_000, // Discord standard
            channels: 2,
            bitrate_kbps: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio
    pub default_volume: f32,
    pub audio: AudioSettings,

    // Cola
    pub max_queue_size: usize,

    // Paths
    pub download_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            command_prefix: std::env::var("COMMAND_PREFIX")
                .unwrap_or_else(|_| "!".to_string()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            audio: AudioSettings {
                bitrate_kbps: std::env::var("AUDIO_BITRATE_KBPS")
                    .unwrap_or_else(|_| "128".to_string())
                    .parse()?,
                ..AudioSettings::default()
            },

            // Cola
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            // Paths
            download_dir: std::env::var("DOWNLOAD_DIR")
                .unwrap_or_else(|_| "./downloads".to_string())
                .into(),
        };

        std::fs::create_dir_all(&config.download_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Catches common mistakes before the bot connects: volume out of
    /// the accepted range, an empty command prefix, a zero-sized queue,
    /// or audio parameters Discord cannot play.
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        // Discord's voice format is fixed; anything else means a typo.
        if self.audio.sample_rate_hz != 48_000 {
            anyhow::bail!(
                "Sample rate must be 48000 Hz, got: {}",
                self.audio.sample_rate_hz
            );
        }

        if self.audio.channels != 2 {
            anyhow::bail!("Channel count must be 2, got: {}", self.audio.channels);
        }

        if self.audio.bitrate_kbps < 8 || self.audio.bitrate_kbps > 510 {
            anyhow::bail!(
                "Bitrate must be between 8 and 510 kbps, got: {}",
                self.audio.bitrate_kbps
            );
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token; safe to print at startup.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefix: {}\n  \
            Audio: {}Hz, {} channels, {}kbps, {}% default volume\n  \
            Queue: {} songs max\n  \
            Downloads: {}",
            self.command_prefix,
            self.audio.sample_rate_hz,
            self.audio.channels,
            self.audio.bitrate_kbps,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.download_dir.display(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            // Audio defaults
            default_volume: 1.0,
            audio: AudioSettings::default(),

            // Queue defaults
            max_queue_size: 100,

            // Path defaults
            download_dir: "./downloads".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.audio.sample_rate_hz, 48_000);
        assert_eq!(config.audio.channels, 2);
    }

    #[test]
    fn rejects_volume_out_of_range() {
        let config = Config {
            default_volume: 2.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            default_volume: -0.1,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_prefix_and_zero_queue() {
        let config = Config {
            command_prefix: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_discord_audio_format() {
        let config = Config {
            audio: AudioSettings {
                sample_rate_hz: 44_100,
                ..AudioSettings::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            audio: AudioSettings {
                bitrate_kbps: 600,
                ..AudioSettings::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
