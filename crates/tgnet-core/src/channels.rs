use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub type ChannelId = i64;

/// A tracked broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub username: String,
    pub subscribers_count: i64,
    pub theme: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_post_at: Option<DateTime<Utc>>,
}

/// A single ingested post. Posts are never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub channel_id: ChannelId,
    pub text: String,
    pub published_at: DateTime<Utc>,
    /// Fingerprint of attached media, when the collector computed one.
    pub media_hash: Option<String>,
}

/// A channel entry from the YAML seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeed {
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub subscribers_count: i64,
    pub theme: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

impl ChannelSeed {
    /// Canonical handle: leading `@` and any `t.me/` prefix removed, lowercased.
    #[must_use]
    pub fn handle(&self) -> String {
        let trimmed = self.username.trim();
        let trimmed = trimmed
            .strip_prefix("https://t.me/")
            .or_else(|| trimmed.strip_prefix("t.me/"))
            .unwrap_or(trimmed);
        trimmed.trim_start_matches('@').to_lowercase()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelsFile {
    pub channels: Vec<ChannelSeed>,
}

/// Load and validate the channel seed list from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_channels(path: &Path) -> Result<ChannelsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ChannelsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let channels_file: ChannelsFile =
        serde_yaml::from_str(&content).map_err(ConfigError::ChannelsFileParse)?;

    validate_channels(&channels_file)?;

    Ok(channels_file)
}

fn validate_channels(channels_file: &ChannelsFile) -> Result<(), ConfigError> {
    let mut seen_handles = HashSet::new();

    for channel in &channels_file.channels {
        if channel.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "channel name must be non-empty".to_string(),
            ));
        }

        let handle = channel.handle();
        if handle.len() < 5
            || !handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "channel '{}' has invalid username '{}'; expected 5+ chars of [a-z0-9_]",
                channel.name, channel.username
            )));
        }

        if channel.subscribers_count < 0 {
            return Err(ConfigError::Validation(format!(
                "channel '{}' has negative subscribers_count",
                channel.name
            )));
        }

        if !seen_handles.insert(handle.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate channel username: '{handle}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "channels_test.rs"]
mod tests;
