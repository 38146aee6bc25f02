//! Processing limits and their sources (defaults, JSON file, environment).

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resource limits applied to prompts, images and pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingLimits {
    pub max_prompt_length: usize,
    pub max_image_width: u32,
    pub max_image_height: u32,
    pub max_image_pixels: u64,
    pub max_pipeline_length: usize,
}

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            max_prompt_length: 10_000,
            max_image_width: 8192,
            max_image_height: 8192,
            max_image_pixels: 89_478_485,
            max_pipeline_length: 32,
        }
    }
}

impl ProcessingLimits {
    /// Defaults overridden by `AUGMENT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Load from a JSON file; missing fields fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply overrides from a key lookup (the environment, in production).
    pub fn with_overrides<F>(self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            max_prompt_length: parse_override(&lookup, "AUGMENT_MAX_PROMPT_LENGTH", self.max_prompt_length)?,
            max_image_width: parse_override(&lookup, "AUGMENT_MAX_IMAGE_WIDTH", self.max_image_width)?,
            max_image_height: parse_override(&lookup, "AUGMENT_MAX_IMAGE_HEIGHT", self.max_image_height)?,
            max_image_pixels: parse_override(&lookup, "AUGMENT_MAX_IMAGE_PIXELS", self.max_image_pixels)?,
            max_pipeline_length: parse_override(
                &lookup,
                "AUGMENT_MAX_PIPELINE_LENGTH",
                self.max_pipeline_length,
            )?,
        })
    }
}

fn parse_override<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}
