//! Preset System - Named Transform Lists

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::transform::TransformSpec;
use crate::PIPELINE_VERSION;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("Preset {id} requires pipeline >= {required}, current is {current}")]
    VersionMismatch {
        id: String,
        required: String,
        current: String,
    },

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Failed to parse preset: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub use_cases: Vec<String>,
    pub transforms: Vec<TransformSpec>,
    #[serde(default = "default_min_version")]
    pub min_pipeline_version: String,
}

fn default_min_version() -> String {
    "1.0.0".to_string()
}

/// Preset registry - built-ins plus anything loaded from disk
pub struct PresetRegistry {
    presets: BTreeMap<String, Preset>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self {
            presets: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let presets = builtin_presets()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self { presets }
    }

    /// Built-ins, overridden or extended by every `*.json` preset in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, PresetError> {
        let mut registry = Self::with_builtins();
        registry.load_dir(dir)?;
        Ok(registry)
    }

    /// Add presets from `dir`. Unreadable or incompatible files are skipped
    /// with a warning. Returns how many were added.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, PresetError> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "json") {
                let preset = fs::read_to_string(&path)
                    .map_err(PresetError::from)
                    .and_then(|content| serde_json::from_str::<Preset>(&content).map_err(PresetError::from));
                match preset.and_then(|p| self.register(p)) {
                    Ok(()) => loaded += 1,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping preset file"),
                }
            }
        }
        Ok(loaded)
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.presets.contains_key(id)
    }

    /// Presets sorted by id.
    pub fn list(&self) -> Vec<&Preset> {
        self.presets.values().collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn register(&mut self, preset: Preset) -> Result<(), PresetError> {
        check_pipeline_version(&preset)?;
        self.presets.insert(preset.id.clone(), preset);
        Ok(())
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn check_pipeline_version(preset: &Preset) -> Result<(), PresetError> {
    let current = semver::Version::parse(PIPELINE_VERSION)
        .map_err(|_| PresetError::InvalidVersion(PIPELINE_VERSION.to_string()))?;
    let required = semver::Version::parse(&preset.min_pipeline_version)
        .map_err(|_| PresetError::InvalidVersion(preset.min_pipeline_version.clone()))?;

    if current < required {
        return Err(PresetError::VersionMismatch {
            id: preset.id.clone(),
            required: preset.min_pipeline_version.clone(),
            current: PIPELINE_VERSION.to_string(),
        });
    }
    Ok(())
}

fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset {
            id: "segmentation".into(),
            name: "Segmentation".into(),
            description: "Geometry-safe augmentations for segmentation training data".into(),
            use_cases: vec!["semantic segmentation".into(), "instance segmentation".into()],
            transforms: vec![
                TransformSpec::new("HorizontalFlip").with_param("p", 0.5),
                TransformSpec::new("Rotate").with_param("limit", 15).with_param("p", 0.5),
                TransformSpec::new("RandomBrightnessContrast")
                    .with_param("brightness_limit", 0.1)
                    .with_param("contrast_limit", 0.1)
                    .with_param("p", 0.3),
            ],
            min_pipeline_version: default_min_version(),
        },
        Preset {
            id: "portrait".into(),
            name: "Portrait".into(),
            description: "Gentle adjustments suited to faces and people".into(),
            use_cases: vec!["face recognition".into(), "portrait photography".into()],
            transforms: vec![
                TransformSpec::new("HorizontalFlip").with_param("p", 0.5),
                TransformSpec::new("RandomBrightnessContrast")
                    .with_param("brightness_limit", 0.15)
                    .with_param("contrast_limit", 0.15)
                    .with_param("p", 0.5),
                TransformSpec::new("GaussianBlur")
                    .with_param("blur_limit", vec![3, 5])
                    .with_param("p", 0.2),
            ],
            min_pipeline_version: default_min_version(),
        },
        Preset {
            id: "lowlight".into(),
            name: "Low Light".into(),
            description: "Simulates dim, noisy capture conditions".into(),
            use_cases: vec!["night photography".into(), "low-light robustness".into()],
            transforms: vec![
                TransformSpec::new("RandomBrightnessContrast")
                    .with_param("brightness_limit", 0.3)
                    .with_param("contrast_limit", 0.3)
                    .with_param("p", 0.8),
                TransformSpec::new("GaussNoise")
                    .with_param("var_limit", vec![10.0, 30.0])
                    .with_param("p", 0.3),
                TransformSpec::new("Blur").with_param("blur_limit", 3).with_param("p", 0.2),
            ],
            min_pipeline_version: default_min_version(),
        },
    ]
}
