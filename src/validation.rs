//! Validation System - Clamp, Don't Reject
//!
//! Parameter rules force lenient user input into the domain the backend
//! accepts. Image and prompt checks reject input that cannot be processed.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::ProcessingLimits;
use crate::transform::{ParamValue, Parameters};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid image dimensions: {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("Image too large: {width}x{height} (max: {max_width}x{max_height})")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Image has too many pixels: {pixels} (max: {max})")]
    TooManyPixels { pixels: u64, max: u64 },

    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    #[error("Prompt contains only whitespace")]
    WhitespacePrompt,

    #[error("Prompt too long: {length} characters (max: {max})")]
    PromptTooLong { length: usize, max: usize },

    #[error("Null bytes detected in prompt")]
    NulByte,

    #[error("Suspicious pattern detected: {0}")]
    SuspiciousPattern(String),
}

// --- Parameter Rules ---

/// A clamping rule for one transform family.
pub trait ParameterRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn applies_to(&self, transform: &str) -> bool;
    fn apply(&self, params: &mut Parameters);
}

/// Clamp a float, treating NaN as unusable.
fn clamp_f64(value: f64, min: f64, max: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(min, max))
    }
}

fn odd_kernel(value: f64) -> ParamValue {
    let mut k = value.trunc() as i64;
    if k % 2 == 0 {
        k += 1;
    }
    ParamValue::Int(k.clamp(3, 99))
}

/// Rewrite a scalar, or each element of a two-element list, in place.
fn map_scalar_or_pair<F>(params: &mut Parameters, key: &str, f: F)
where
    F: Fn(f64) -> Option<ParamValue>,
{
    let Some(value) = params.get(key) else { return };
    let rewritten = match value {
        ParamValue::List(items) if items.len() == 2 => {
            match (items[0].as_f64().and_then(&f), items[1].as_f64().and_then(&f)) {
                (Some(a), Some(b)) => Some(ParamValue::List(vec![a, b])),
                _ => None,
            }
        }
        other => other.as_f64().and_then(&f),
    };
    if let Some(v) = rewritten {
        params.insert(key.to_string(), v);
    }
}

pub struct BlurKernelRule;

impl ParameterRule for BlurKernelRule {
    fn name(&self) -> &'static str {
        "blur_kernel"
    }

    fn applies_to(&self, transform: &str) -> bool {
        matches!(transform, "Blur" | "GaussianBlur" | "MotionBlur")
    }

    fn apply(&self, params: &mut Parameters) {
        map_scalar_or_pair(params, "blur_limit", |v| Some(odd_kernel(v)));
    }
}

pub struct RotationLimitRule;

impl ParameterRule for RotationLimitRule {
    fn name(&self) -> &'static str {
        "rotation_limit"
    }

    fn applies_to(&self, transform: &str) -> bool {
        transform == "Rotate"
    }

    fn apply(&self, params: &mut Parameters) {
        map_scalar_or_pair(params, "limit", |v| {
            clamp_f64(v, -180.0, 180.0).map(ParamValue::Float)
        });
    }
}

pub struct BrightnessContrastRule;

impl ParameterRule for BrightnessContrastRule {
    fn name(&self) -> &'static str {
        "brightness_contrast"
    }

    fn applies_to(&self, transform: &str) -> bool {
        transform == "RandomBrightnessContrast"
    }

    fn apply(&self, params: &mut Parameters) {
        for key in ["brightness_limit", "contrast_limit"] {
            if let Some(v) = params.get(key).and_then(ParamValue::as_f64) {
                if let Some(clamped) = clamp_f64(v, 0.0, 1.0) {
                    params.insert(key.to_string(), ParamValue::Float(clamped));
                }
            }
        }
    }
}

pub struct NoiseVarianceRule;

impl ParameterRule for NoiseVarianceRule {
    fn name(&self) -> &'static str {
        "noise_variance"
    }

    fn applies_to(&self, transform: &str) -> bool {
        transform == "GaussNoise"
    }

    fn apply(&self, params: &mut Parameters) {
        let Some(items) = params.get("var_limit").and_then(ParamValue::as_list) else {
            return;
        };
        if items.len() != 2 {
            return;
        }
        let low = items[0].as_f64().filter(|v| !v.is_nan());
        let high = items[1].as_f64().filter(|v| !v.is_nan());
        if let (Some(low), Some(high)) = (low, high) {
            params.insert(
                "var_limit".to_string(),
                ParamValue::List(vec![
                    ParamValue::Float(low.max(0.0)),
                    ParamValue::Float(high.min(255.0)),
                ]),
            );
        }
    }
}

pub struct CropSizeRule;

impl ParameterRule for CropSizeRule {
    fn name(&self) -> &'static str {
        "crop_size"
    }

    fn applies_to(&self, transform: &str) -> bool {
        matches!(transform, "RandomCrop" | "RandomResizedCrop")
    }

    fn apply(&self, params: &mut Parameters) {
        for key in ["height", "width"] {
            if let Some(v) = params.get(key).and_then(ParamValue::as_f64) {
                if !v.is_nan() {
                    params.insert(key.to_string(), ParamValue::Int((v.trunc() as i64).max(1)));
                }
            }
        }
    }
}

pub struct ProbabilityRule;

impl ParameterRule for ProbabilityRule {
    fn name(&self) -> &'static str {
        "probability"
    }

    fn applies_to(&self, _transform: &str) -> bool {
        true
    }

    fn apply(&self, params: &mut Parameters) {
        let Some(p) = params.get("p").and_then(ParamValue::as_f64) else { return };
        match clamp_f64(p, 0.0, 1.0) {
            Some(clamped) => {
                params.insert("p".to_string(), ParamValue::Float(clamped));
            }
            None => {
                params.remove("p");
            }
        }
    }
}

/// Parameters after cleaning, plus the keys that were dropped on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedParameters {
    pub parameters: Parameters,
    pub dropped: Vec<String>,
}

/// Applies every matching rule, in order, to a transform's parameters.
pub struct ParameterValidator {
    rules: Vec<Box<dyn ParameterRule>>,
}

impl ParameterValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(BlurKernelRule),
                Box::new(RotationLimitRule),
                Box::new(BrightnessContrastRule),
                Box::new(NoiseVarianceRule),
                Box::new(CropSizeRule),
                Box::new(ProbabilityRule),
            ],
        }
    }

    /// Drop null and unaccepted parameters, then clamp what remains.
    pub fn clean(&self, transform: &str, accepted: &[&str], params: Parameters) -> CleanedParameters {
        let mut dropped = vec![];
        let mut kept = Parameters::new();

        for (key, value) in params {
            if value.is_null() || !accepted.contains(&key.as_str()) {
                dropped.push(key);
            } else {
                kept.insert(key, value);
            }
        }

        CleanedParameters {
            parameters: self.clamp(transform, kept),
            dropped,
        }
    }

    /// Clamp parameters with every rule that applies to `transform`.
    pub fn clamp(&self, transform: &str, mut params: Parameters) -> Parameters {
        for rule in self.rules.iter().filter(|r| r.applies_to(transform)) {
            tracing::trace!(rule = rule.name(), transform, "clamping parameters");
            rule.apply(&mut params);
        }
        params
    }
}

impl Default for ParameterValidator {
    fn default() -> Self {
        Self::new()
    }
}

// --- Image and Prompt Checks ---

pub fn validate_image(image: &DynamicImage, limits: &ProcessingLimits) -> Result<(), ValidationError> {
    let (width, height) = (image.width(), image.height());

    if width == 0 || height == 0 {
        return Err(ValidationError::ZeroDimension { width, height });
    }

    if width > limits.max_image_width || height > limits.max_image_height {
        return Err(ValidationError::ImageTooLarge {
            width,
            height,
            max_width: limits.max_image_width,
            max_height: limits.max_image_height,
        });
    }

    let pixels = u64::from(width) * u64::from(height);
    if pixels > limits.max_image_pixels {
        return Err(ValidationError::TooManyPixels {
            pixels,
            max: limits.max_image_pixels,
        });
    }

    Ok(())
}

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "file://",
    "../",
    "..\\",
];

/// An accepted prompt, trimmed, with any non-fatal observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptCheck {
    pub sanitized: String,
    pub word_count: usize,
    pub warnings: Vec<String>,
}

pub fn validate_prompt(prompt: &str, limits: &ProcessingLimits) -> Result<PromptCheck, ValidationError> {
    if prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }

    let length = prompt.chars().count();
    if length > limits.max_prompt_length {
        return Err(ValidationError::PromptTooLong {
            length,
            max: limits.max_prompt_length,
        });
    }

    if prompt.contains('\0') {
        return Err(ValidationError::NulByte);
    }

    let lowered = prompt.to_lowercase();
    if let Some(pattern) = SUSPICIOUS_PATTERNS.iter().find(|p| lowered.contains(*p)) {
        return Err(ValidationError::SuspiciousPattern(pattern.to_string()));
    }

    let sanitized = prompt.trim();
    if sanitized.is_empty() {
        return Err(ValidationError::WhitespacePrompt);
    }

    let mut warnings = vec![];

    let non_printable = sanitized
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        .count();
    if non_printable > 0 {
        warnings.push(format!("Contains {} non-printable characters", non_printable));
    }

    let word_count = sanitized.split_whitespace().count();
    if word_count > 100 {
        warnings.push("Very long prompt may impact parsing accuracy".to_string());
    }

    let punctuation = sanitized
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if punctuation as f64 / sanitized.chars().count() as f64 > 0.3 {
        warnings.push("High punctuation ratio may impact parsing".to_string());
    }

    Ok(PromptCheck {
        sanitized: sanitized.to_string(),
        word_count,
        warnings,
    })
}
