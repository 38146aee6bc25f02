//! Prompt Parsing Boundary
//!
//! Natural-language matching lives behind `PromptParser`. The bundled
//! `PresetParser` only recognizes prompts that name a preset.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::presets::PresetRegistry;
use crate::transform::TransformSpec;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub transforms: Vec<TransformSpec>,
    /// In [0, 1]
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

pub trait PromptParser: Send + Sync {
    fn parse(&self, prompt: &str) -> Result<ParseResult, ParseError>;
}

/// Words that may surround a preset name without changing its meaning.
const FILLER: &[&str] = &["apply", "use", "the", "a", "an", "preset", "presets", "please", "with"];

pub struct PresetParser {
    presets: Arc<PresetRegistry>,
}

impl PresetParser {
    pub fn new(presets: Arc<PresetRegistry>) -> Self {
        Self { presets }
    }

    fn find_preset(&self, prompt: &str) -> Option<&str> {
        let lowered = prompt.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !FILLER.contains(w))
            .collect();

        let joined = words.concat();
        std::iter::once(joined.as_str())
            .chain(words.iter().copied())
            .find_map(|candidate| self.presets.get(candidate).map(|p| p.id.as_str()))
    }
}

impl PromptParser for PresetParser {
    fn parse(&self, prompt: &str) -> Result<ParseResult, ParseError> {
        if prompt.trim().is_empty() {
            return Err(ParseError::EmptyPrompt);
        }

        match self.find_preset(prompt).and_then(|id| self.presets.get(id)) {
            Some(preset) => {
                tracing::debug!(preset = %preset.id, "prompt resolved to preset");
                Ok(ParseResult {
                    transforms: preset.transforms.clone(),
                    confidence: 1.0,
                    warnings: vec![],
                    suggestions: vec![],
                })
            }
            None => Ok(ParseResult {
                transforms: vec![],
                confidence: 0.0,
                warnings: vec![format!("No recognizable preset in prompt: '{}'", prompt.trim())],
                suggestions: self
                    .presets
                    .ids()
                    .into_iter()
                    .map(|id| format!("Try 'apply {} preset'", id))
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> PresetParser {
        PresetParser::new(Arc::new(PresetRegistry::with_builtins()))
    }

    #[test]
    fn test_preset_phrasings() {
        let p = parser();
        for prompt in ["apply portrait preset", "Portrait", "use the PORTRAIT preset, please"] {
            let result = p.parse(prompt).unwrap();
            assert_eq!(result.confidence, 1.0, "{}", prompt);
            assert!(!result.transforms.is_empty());
        }
        let result = p.parse("apply low light preset").unwrap();
        assert_eq!(result.transforms[0].name, "RandomBrightnessContrast");
    }

    #[test]
    fn test_unrecognized_prompt() {
        let result = parser().parse("make it sparkle").unwrap();
        assert!(result.transforms.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.suggestions.len(), 3);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert_eq!(parser().parse("   "), Err(ParseError::EmptyPrompt));
    }
}
