//! Hooks shipped with the pipeline.

use async_trait::async_trait;

use crate::config::ProcessingLimits;
use crate::hooks::hook::{Hook, HookError, HookResult, RunContext};
use crate::metadata::MetaValue;
use crate::validation::validate_prompt;

/// Rejects unusable prompts before they reach the parser. Critical.
pub struct PromptValidationHook {
    limits: ProcessingLimits,
}

impl PromptValidationHook {
    pub fn new(limits: ProcessingLimits) -> Self {
        Self { limits }
    }
}

impl Default for PromptValidationHook {
    fn default() -> Self {
        Self::new(ProcessingLimits::default())
    }
}

#[async_trait]
impl Hook for PromptValidationHook {
    fn name(&self) -> &str {
        "prompt_validation"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn execute(&self, context: &RunContext) -> Result<HookResult, HookError> {
        let check = match validate_prompt(&context.original_prompt, &self.limits) {
            Ok(check) => check,
            Err(e) => return Ok(HookResult::failure(e.to_string())),
        };

        let mut next = context.clone();
        next.original_prompt = check.sanitized;
        next.metadata.insert("prompt_validated", true);
        next.metadata.insert("prompt_word_count", check.word_count);
        next.warnings.extend(check.warnings);
        Ok(HookResult::with_context(next))
    }
}

/// Records what the parser produced.
#[derive(Default)]
pub struct TransformSummaryHook;

#[async_trait]
impl Hook for TransformSummaryHook {
    fn name(&self) -> &str {
        "transform_summary"
    }

    async fn execute(&self, context: &RunContext) -> Result<HookResult, HookError> {
        let mut next = context.clone();
        let names: Vec<String> = context
            .parsed_transforms
            .iter()
            .map(|t| t.name.clone())
            .collect();

        next.metadata.insert("transforms_count", names.len());
        next.metadata.insert("transform_names", names.clone());
        if names.is_empty() {
            next.warnings.push("No transforms were parsed from the prompt".to_string());
        }
        Ok(HookResult::with_context(next))
    }
}

/// Checks that processing left a decodable image behind.
#[derive(Default)]
pub struct OutputVerificationHook;

#[async_trait]
impl Hook for OutputVerificationHook {
    fn name(&self) -> &str {
        "output_verification"
    }

    async fn execute(&self, context: &RunContext) -> Result<HookResult, HookError> {
        let Some(bytes) = context.result_image.as_deref() else {
            return Ok(HookResult::failure("no result image to verify"));
        };

        let image = image::load_from_memory(bytes)
            .map_err(|e| HookError::failed(format!("result image is not decodable: {e}")))?;

        let mut next = context.clone();
        next.metadata.insert("output_verified", true);
        next.metadata.insert("verified_size", MetaValue::size(image.width(), image.height()));
        Ok(HookResult::with_context(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformSpec;

    #[tokio::test]
    async fn test_prompt_validation_sanitizes() {
        let hook = PromptValidationHook::default();
        let result = hook.execute(&RunContext::new("s", "  blur it  ")).await.unwrap();
        assert!(result.success);
        let ctx = result.context.unwrap();
        assert_eq!(ctx.original_prompt, "blur it");
        assert_eq!(ctx.metadata.get("prompt_word_count").and_then(|v| v.as_i64()), Some(2));
    }

    #[tokio::test]
    async fn test_prompt_validation_rejects_script() {
        let hook = PromptValidationHook::default();
        let result = hook.execute(&RunContext::new("s", "<script>")).await.unwrap();
        assert!(!result.success);
        assert!(hook.critical());
        assert!(result.error.unwrap().contains("Suspicious pattern"));
    }

    #[tokio::test]
    async fn test_summary_warns_on_empty() {
        let result = TransformSummaryHook.execute(&RunContext::default()).await.unwrap();
        let ctx = result.context.unwrap();
        assert_eq!(ctx.warnings.len(), 1);

        let mut with_transforms = RunContext::default();
        with_transforms.parsed_transforms = vec![TransformSpec::new("Blur")];
        let ctx = TransformSummaryHook.execute(&with_transforms).await.unwrap().context.unwrap();
        assert_eq!(ctx.metadata.get("transforms_count").and_then(|v| v.as_i64()), Some(1));
        assert!(ctx.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_verification_needs_image() {
        let result = OutputVerificationHook.execute(&RunContext::default()).await.unwrap();
        assert!(!result.success);

        let mut ctx = RunContext::default();
        ctx.result_image = Some(b"not an image".to_vec());
        assert!(OutputVerificationHook.execute(&ctx).await.is_err());
    }
}
