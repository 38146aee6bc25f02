//! Augmentation Pipeline - Single Entry Point
//!
//! Every run goes through the hook stages in order. Processing never runs
//! unless pre_mcp accepted the prompt.

use chrono::Utc;
use futures::FutureExt;
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::codec::encode_png;
use crate::hooks::registry::panic_message;
use crate::hooks::{HookRegistry, PromptValidationHook, RunContext, Stage, TransformSummaryHook};
use crate::metadata::Metadata;
use crate::parser::{PresetParser, PromptParser};
use crate::presets::PresetRegistry;
use crate::processor::ImageProcessor;
use crate::seed::Seed;
use crate::transform::TransformSpec;
use crate::PIPELINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Either prompt or preset must be provided")]
    MissingInput,

    #[error("Preset '{0}' not found")]
    PresetNotFound(String),

    #[error("Preset '{0}' contains no valid transforms")]
    EmptyPreset(String),

    #[error("Pipeline not ready - no hooks registered")]
    NotReady,
}

/// Outcome of parsing a prompt through pre_mcp, the parser and post_mcp.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub success: bool,
    pub session_id: String,
    pub transforms: Vec<TransformSpec>,
    pub metadata: Metadata,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub message: String,
}

/// A full augmentation request. Exactly one of prompt or preset is used;
/// the preset wins when both are given.
#[derive(Debug, Clone)]
pub struct AugmentRequest {
    pub image: DynamicImage,
    pub prompt: Option<String>,
    pub preset: Option<String>,
    pub seed: Option<Seed>,
    pub session_id: Option<String>,
}

impl AugmentRequest {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            prompt: None,
            preset: None,
            seed: None,
            session_id: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AugmentResponse {
    pub success: bool,
    pub session_id: String,
    #[serde(skip)]
    pub augmented_image: Option<DynamicImage>,
    pub applied_transforms: Vec<TransformSpec>,
    pub skipped_transforms: Vec<TransformSpec>,
    pub metadata: Metadata,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub registered_hooks: BTreeMap<Stage, Vec<String>>,
    pub pipeline_version: String,
    pub supported_stages: Vec<Stage>,
    pub hook_count: usize,
}

enum ParseOutcome {
    /// `stop` is set when post_mcp ended the run, by request or by a
    /// critical failure.
    Parsed { context: RunContext, stop: Option<ParseStop> },
    Failed { context: RunContext, message: String },
}

struct ParseStop {
    success: bool,
    message: String,
}

const PROCESSING_STAGES: [Stage; 5] = [
    Stage::PostTransform,
    Stage::PostTransformVerify,
    Stage::PostTransformClassify,
    Stage::PreSave,
    Stage::PostSave,
];

/// The augmentation pipeline - hook stages around parsing and processing
pub struct AugmentationPipeline {
    registry: Arc<HookRegistry>,
    parser: Arc<dyn PromptParser>,
    processor: ImageProcessor,
    presets: Arc<PresetRegistry>,
}

impl AugmentationPipeline {
    pub fn new(
        registry: Arc<HookRegistry>,
        parser: Arc<dyn PromptParser>,
        processor: ImageProcessor,
        presets: Arc<PresetRegistry>,
    ) -> Self {
        Self {
            registry,
            parser,
            processor,
            presets,
        }
    }

    /// A pipeline with the preset parser and the default pre_mcp and
    /// post_mcp hooks registered.
    pub async fn with_default_hooks(processor: ImageProcessor, presets: Arc<PresetRegistry>) -> Self {
        let registry = Arc::new(HookRegistry::new());
        registry
            .register(
                Stage::PreMcp,
                Arc::new(PromptValidationHook::new(processor.limits().clone())),
            )
            .await;
        registry
            .register(Stage::PostMcp, Arc::new(TransformSummaryHook))
            .await;
        tracing::info!("Default hooks registered");

        let parser = Arc::new(PresetParser::new(presets.clone()));
        Self::new(registry, parser, processor, presets)
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    pub fn processor(&self) -> &ImageProcessor {
        &self.processor
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    /// Set or clear the default seed. Returns the previous value.
    pub fn set_default_seed(&self, seed: Option<Seed>) -> Option<Seed> {
        self.processor.seeds().set_global(seed)
    }

    pub async fn parse_prompt_with_hooks(&self, prompt: &str, session_id: Option<String>) -> PipelineResponse {
        let context = new_context(prompt, session_id);
        tracing::info!(session_id = %context.session_id, "Starting prompt parsing pipeline");

        match self.parse_guarded(context, None).await {
            ParseOutcome::Parsed { context, .. } => {
                tracing::info!(session_id = %context.session_id, "Pipeline completed successfully");
                success_response(context)
            }
            ParseOutcome::Failed { context, message } => error_response(context, message),
        }
    }

    /// Parse (or resolve the preset), process the image and run every
    /// remaining stage.
    pub async fn augment_image(&self, request: AugmentRequest) -> Result<AugmentResponse, PipelineError> {
        let prompt = request.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty());
        let preset = request.preset.as_deref().map(str::trim).filter(|p| !p.is_empty());

        let mut notes = vec![];
        let (effective_prompt, preset_transforms) = match (prompt, preset) {
            (None, None) => return Err(PipelineError::MissingInput),
            (Some(prompt), None) => (prompt.to_string(), None),
            (prompt, Some(id)) => {
                if prompt.is_some() {
                    tracing::warn!(preset = id, "Both prompt and preset provided, using preset");
                    notes.push("Both prompt and preset provided, using preset".to_string());
                }
                let preset = self
                    .presets
                    .get(id)
                    .ok_or_else(|| PipelineError::PresetNotFound(id.to_string()))?;
                if preset.transforms.is_empty() {
                    return Err(PipelineError::EmptyPreset(id.to_string()));
                }
                (format!("apply {} preset", id), Some((id.to_string(), preset.transforms.clone())))
            }
        };

        if self.registry.hook_count().await == 0 {
            return Err(PipelineError::NotReady);
        }

        let mut context = new_context(&effective_prompt, request.session_id.clone());
        context.warnings.extend(notes);
        match encode_png(&request.image) {
            Ok(bytes) => context.image_payload = Some(bytes),
            Err(e) => tracing::warn!(error = %e, "Could not encode input image payload"),
        }

        let context = match self.parse_guarded(context, preset_transforms).await {
            ParseOutcome::Parsed { context, stop: None } => context,
            ParseOutcome::Parsed {
                context,
                stop: Some(stop),
            } => return Ok(unprocessed(context, stop.success, stop.message)),
            ParseOutcome::Failed { context, message } => return Ok(unprocessed(context, false, message)),
        };

        let outcome = self.registry.execute_stage(Stage::PreTransform, context).await;
        if !outcome.success || !outcome.should_continue {
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| "Run stopped before processing".to_string());
            return Ok(unprocessed(outcome.context, outcome.success, message));
        }
        let mut context = outcome.context;

        let result = self
            .processor
            .process_image(&request.image, &context.parsed_transforms, request.seed);

        if let Err(e) = context.metadata.insert_serialized("processing", &result) {
            tracing::warn!(error = %e, "Could not record processing provenance");
        }
        context.warnings.extend(
            result
                .metadata
                .get("warnings")
                .and_then(|w| w.as_list())
                .unwrap_or_default()
                .iter()
                .filter_map(|w| w.as_str().map(str::to_string)),
        );
        if let Some(error) = &result.error_message {
            context.errors.push(error.clone());
        }
        if result.success {
            if let Some(image) = &result.augmented_image {
                match encode_png(image) {
                    Ok(bytes) => context.result_image = Some(bytes),
                    Err(e) => context.errors.push(e.to_string()),
                }
            }
        }

        let mut success = result.success;
        let mut message = result
            .error_message
            .clone()
            .unwrap_or_else(|| format!("Applied {} transforms", result.applied_transforms.len()));

        for stage in PROCESSING_STAGES {
            let outcome = self.registry.execute_stage(stage, context).await;
            context = outcome.context;
            if !outcome.success {
                success = false;
                message = format!("{} stage failed", stage);
                break;
            }
            if !outcome.should_continue {
                tracing::debug!(%stage, "Run stopped early");
                break;
            }
        }

        Ok(AugmentResponse {
            success,
            session_id: context.session_id,
            augmented_image: result.augmented_image,
            applied_transforms: result.applied_transforms,
            skipped_transforms: result.skipped_transforms,
            metadata: context.metadata,
            warnings: context.warnings,
            errors: context.errors,
            message,
        })
    }

    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            registered_hooks: self.registry.list_hooks().await,
            pipeline_version: PIPELINE_VERSION.to_string(),
            supported_stages: Stage::ALL.to_vec(),
            hook_count: self.registry.hook_count().await,
        }
    }

    /// Run the parse stages, turning any escaped panic into a failed outcome.
    async fn parse_guarded(
        &self,
        context: RunContext,
        preset: Option<(String, Vec<TransformSpec>)>,
    ) -> ParseOutcome {
        let fallback = context.clone();
        match AssertUnwindSafe(self.parse_stages(context, preset))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = format!("Pipeline execution failed: {}", panic_message(payload.as_ref()));
                tracing::error!(session_id = %fallback.session_id, "{}", message);
                let mut context = fallback;
                context.errors.push(message.clone());
                ParseOutcome::Failed { context, message }
            }
        }
    }

    async fn parse_stages(
        &self,
        context: RunContext,
        preset: Option<(String, Vec<TransformSpec>)>,
    ) -> ParseOutcome {
        let outcome = self.registry.execute_stage(Stage::PreMcp, context).await;
        if !outcome.success || !outcome.should_continue {
            return ParseOutcome::Failed {
                context: outcome.context,
                message: "Pre-MCP stage failed".to_string(),
            };
        }
        let mut context = outcome.context;

        match preset {
            Some((id, transforms)) => {
                context.parsed_transforms = transforms;
                context.metadata.insert("preset_used", id);
                context.metadata.insert("parser_confidence", 1.0);
            }
            None => match self.parser.parse(&context.original_prompt) {
                Ok(parsed) => {
                    context.parsed_transforms = parsed.transforms;
                    context.metadata.insert("parser_confidence", parsed.confidence);
                    context.metadata.insert("parser_warnings", parsed.warnings.clone());
                    context.metadata.insert("parser_suggestions", parsed.suggestions);
                    context.warnings.extend(parsed.warnings);
                }
                Err(e) => {
                    let message = format!("Prompt parsing failed: {}", e);
                    tracing::error!(session_id = %context.session_id, "{}", message);
                    context.errors.push(message.clone());
                    return ParseOutcome::Failed { context, message };
                }
            },
        }

        // A post_mcp failure still yields a parse; the caller decides
        // whether later stages may run.
        let outcome = self.registry.execute_stage(Stage::PostMcp, context).await;
        if !outcome.success {
            tracing::warn!("Post-MCP stage failed, but continuing");
        }
        let stop = (!outcome.should_continue).then(|| ParseStop {
            success: outcome.success,
            message: if outcome.error.is_some() {
                "Post-MCP stage failed".to_string()
            } else {
                "Run stopped after parsing".to_string()
            },
        });
        ParseOutcome::Parsed {
            stop,
            context: outcome.context,
        }
    }
}

fn new_context(prompt: &str, session_id: Option<String>) -> RunContext {
    let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut context = RunContext::new(session_id, prompt);
    context.metadata.insert("timestamp", Utc::now().to_rfc3339());
    context.metadata.insert("pipeline_version", PIPELINE_VERSION);
    context
}

fn success_response(context: RunContext) -> PipelineResponse {
    PipelineResponse {
        success: true,
        message: format!("Successfully parsed {} transforms", context.parsed_transforms.len()),
        session_id: context.session_id,
        transforms: context.parsed_transforms,
        metadata: context.metadata,
        warnings: context.warnings,
        errors: context.errors,
    }
}

fn error_response(context: RunContext, message: String) -> PipelineResponse {
    PipelineResponse {
        success: false,
        session_id: context.session_id,
        transforms: context.parsed_transforms,
        metadata: context.metadata,
        warnings: context.warnings,
        errors: context.errors,
        message,
    }
}

fn unprocessed(context: RunContext, success: bool, message: impl Into<String>) -> AugmentResponse {
    AugmentResponse {
        success,
        session_id: context.session_id,
        augmented_image: None,
        applied_transforms: vec![],
        skipped_transforms: context.parsed_transforms,
        metadata: context.metadata,
        warnings: context.warnings,
        errors: context.errors,
        message: message.into(),
    }
}
