//! Image Processor - The `process_image` Execution Contract
//!
//! Every call returns a `ProcessingResult`. Failures are reported in the
//! result, never raised, and always hand back the original image.

use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::TransformBackend;
use crate::compiler::TransformCompiler;
use crate::config::ProcessingLimits;
use crate::hashing::compute_pipeline_hash;
use crate::metadata::{MetaValue, Metadata};
use crate::ops::ImageOpsBackend;
use crate::seed::{Seed, SeedState};
use crate::transform::TransformSpec;
use crate::validation::validate_image;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    #[serde(skip)]
    pub augmented_image: Option<DynamicImage>,
    pub applied_transforms: Vec<TransformSpec>,
    pub skipped_transforms: Vec<TransformSpec>,
    pub metadata: Metadata,
    /// Wall-clock seconds
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub struct ImageProcessor {
    compiler: TransformCompiler,
    seeds: Arc<SeedState>,
    limits: ProcessingLimits,
}

impl ImageProcessor {
    pub fn new(limits: ProcessingLimits, seeds: Arc<SeedState>) -> Self {
        let backend = Arc::new(ImageOpsBackend::from_limits(&limits));
        Self::with_backend(backend, limits, seeds)
    }

    pub fn with_backend(
        backend: Arc<dyn TransformBackend>,
        limits: ProcessingLimits,
        seeds: Arc<SeedState>,
    ) -> Self {
        Self {
            compiler: TransformCompiler::new(backend),
            seeds,
            limits,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProcessingLimits::default(), Arc::new(SeedState::new()))
    }

    pub fn seeds(&self) -> &Arc<SeedState> {
        &self.seeds
    }

    pub fn compiler(&self) -> &TransformCompiler {
        &self.compiler
    }

    pub fn limits(&self) -> &ProcessingLimits {
        &self.limits
    }

    /// Validate, compile and run `transforms` against `image`.
    ///
    /// `seed` overrides the global seed for this call only.
    pub fn process_image(
        &self,
        image: &DynamicImage,
        transforms: &[TransformSpec],
        seed: Option<Seed>,
    ) -> ProcessingResult {
        let started = Instant::now();
        let (effective_seed, seed_record) = self.seeds.snapshot(seed);

        let mut metadata = Metadata::new();
        metadata.insert("original_size", MetaValue::size(image.width(), image.height()));
        seed_record.write_to(&mut metadata);

        if let Err(e) = validate_image(image, &self.limits) {
            return failure(image, transforms, metadata, started, format!("Image validation failed: {e}"));
        }

        let compilation = match self.compiler.compile(transforms, effective_seed) {
            Ok(c) => c,
            Err(e) => return failure(image, transforms, metadata, started, e.to_string()),
        };

        if !compilation.warnings.is_empty() {
            metadata.insert("warnings", compilation.warnings.clone());
        }

        let Some(pipeline) = compilation.pipeline else {
            tracing::info!(requested = transforms.len(), "no valid transforms, returning original image");
            return finish(
                image.clone(),
                vec![],
                compilation.skipped,
                metadata,
                started,
            );
        };

        let output = match pipeline.apply(image) {
            Ok(out) => out,
            Err(e) => {
                return failure(
                    image,
                    transforms,
                    metadata,
                    started,
                    format!("Pipeline execution failed: {e}"),
                )
            }
        };

        match compute_pipeline_hash(transforms) {
            Ok(hash) => metadata.insert("pipeline_hash", hash),
            Err(e) => tracing::warn!(error = %e, "could not hash transform list"),
        }

        finish(output, compilation.applied, compilation.skipped, metadata, started)
    }
}

fn finish(
    output: DynamicImage,
    applied: Vec<TransformSpec>,
    skipped: Vec<TransformSpec>,
    mut metadata: Metadata,
    started: Instant,
) -> ProcessingResult {
    let execution_time = started.elapsed().as_secs_f64();
    metadata.insert("output_size", MetaValue::size(output.width(), output.height()));
    metadata.insert("processing_time", execution_time);
    metadata.insert("transforms_applied", applied.len());
    metadata.insert("transforms_skipped", skipped.len());

    ProcessingResult {
        success: true,
        augmented_image: Some(output),
        applied_transforms: applied,
        skipped_transforms: skipped,
        metadata,
        execution_time,
        error_message: None,
    }
}

fn failure(
    image: &DynamicImage,
    transforms: &[TransformSpec],
    mut metadata: Metadata,
    started: Instant,
    message: String,
) -> ProcessingResult {
    tracing::error!(error = %message, "image processing failed");
    let execution_time = started.elapsed().as_secs_f64();
    metadata.insert("output_size", MetaValue::size(image.width(), image.height()));
    metadata.insert("processing_time", execution_time);
    metadata.insert("transforms_applied", 0usize);
    metadata.insert("transforms_skipped", transforms.len());
    metadata.insert("error", message.clone());

    ProcessingResult {
        success: false,
        augmented_image: Some(image.clone()),
        applied_transforms: vec![],
        skipped_transforms: transforms.to_vec(),
        metadata,
        execution_time,
        error_message: Some(message),
    }
}
