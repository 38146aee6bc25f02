//! Transform Compiler - Specifications In, One Seeded Pipeline Out
//!
//! Bad entries are skipped one at a time with a recorded reason. Only a
//! failure to compose the surviving transforms fails the whole compile.

use std::sync::Arc;
use thiserror::Error;

use crate::backend::{BackendError, Pipeline, Transform, TransformBackend};
use crate::ops::ImageOpsBackend;
use crate::seed::Seed;
use crate::transform::{ParamValue, TransformSpec};
use crate::validation::ParameterValidator;

/// Why a single specification was left out of the pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("Transform specification missing name")]
    MissingName,

    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    #[error("Failed to create transform {name}: {message}")]
    ConstructionFailed { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Pipeline construction failed: {0}")]
    PipelineBuild(#[from] BackendError),
}

/// The outcome of compiling a list of specifications.
#[derive(Debug)]
pub struct Compilation {
    /// `None` when no specification survived
    pub pipeline: Option<Pipeline>,
    /// Surviving specs with cleaned parameters and effective probability
    pub applied: Vec<TransformSpec>,
    /// Rejected specs, unchanged
    pub skipped: Vec<TransformSpec>,
    pub warnings: Vec<String>,
}

pub struct TransformCompiler {
    backend: Arc<dyn TransformBackend>,
    validator: ParameterValidator,
}

impl TransformCompiler {
    pub fn new(backend: Arc<dyn TransformBackend>) -> Self {
        Self {
            backend,
            validator: ParameterValidator::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn TransformBackend> {
        &self.backend
    }

    pub fn compile(&self, specs: &[TransformSpec], seed: Option<Seed>) -> Result<Compilation, CompileError> {
        let mut instances = vec![];
        let mut applied = vec![];
        let mut skipped = vec![];
        let mut warnings = vec![];

        for spec in specs {
            match self.compile_one(spec, &mut warnings) {
                Ok(transform) => {
                    applied.push(TransformSpec {
                        name: transform.name().to_string(),
                        parameters: transform.parameters().clone(),
                        probability: Some(transform.probability()),
                    });
                    instances.push(transform);
                }
                Err(reason) => {
                    tracing::warn!(transform = %spec.name, %reason, "skipping transform");
                    warnings.push(reason.to_string());
                    skipped.push(spec.clone());
                }
            }
        }

        let pipeline = if instances.is_empty() {
            None
        } else {
            Some(self.backend.compose(instances, seed)?)
        };

        tracing::debug!(
            applied = applied.len(),
            skipped = skipped.len(),
            ?seed,
            "compiled transform pipeline"
        );

        Ok(Compilation {
            pipeline,
            applied,
            skipped,
            warnings,
        })
    }

    /// Resolve, clean and instantiate one specification.
    pub fn compile_one(
        &self,
        spec: &TransformSpec,
        warnings: &mut Vec<String>,
    ) -> Result<Box<dyn Transform>, SkipReason> {
        if spec.name.is_empty() {
            return Err(SkipReason::MissingName);
        }

        let info = self
            .backend
            .lookup(&spec.name)
            .ok_or_else(|| SkipReason::UnknownTransform(spec.name.clone()))?;

        let mut params = spec.parameters.clone();
        if let Some(p) = spec.probability {
            params.entry("p".to_string()).or_insert(ParamValue::Float(p));
        }

        let cleaned = self.validator.clean(info.name, info.parameters, params);
        for key in &cleaned.dropped {
            warnings.push(format!("{}: dropped parameter '{}'", spec.name, key));
        }

        self.backend
            .instantiate(info.name, &cleaned.parameters)
            .map_err(|e| SkipReason::ConstructionFailed {
                name: spec.name.clone(),
                message: e.to_string(),
            })
    }
}

impl Default for TransformCompiler {
    fn default() -> Self {
        Self::new(Arc::new(ImageOpsBackend::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_and_unnamed_skipped() {
        let compiler = TransformCompiler::default();
        let specs = vec![TransformSpec::new("Bogus"), TransformSpec::default()];
        let out = compiler.compile(&specs, Some(1)).unwrap();
        assert!(out.pipeline.is_none());
        assert!(out.applied.is_empty());
        assert_eq!(out.skipped, specs);
        assert!(out.warnings.iter().any(|w| w == "Unknown transform: Bogus"));
        assert!(out.warnings.iter().any(|w| w == "Transform specification missing name"));
    }

    #[test]
    fn test_rotation_clamped_and_kept() {
        let compiler = TransformCompiler::default();
        let specs = vec![
            TransformSpec::new("Rotate").with_param("limit", 999),
            TransformSpec::new("Bogus"),
        ];
        let out = compiler.compile(&specs, None).unwrap();
        assert_eq!(out.applied.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.applied[0].parameters["limit"], ParamValue::Float(180.0));
        assert_eq!(out.pipeline.map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_probability_field_becomes_p() {
        let compiler = TransformCompiler::default();
        let specs = vec![TransformSpec::new("HorizontalFlip").with_probability(4.0)];
        let out = compiler.compile(&specs, None).unwrap();
        assert_eq!(out.applied[0].probability, Some(1.0));
        assert_eq!(out.applied[0].parameters["p"], ParamValue::Float(1.0));
    }

    #[test]
    fn test_explicit_p_wins_over_probability_field() {
        let compiler = TransformCompiler::default();
        let specs = vec![TransformSpec::new("VerticalFlip")
            .with_param("p", 0.25)
            .with_probability(0.9)];
        let out = compiler.compile(&specs, None).unwrap();
        assert_eq!(out.applied[0].probability, Some(0.25));
    }

    #[test]
    fn test_construction_failure_skips_only_that_spec() {
        let compiler = TransformCompiler::default();
        let specs = vec![
            TransformSpec::new("RandomCrop").with_param("height", 8),
            TransformSpec::new("ToGray"),
        ];
        let out = compiler.compile(&specs, None).unwrap();
        assert_eq!(out.applied.len(), 1);
        assert_eq!(out.applied[0].name, "ToGray");
        assert!(out.warnings[0].starts_with("Failed to create transform RandomCrop"));
    }

    #[test]
    fn test_dropped_parameters_warned() {
        let compiler = TransformCompiler::default();
        let specs = vec![TransformSpec::new("Rotate").with_param("border_mode", 4)];
        let out = compiler.compile(&specs, None).unwrap();
        assert_eq!(out.applied.len(), 1);
        assert!(out.warnings.iter().any(|w| w.contains("border_mode")));
    }

    #[test]
    fn test_compose_failure_is_hard() {
        let compiler = TransformCompiler::new(Arc::new(ImageOpsBackend::new(1)));
        let specs = vec![TransformSpec::new("ToGray"), TransformSpec::new("InvertImg")];
        assert!(matches!(
            compiler.compile(&specs, None),
            Err(CompileError::PipelineBuild(BackendError::Compose(_)))
        ));
    }
}
