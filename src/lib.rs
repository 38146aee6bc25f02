//! Augment Core - Reproducible Image Augmentation
//!
//! # Guarantees
//! 1. Clamp, Don't Reject: out-of-range parameters are forced into range
//! 2. Skip, Don't Abort: bad transform specs are skipped one at a time
//! 3. Same Image, Specs and Seed Give the Same Bytes
//! 4. Every Result Carries Its Provenance
//! 5. Critical Hooks Gate the Run

pub mod backend;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod hashing;
pub mod hooks;
pub mod metadata;
pub mod ops;
pub mod parser;
pub mod pipeline;
pub mod presets;
pub mod processor;
pub mod seed;
pub mod transform;
pub mod validation;

pub use backend::{BackendError, Pipeline, Transform, TransformBackend, TransformInfo};
pub use compiler::{Compilation, CompileError, SkipReason, TransformCompiler};
pub use config::{ConfigError, ProcessingLimits};
pub use hashing::{canonical_json, compute_pipeline_hash};
pub use hooks::{Hook, HookError, HookRegistry, HookResult, RunContext, Stage, StageOutcome};
pub use metadata::{MetaValue, Metadata};
pub use ops::ImageOpsBackend;
pub use parser::{ParseError, ParseResult, PresetParser, PromptParser};
pub use pipeline::{AugmentRequest, AugmentResponse, AugmentationPipeline, PipelineError, PipelineResponse, PipelineStatus};
pub use presets::{Preset, PresetError, PresetRegistry};
pub use processor::{ImageProcessor, ProcessingResult};
pub use seed::{Seed, SeedMetadata, SeedSource, SeedState};
pub use transform::{ParamValue, Parameters, TransformSpec};
pub use validation::{ParameterValidator, ValidationError};

pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");
