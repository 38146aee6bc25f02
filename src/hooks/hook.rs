//! Core hook types and traits.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::transform::TransformSpec;

/// Points in a run where hooks can be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before the prompt reaches the parser.
    PreMcp,
    /// After the parser returned.
    PostMcp,
    PreTransform,
    PostTransform,
    PostTransformVerify,
    PostTransformClassify,
    PreSave,
    PostSave,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 8] = [
        Stage::PreMcp,
        Stage::PostMcp,
        Stage::PreTransform,
        Stage::PostTransform,
        Stage::PostTransformVerify,
        Stage::PostTransformClassify,
        Stage::PreSave,
        Stage::PostSave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreMcp => "pre_mcp",
            Stage::PostMcp => "post_mcp",
            Stage::PreTransform => "pre_transform",
            Stage::PostTransform => "post_transform",
            Stage::PostTransformVerify => "post_transform_verify",
            Stage::PostTransformClassify => "post_transform_classify",
            Stage::PreSave => "pre_save",
            Stage::PostSave => "post_save",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State carried through every stage of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunContext {
    pub session_id: String,
    pub original_prompt: String,
    /// Encoded input image, if the run has one.
    #[serde(skip)]
    pub image_payload: Option<Vec<u8>>,
    pub parsed_transforms: Vec<TransformSpec>,
    /// PNG-encoded output, set once processing succeeded.
    #[serde(skip)]
    pub result_image: Option<Vec<u8>>,
    pub metadata: Metadata,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RunContext {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            original_prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// What a hook reports back to the stage executor.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub success: bool,
    /// Replacement context; `None` keeps the incoming one.
    pub context: Option<RunContext>,
    pub error: Option<String>,
    pub should_continue: bool,
}

impl HookResult {
    /// Success, context unchanged.
    pub fn ok() -> Self {
        Self {
            success: true,
            context: None,
            error: None,
            should_continue: true,
        }
    }

    /// Success with a replacement context.
    pub fn with_context(context: RunContext) -> Self {
        Self {
            context: Some(context),
            ..Self::ok()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::ok()
        }
    }

    /// Success, but no further hooks or stages run.
    pub fn stop(context: Option<RunContext>) -> Self {
        Self {
            context,
            should_continue: false,
            ..Self::ok()
        }
    }
}

impl Default for HookResult {
    fn default() -> Self {
        Self::ok()
    }
}

/// Hook execution faults.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HookError {
    #[error("{reason}")]
    ExecutionFailed { reason: String },

    #[error("panicked: {message}")]
    Panicked { message: String },
}

impl HookError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HookError::ExecutionFailed {
            reason: reason.into(),
        }
    }
}

/// Trait for implementing stage hooks.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used in logs and error strings. Need not be unique.
    fn name(&self) -> &str;

    /// A failing critical hook stops the run.
    ///
    /// Read once per execution; implementations should return a constant.
    fn critical(&self) -> bool {
        false
    }

    async fn execute(&self, context: &RunContext) -> Result<HookResult, HookError>;
}
