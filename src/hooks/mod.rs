//! Staged hooks for intercepting and enriching an augmentation run.
//!
//! A run passes through eight fixed stages, in order:
//!
//! - **pre_mcp**: Before the prompt is handed to the parser
//! - **post_mcp**: After the parser produced transforms
//! - **pre_transform** / **post_transform**: Around image processing
//! - **post_transform_verify**: Check the produced image
//! - **post_transform_classify**: Label the produced image
//! - **pre_save** / **post_save**: Around persisting the result
//!
//! Hooks in a stage run strictly in registration order. A failing critical
//! hook, or any hook asking to stop, ends the run.

pub mod builtin;
pub mod hook;
pub mod registry;

pub use builtin::{OutputVerificationHook, PromptValidationHook, TransformSummaryHook};
pub use hook::{Hook, HookError, HookResult, RunContext, Stage};
pub use registry::{HookRegistry, StageOutcome, StageState};
