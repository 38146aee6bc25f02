//! Hook pipeline behavior through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use augment_core::hooks::{OutputVerificationHook, StageState};
use augment_core::{
    AugmentRequest, AugmentationPipeline, Hook, HookError, HookRegistry, HookResult, ImageProcessor,
    PresetRegistry, ProcessingLimits, RunContext, SeedState, Stage,
};
use image::{DynamicImage, Rgb, RgbImage};

/// Fails with a declared reason.
struct FailingHook {
    name: &'static str,
    critical: bool,
}

#[async_trait]
impl Hook for FailingHook {
    fn name(&self) -> &str {
        self.name
    }
    fn critical(&self) -> bool {
        self.critical
    }
    async fn execute(&self, _context: &RunContext) -> Result<HookResult, HookError> {
        Ok(HookResult::failure("boom"))
    }
}

/// Counts invocations and tags the context metadata.
struct CountingHook {
    name: &'static str,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Hook for CountingHook {
    fn name(&self) -> &str {
        self.name
    }
    async fn execute(&self, context: &RunContext) -> Result<HookResult, HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut next = context.clone();
        next.metadata.insert(self.name, true);
        Ok(HookResult::with_context(next))
    }
}

/// Panics inside the hook future.
struct PanickingHook;

#[async_trait]
impl Hook for PanickingHook {
    fn name(&self) -> &str {
        "panicky"
    }
    async fn execute(&self, _context: &RunContext) -> Result<HookResult, HookError> {
        panic!("hook exploded");
    }
}

/// Ends the run successfully.
struct HaltHook;

#[async_trait]
impl Hook for HaltHook {
    fn name(&self) -> &str {
        "halt"
    }
    async fn execute(&self, _context: &RunContext) -> Result<HookResult, HookError> {
        Ok(HookResult::stop(None))
    }
}

/// Fails without being critical, but still hands back an edited context.
struct PartialHook;

#[async_trait]
impl Hook for PartialHook {
    fn name(&self) -> &str {
        "partial"
    }
    async fn execute(&self, context: &RunContext) -> Result<HookResult, HookError> {
        let mut next = context.clone();
        next.metadata.insert("partial_work", 3_i64);
        next.warnings.push("half done".to_string());
        Ok(HookResult {
            context: Some(next),
            ..HookResult::failure("ran out of budget")
        })
    }
}

fn counter(name: &'static str) -> (Arc<dyn Hook>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let hook = Arc::new(CountingHook {
        name,
        calls: calls.clone(),
    });
    (hook, calls)
}

fn test_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(32, 24, |x, y| Rgb([x as u8 * 8, y as u8 * 10, 128])))
}

async fn create_pipeline() -> AugmentationPipeline {
    AugmentationPipeline::with_default_hooks(
        ImageProcessor::new(ProcessingLimits::default(), Arc::new(SeedState::new())),
        Arc::new(PresetRegistry::with_builtins()),
    )
    .await
}

#[tokio::test]
async fn non_critical_failure_does_not_block_later_hooks() {
    let registry = HookRegistry::new();
    let (b, calls) = counter("b_ran");
    registry
        .register(Stage::PreTransform, Arc::new(FailingHook { name: "a", critical: false }))
        .await;
    registry.register(Stage::PreTransform, b).await;

    let outcome = registry
        .execute_stage(Stage::PreTransform, RunContext::new("s", "p"))
        .await;

    assert!(outcome.success);
    assert!(outcome.should_continue);
    assert_eq!(outcome.context.errors, vec!["a failed: boom"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcome.context.metadata.contains_key("b_ran"));
}

#[tokio::test]
async fn critical_failure_stops_before_later_hooks() {
    let registry = HookRegistry::new();
    let (b, calls) = counter("b_ran");
    registry
        .register(Stage::PreTransform, Arc::new(FailingHook { name: "a", critical: true }))
        .await;
    registry.register(Stage::PreTransform, b).await;

    let outcome = registry
        .execute_stage(Stage::PreTransform, RunContext::new("s", "p"))
        .await;

    assert!(!outcome.success);
    assert!(!outcome.should_continue);
    assert_eq!(outcome.error.as_deref(), Some("a failed: boom"));
    assert_eq!(outcome.context.errors.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let result: HookResult = outcome.into();
    assert!(result.context.is_some());
}

#[tokio::test]
async fn non_critical_failure_keeps_replacement_context_and_error() {
    let registry = HookRegistry::new();
    let (b, calls) = counter("b_ran");
    registry.register(Stage::PostTransform, Arc::new(PartialHook)).await;
    registry.register(Stage::PostTransform, b).await;

    let mut context = RunContext::new("s", "p");
    context.errors.push("earlier".to_string());
    let outcome = registry.execute_stage(Stage::PostTransform, context).await;

    assert!(outcome.success);
    assert!(outcome.should_continue);
    assert_eq!(outcome.state, StageState::Completed);
    assert_eq!(outcome.context.errors, vec!["earlier", "partial failed: ran out of budget"]);
    assert_eq!(outcome.context.warnings, vec!["half done"]);
    assert_eq!(outcome.context.metadata.get("partial_work").and_then(|v| v.as_i64()), Some(3));
    assert!(outcome.context.metadata.contains_key("b_ran"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_hook_is_recovered() {
    let registry = HookRegistry::new();
    let (b, calls) = counter("b_ran");
    registry.register(Stage::PostSave, Arc::new(PanickingHook)).await;
    registry.register(Stage::PostSave, b).await;

    let outcome = registry
        .execute_stage(Stage::PostSave, RunContext::default())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.state, StageState::Completed);
    assert_eq!(outcome.context.errors, vec!["panicky failed: panicked: hook exploded"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn augment_with_preset_runs_every_stage() {
    let pipeline = create_pipeline().await;
    let (classify, classify_calls) = counter("classified");
    let (save, save_calls) = counter("saved");
    pipeline
        .registry()
        .register(Stage::PostTransformVerify, Arc::new(OutputVerificationHook))
        .await;
    pipeline
        .registry()
        .register(Stage::PostTransformClassify, classify)
        .await;
    pipeline.registry().register(Stage::PostSave, save).await;

    let request = AugmentRequest::new(test_image())
        .with_preset("segmentation")
        .with_seed(42);
    let response = pipeline.augment_image(request).await.unwrap();

    assert!(response.success, "{:?}", response.errors);
    assert!(response.augmented_image.is_some());
    assert_eq!(response.applied_transforms.len(), 3);
    assert_eq!(response.metadata.get("preset_used").and_then(|v| v.as_str()), Some("segmentation"));
    assert_eq!(response.metadata.get("output_verified").and_then(|v| v.as_bool()), Some(true));
    assert!(response.metadata.contains_key("processing"));
    assert_eq!(classify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(save_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn augment_is_reproducible_with_seed() {
    let pipeline = create_pipeline().await;
    let run = |seed| AugmentRequest::new(test_image()).with_prompt("apply lowlight preset").with_seed(seed);

    let a = pipeline.augment_image(run(7)).await.unwrap();
    let b = pipeline.augment_image(run(7)).await.unwrap();

    assert!(a.success && b.success);
    assert_eq!(
        a.augmented_image.unwrap().as_bytes(),
        b.augmented_image.unwrap().as_bytes()
    );
    assert_ne!(a.session_id, b.session_id);
}

#[tokio::test]
async fn preset_wins_over_prompt() {
    let pipeline = create_pipeline().await;
    let request = AugmentRequest::new(test_image())
        .with_prompt("make it sparkle")
        .with_preset("portrait");

    let response = pipeline.augment_image(request).await.unwrap();

    assert!(response.success);
    assert_eq!(response.metadata.get("preset_used").and_then(|v| v.as_str()), Some("portrait"));
    assert!(response.warnings.iter().any(|w| w.contains("using preset")));
}

#[tokio::test]
async fn early_exit_skips_processing() {
    let pipeline = create_pipeline().await;
    let (save, save_calls) = counter("saved");
    pipeline.registry().register(Stage::PreTransform, Arc::new(HaltHook)).await;
    pipeline.registry().register(Stage::PreSave, save).await;

    let request = AugmentRequest::new(test_image()).with_preset("portrait");
    let response = pipeline.augment_image(request).await.unwrap();

    assert!(response.success);
    assert!(response.augmented_image.is_none());
    assert!(response.applied_transforms.is_empty());
    assert_eq!(save_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_prompt_never_reaches_processing() {
    let pipeline = create_pipeline().await;
    let (pre, pre_calls) = counter("pre_transform_ran");
    pipeline.registry().register(Stage::PreTransform, pre).await;

    let request = AugmentRequest::new(test_image()).with_prompt("portrait ../../etc/passwd");
    let response = pipeline.augment_image(request).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.message, "Pre-MCP stage failed");
    assert_eq!(pre_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn critical_post_mcp_failure_ends_augment_run() {
    let pipeline = create_pipeline().await;
    let (pre, pre_calls) = counter("pre_transform_ran");
    pipeline
        .registry()
        .register(Stage::PostMcp, Arc::new(FailingHook { name: "crit", critical: true }))
        .await;
    pipeline.registry().register(Stage::PreTransform, pre).await;

    let request = AugmentRequest::new(test_image()).with_preset("portrait");
    let response = pipeline.augment_image(request).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.message, "Post-MCP stage failed");
    assert!(response.errors.iter().any(|e| e == "crit failed: boom"));
    assert!(response.augmented_image.is_none());
    assert!(response.applied_transforms.is_empty());
    assert!(!response.metadata.contains_key("processing"));
    assert_eq!(pre_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn post_mcp_stop_ends_augment_run() {
    let pipeline = create_pipeline().await;
    let (pre, pre_calls) = counter("pre_transform_ran");
    pipeline.registry().register(Stage::PostMcp, Arc::new(HaltHook)).await;
    pipeline.registry().register(Stage::PreTransform, pre).await;

    let request = AugmentRequest::new(test_image()).with_preset("portrait");
    let response = pipeline.augment_image(request).await.unwrap();

    assert!(response.success);
    assert_eq!(response.message, "Run stopped after parsing");
    assert!(response.augmented_image.is_none());
    assert_eq!(pre_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn post_mcp_failure_still_returns_parse() {
    let pipeline = create_pipeline().await;
    pipeline
        .registry()
        .register(Stage::PostMcp, Arc::new(FailingHook { name: "crit", critical: true }))
        .await;

    let response = pipeline.parse_prompt_with_hooks("apply portrait preset", None).await;

    assert!(response.success);
    assert!(!response.transforms.is_empty());
    assert!(response.errors.iter().any(|e| e == "crit failed: boom"));
}
