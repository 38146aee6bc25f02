//! Hook registry and the stage executor.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::RwLock;

use crate::hooks::hook::{Hook, HookError, HookResult, RunContext, Stage};

/// Where a stage execution currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    /// A hook asked to stop; the stage still succeeded.
    StoppedOk,
    /// A critical hook failed.
    StoppedFailed,
    Completed,
}

/// Result of running every hook in one stage.
///
/// Unlike a bare `HookResult`, the context is always present.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub state: StageState,
    pub success: bool,
    pub should_continue: bool,
    pub error: Option<String>,
    pub context: RunContext,
}

impl From<StageOutcome> for HookResult {
    fn from(outcome: StageOutcome) -> Self {
        HookResult {
            success: outcome.success,
            context: Some(outcome.context),
            error: outcome.error,
            should_continue: outcome.should_continue,
        }
    }
}

/// Registry that holds hooks per stage and executes them in order.
///
/// Duplicate names are allowed. `unregister` removes the first match.
pub struct HookRegistry {
    hooks: RwLock<HashMap<Stage, Vec<Arc<dyn Hook>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Append a hook to a stage.
    pub async fn register(&self, stage: Stage, hook: Arc<dyn Hook>) {
        let mut hooks = self.hooks.write().await;
        let entries = hooks.entry(stage).or_default();
        if entries.iter().any(|h| h.name() == hook.name()) {
            tracing::warn!(hook = hook.name(), %stage, "Registering duplicate hook name");
        }
        tracing::debug!(hook = hook.name(), %stage, critical = hook.critical(), "Registered hook");
        entries.push(hook);
    }

    /// Remove the first hook named `name` from a stage. Returns `true` if one was removed.
    pub async fn unregister(&self, stage: Stage, name: &str) -> bool {
        let mut hooks = self.hooks.write().await;
        let Some(entries) = hooks.get_mut(&stage) else {
            return false;
        };
        match entries.iter().position(|h| h.name() == name) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Hook names per stage, covering every stage.
    pub async fn list_hooks(&self) -> BTreeMap<Stage, Vec<String>> {
        let hooks = self.hooks.read().await;
        Stage::ALL
            .iter()
            .map(|stage| {
                let names = hooks
                    .get(stage)
                    .map(|entries| entries.iter().map(|h| h.name().to_string()).collect())
                    .unwrap_or_default();
                (*stage, names)
            })
            .collect()
    }

    /// Snapshot of the hooks registered for a stage.
    pub async fn hooks_for(&self, stage: Stage) -> Vec<Arc<dyn Hook>> {
        let hooks = self.hooks.read().await;
        hooks.get(&stage).cloned().unwrap_or_default()
    }

    pub async fn hook_count(&self) -> usize {
        let hooks = self.hooks.read().await;
        hooks.values().map(Vec::len).sum()
    }

    /// Run every hook registered for `stage` against `context`.
    ///
    /// - Hooks run sequentially in registration order.
    /// - A failure (declared, returned `Err`, or panic) adds
    ///   `"<hook> failed: <reason>"` to the context errors.
    /// - A failing critical hook stops the stage with `success = false`.
    /// - A hook returning `should_continue = false` stops the stage with
    ///   `success = true`.
    pub async fn execute_stage(&self, stage: Stage, context: RunContext) -> StageOutcome {
        // Snapshot and release the lock before running anything.
        let hooks = self.hooks_for(stage).await;
        let mut run = StageRun::new(stage, hooks, context);
        run.drive().await;
        run.finish()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct StageRun {
    stage: Stage,
    state: StageState,
    hooks: Vec<Arc<dyn Hook>>,
    next: usize,
    context: RunContext,
    error: Option<String>,
}

impl StageRun {
    fn new(stage: Stage, hooks: Vec<Arc<dyn Hook>>, context: RunContext) -> Self {
        Self {
            stage,
            state: StageState::Pending,
            hooks,
            next: 0,
            context,
            error: None,
        }
    }

    async fn drive(&mut self) {
        self.state = if self.hooks.is_empty() {
            StageState::Completed
        } else {
            StageState::Running
        };
        while self.state == StageState::Running {
            self.step().await;
        }
    }

    async fn step(&mut self) {
        let Some(hook) = self.hooks.get(self.next).cloned() else {
            self.state = StageState::Completed;
            return;
        };
        self.next += 1;

        let critical = hook.critical();
        let outcome = AssertUnwindSafe(hook.execute(&self.context))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(HookError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            });

        match outcome {
            Ok(result) if result.success => {
                if let Some(context) = result.context {
                    self.context = context;
                }
                if !result.should_continue {
                    tracing::debug!(hook = hook.name(), stage = %self.stage, "Hook requested early exit");
                    self.state = StageState::StoppedOk;
                }
            }
            Ok(result) => {
                let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(hook = hook.name(), stage = %self.stage, critical, "Hook failed: {}", reason);
                let message = format!("{} failed: {}", hook.name(), reason);
                if critical {
                    self.fail(message);
                    return;
                }
                if let Some(context) = result.context {
                    self.context = context;
                }
                self.context.errors.push(message);
                if !result.should_continue {
                    self.state = StageState::StoppedOk;
                }
            }
            Err(err) => {
                tracing::error!(hook = hook.name(), stage = %self.stage, critical, "Hook fault: {}", err);
                let message = format!("{} failed: {}", hook.name(), err);
                if critical {
                    self.fail(message);
                } else {
                    self.context.errors.push(message);
                }
            }
        }
    }

    fn fail(&mut self, message: String) {
        self.context.errors.push(message.clone());
        self.error = Some(message);
        self.state = StageState::StoppedFailed;
    }

    fn finish(self) -> StageOutcome {
        StageOutcome {
            stage: self.stage,
            success: self.state != StageState::StoppedFailed,
            should_continue: self.state == StageState::Completed,
            error: self.error,
            state: self.state,
            context: self.context,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
