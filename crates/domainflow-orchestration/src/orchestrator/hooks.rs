//! Post-completion hooks.
//!
//! Registered once at startup as an ordered list; invoked sequentially when
//! a campaign reaches `Completed` so the observable order is deterministic.
//! Hook errors are logged and never roll back the completion transition.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use uuid::Uuid;

use domainflow_shared::OrchestrationResult;

/// A unit of follow-up work after campaign completion (report generation,
/// notification fan-out, downstream exports).
#[async_trait]
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_campaign_completed(&self, campaign_uuid: Uuid) -> OrchestrationResult<()>;
}

/// Ordered hook list shared with supervisor tasks
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Arc<RwLock<Vec<Arc<dyn CompletionHook>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn CompletionHook>) {
        self.hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every hook in registration order. Failures are logged and do not
    /// stop later hooks.
    pub async fn run_completion_hooks(&self, campaign_uuid: Uuid) {
        let hooks: Vec<Arc<dyn CompletionHook>> = self
            .hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for hook in hooks {
            match hook.on_campaign_completed(campaign_uuid).await {
                Ok(()) => info!(
                    campaign_uuid = %campaign_uuid,
                    hook = hook.name(),
                    "Completion hook finished"
                ),
                Err(err) => error!(
                    campaign_uuid = %campaign_uuid,
                    hook = hook.name(),
                    error = %err,
                    "Completion hook failed"
                ),
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainflow_shared::OrchestrationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingHook {
        name: String,
        order: Arc<Mutex<Vec<String>>>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionHook for RecordingHook {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_campaign_completed(&self, _campaign_uuid: Uuid) -> OrchestrationResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(OrchestrationError::store("hook", "downstream export unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_hooks_run_sequentially_and_errors_do_not_stop_later_hooks() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        for (name, fail) in [("report", false), ("notify", true), ("export", false)] {
            registry.register(Arc::new(RecordingHook {
                name: name.to_string(),
                order: order.clone(),
                fail,
                calls: AtomicUsize::new(0),
            }));
        }

        registry.run_completion_hooks(Uuid::new_v4()).await;

        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["report", "notify", "export"]
        );
    }
}
