//! Hook registry
//!
//! Hooks for one event run one at a time, in registration order, each
//! awaited before the next starts. The first error stops the chain and is
//! returned to the operation that fired it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::errors::RepoResult;
use crate::store::BoxFuture;

use super::event::{HookEvent, HookPayload};

/// Boxed hook callback
pub type HookFn<T> = Arc<dyn Fn(HookPayload<T>) -> BoxFuture<'static, RepoResult<()>> + Send + Sync>;

/// Per-repository hook table. Clones share the same table.
pub struct HookRegistry<T> {
    hooks: Arc<RwLock<HashMap<HookEvent, Vec<HookFn<T>>>>>,
}

impl<T> Clone for HookRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<T> Default for HookRegistry<T> {
    fn default() -> Self {
        Self {
            hooks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> HookRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook for `event`
    pub fn register<F, Fut>(&self, event: HookEvent, hook: F)
    where
        F: Fn(HookPayload<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RepoResult<()>> + Send + 'static,
    {
        let boxed: HookFn<T> =
            Arc::new(move |payload| -> BoxFuture<'static, RepoResult<()>> { Box::pin(hook(payload)) });
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        hooks.entry(event).or_default().push(boxed);
    }

    /// Run every hook for `event` in order, stopping at the first error
    pub async fn fire(&self, event: HookEvent, payload: HookPayload<T>) -> RepoResult<()> {
        debug_assert!(payload.fits(event), "payload does not match {}", event.as_str());

        let hooks = self.snapshot(event);
        if hooks.is_empty() {
            return Ok(());
        }

        trace!(event = event.as_str(), hooks = hooks.len(), "firing hooks");
        for hook in hooks {
            hook(payload.clone()).await?;
        }
        Ok(())
    }

    /// Number of hooks registered for `event`
    pub fn count(&self, event: HookEvent) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Remove every hook for `event`
    pub fn clear(&self, event: HookEvent) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&event);
    }

    fn snapshot(&self, event: HookEvent) -> Vec<HookFn<T>> {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RepoError;
    use std::sync::Mutex;

    fn restore(id: &str) -> HookPayload<()> {
        HookPayload::Restore { id: id.to_string() }
    }

    #[tokio::test]
    async fn test_fire_without_hooks_is_noop() {
        let registry: HookRegistry<()> = HookRegistry::new();
        assert!(registry.fire(HookEvent::BeforeRestore, restore("a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let registry: HookRegistry<()> = HookRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.register(HookEvent::AfterRestore, move |payload| {
                let seen = Arc::clone(&seen);
                async move {
                    if let HookPayload::Restore { id } = payload {
                        seen.lock().unwrap().push(format!("{}:{}", tag, id));
                    }
                    Ok(())
                }
            });
        }

        registry.fire(HookEvent::AfterRestore, restore("x")).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first:x", "second:x", "third:x"]);
    }

    #[tokio::test]
    async fn test_failure_stops_the_chain() {
        let registry: HookRegistry<()> = HookRegistry::new();
        let ran_after = Arc::new(Mutex::new(false));

        registry.register(HookEvent::BeforeRestore, |_| async {
            Err(RepoError::conflict("locked"))
        });
        let flag = Arc::clone(&ran_after);
        registry.register(HookEvent::BeforeRestore, move |_| {
            let flag = Arc::clone(&flag);
            async move {
                *flag.lock().unwrap() = true;
                Ok(())
            }
        });

        let err = registry
            .fire(HookEvent::BeforeRestore, restore("x"))
            .await
            .unwrap_err();

        assert_eq!(err, RepoError::conflict("locked"));
        assert!(!*ran_after.lock().unwrap());
    }

    #[tokio::test]
    async fn test_duplicates_are_kept_and_clear_removes() {
        let registry: HookRegistry<()> = HookRegistry::new();
        let shared = registry.clone();
        for _ in 0..2 {
            shared.register(HookEvent::AfterCreate, |_| async { Ok(()) });
        }

        assert_eq!(registry.count(HookEvent::AfterCreate), 2);
        assert_eq!(registry.count(HookEvent::BeforeCreate), 0);

        registry.clear(HookEvent::AfterCreate);
        assert_eq!(shared.count(HookEvent::AfterCreate), 0);
    }
}
