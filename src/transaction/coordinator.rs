//! Transaction coordinator
//!
//! Runs a callback against a fresh `TransactionContext`, then flushes the
//! queued writes into the store transaction and commits. After-hooks run only
//! once the commit has succeeded, and their failures are logged rather than
//! returned: the data is already durable.
//!
//! A commit that loses an optimistic concurrency check is retried from the
//! top, callback included, up to `transaction_max_attempts` times.

use tracing::{debug, warn};

use crate::errors::{RepoError, RepoResult};
use crate::hooks::HookRegistry;
use crate::model::Entity;
use crate::repository::Repository;
use crate::store::BoxFuture;

use super::context::{PostCommit, TransactionContext};

impl<T: Entity> Repository<T> {
    /// Run `callback` atomically.
    ///
    /// Inside the callback every `get` (and every `delete`, which reads) must
    /// happen before the first write. The callback's error, or any commit
    /// error, leaves the store untouched and no after-hooks run.
    ///
    /// ```ignore
    /// let moved = repo
    ///     .run_in_transaction(|tx| {
    ///         Box::pin(async move {
    ///             let from = tx.get("a").await?;
    ///             tx.update("a", Patch::new().set("balance", json!(0))).await?;
    ///             Ok(from)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_in_transaction<R, F>(&self, mut callback: F) -> RepoResult<R>
    where
        R: Send,
        F: for<'c> FnMut(&'c mut TransactionContext<T>) -> BoxFuture<'c, RepoResult<R>> + Send,
    {
        let max_attempts = self.config().transaction_max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut ctx = TransactionContext::new(
                self.collection().to_string(),
                self.store().clone(),
                self.gate().clone(),
                self.hooks().clone(),
                self.config().path_delimiter,
            );

            let value = callback(&mut ctx).await?;
            let post_commit = ctx.flush()?;
            let writes = post_commit.len();

            match ctx.commit().await {
                Ok(()) => {
                    debug!(collection = self.collection(), attempt, writes, "transaction committed");
                    run_post_commit(self.hooks(), post_commit).await;
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        collection = self.collection(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "transaction contention; retrying"
                    );
                }
                Err(e) => return Err(RepoError::from(e)),
            }
        }
    }
}

/// Fire owed after-hooks in write order. A failing hook is logged and the
/// rest still run.
async fn run_post_commit<T: Entity>(hooks: &HookRegistry<T>, post_commit: Vec<PostCommit<T>>) {
    for (event, payload) in post_commit {
        if let Err(e) = hooks.fire(event, payload).await {
            warn!(event = event.as_str(), error = %e, "post-commit hook failed");
        }
    }
}
