//! The transactional driver: runs the before/after action phases and
//! guarantees LIFO undo on failure, commit-draining on success.

use anyhow::Result;

use crate::context::Context;
use crate::objectstore::{Action, Compensator};

/// Owns one template-processing result's action lists and drives their
/// execution. Construction does not run anything; the caller must invoke
/// [`TransactionDriver::do_before`], perform the provisioning call, then
/// invoke [`TransactionDriver::do_after`]. `Drop` provides the
/// destructor-on-all-paths guarantee: it drains committers on a clean
/// finish, or runs LIFO undo if a failure was observed first.
pub struct TransactionDriver {
    before: Vec<Action>,
    after: Vec<Action>,
    undoers: Vec<Compensator>,
    committers: Vec<Compensator>,
    failed: bool,
    after_phase_started: bool,
}

impl TransactionDriver {
    pub fn new(before: Vec<Action>, after: Vec<Action>) -> Self {
        TransactionDriver {
            before,
            after,
            undoers: Vec::new(),
            committers: Vec::new(),
            failed: false,
            after_phase_started: false,
        }
    }

    /// Runs every `before[]` action in order, growing `undoers`/`committers`.
    pub async fn do_before(&mut self, ctx: &Context) -> Result<()> {
        let actions = std::mem::take(&mut self.before);
        let result = run_actions(&actions, ctx, &mut self.undoers, &mut self.committers).await;
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Drains `committers` (pre-provisioning effects are now durable),
    /// resets both lists, then runs every `after[]` action in order.
    pub async fn do_after(&mut self, ctx: &Context) -> Result<()> {
        self.after_phase_started = true;
        drain_committers(&mut self.committers, ctx).await;
        self.undoers.clear();

        let actions = std::mem::take(&mut self.after);
        let result = run_actions(&actions, ctx, &mut self.undoers, &mut self.committers).await;
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Mark the transaction as failed without running an action — used by
    /// the caller when the provisioning call between `do_before` and
    /// `do_after` itself fails.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Finalise the transaction: drain remaining committers on success, or
    /// run LIFO undo (swallowing undo failures) on failure. Must be called
    /// explicitly because undo/commit need the object-store client, which
    /// `Drop` cannot await.
    pub async fn finish(mut self, ctx: &Context) {
        if self.failed {
            tracing::info!("Undoing actions");
            while let Some(undoer) = self.undoers.pop() {
                tracing::warn!("Undoing action");
                if let Err(err) = undoer.invoke(ctx.object_store.as_ref()).await {
                    tracing::warn!(error = %err, "undo failed, continuing best-effort rollback");
                }
            }
        } else {
            drain_committers(&mut self.committers, ctx).await;
        }
    }
}

impl Drop for TransactionDriver {
    fn drop(&mut self) {
        if !self.undoers.is_empty() || !self.committers.is_empty() {
            tracing::warn!(
                "TransactionDriver dropped with {} pending undoer(s) and {} pending committer(s) \
                 without finish() being called",
                self.undoers.len(),
                self.committers.len()
            );
        }
    }
}

async fn run_actions(
    actions: &[Action],
    ctx: &Context,
    undoers: &mut Vec<Compensator>,
    committers: &mut Vec<Compensator>,
) -> Result<()> {
    for action in actions {
        action
            .execute(ctx.object_store.as_ref(), ctx.provisioner.as_ref(), undoers, committers)
            .await?;
    }
    Ok(())
}

async fn drain_committers(committers: &mut Vec<Compensator>, ctx: &Context) {
    for committer in committers.drain(..) {
        tracing::debug!("Committing action");
        if let Err(err) = committer.invoke(ctx.object_store.as_ref()).await {
            tracing::warn!(error = %err, "commit failed, leaving superseded version in place");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::ObjectStoreClient;
    use crate::objectstore_demo::InMemoryObjectStore;
    use crate::provisioner::NullProvisionerClient;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_ctx(store: Arc<InMemoryObjectStore>) -> Context {
        Context::new(
            HashMap::new(),
            None,
            None,
            None,
            Arc::new(|_, _| Box::pin(async { unreachable!() })),
            store,
            Arc::new(NullProvisionerClient),
        )
    }

    #[tokio::test]
    async fn failure_in_before_phase_undoes_in_lifo_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("b", true);
        let ctx = test_ctx(store.clone());

        let before = vec![
            Action::UploadObject { bucket: "b".into(), key: "o1".into(), content: b"1".to_vec() },
            Action::UploadObject { bucket: "b".into(), key: "o2".into(), content: b"2".to_vec() },
        ];
        let mut driver = TransactionDriver::new(before, vec![]);
        driver.do_before(&ctx).await.unwrap();
        assert!(store.current_body("b", "o1").is_some());
        assert!(store.current_body("b", "o2").is_some());

        driver.mark_failed();
        driver.finish(&ctx).await;

        assert!(store.current_body("b", "o1").is_none());
        assert!(store.current_body("b", "o2").is_none());
    }

    #[tokio::test]
    async fn success_drains_committers_and_keeps_final_state() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("b", true);
        let ctx = test_ctx(store.clone());

        // Upload an initial version so the second upload produces a committer.
        store.put_object("b", "o1", b"old", HashMap::new()).await.unwrap();

        let before = vec![Action::UploadObject { bucket: "b".into(), key: "o1".into(), content: b"new".to_vec() }];
        let mut driver = TransactionDriver::new(before, vec![]);
        driver.do_before(&ctx).await.unwrap();
        driver.do_after(&ctx).await.unwrap();
        driver.finish(&ctx).await;

        assert_eq!(store.current_body("b", "o1"), Some(b"new".to_vec()));
        assert_eq!(store.surviving_versions("b", "o1").len(), 1);
    }
}
