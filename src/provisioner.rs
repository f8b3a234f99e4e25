//! The cloud provisioner client boundary (§6): the consumed-capability
//! subset the core needs. Stack create/update/rollback themselves stay
//! entirely on the caller's side, between `do_before` and `do_after`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait ProvisionerClient: Send + Sync {
    /// Resolve a cross-stack export by name, paginating internally.
    /// `Ok(None)` means no such export exists.
    async fn resolve_export(&self, name: &str) -> Result<Option<String>>;

    /// Install a stack policy document (already-serialised JSON).
    async fn set_stack_policy(&self, stack_name: &str, policy_json: &str) -> Result<()>;
}

/// A provisioner double for evaluation that never needs imports or stack
/// policies resolved — every `Fn::ImportValue`/`StackPolicy` call fails.
/// Used in unit tests that exercise unrelated expression forms.
#[derive(Default)]
pub struct NullProvisionerClient;

#[async_trait]
impl ProvisionerClient for NullProvisionerClient {
    async fn resolve_export(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_stack_policy(&self, _stack_name: &str, _policy_json: &str) -> Result<()> {
        anyhow::bail!("NullProvisionerClient cannot set stack policies")
    }
}

/// A fixed in-memory export table, useful for tests that exercise
/// `Fn::ImportValue`.
pub struct FixedExportsProvisionerClient {
    exports: HashMap<String, String>,
}

impl FixedExportsProvisionerClient {
    pub fn new(exports: HashMap<String, String>) -> Self {
        FixedExportsProvisionerClient { exports }
    }
}

#[async_trait]
impl ProvisionerClient for FixedExportsProvisionerClient {
    async fn resolve_export(&self, name: &str) -> Result<Option<String>> {
        Ok(self.exports.get(name).cloned())
    }

    async fn set_stack_policy(&self, stack_name: &str, policy_json: &str) -> Result<()> {
        tracing::info!(stack = %stack_name, policy = %policy_json, "set_stack_policy (fixed test double)");
        Ok(())
    }
}
