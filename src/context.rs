use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;

use crate::document::Node;
use crate::error::CfnPlusError;
use crate::objectstore::ObjectStoreClient;
use crate::processor::TemplateResult;
use crate::provisioner::ProvisionerClient;

/// A processed-template cache keyed on (template text, relevant context
/// fields). Shared by reference across every `Context` descended from one
/// top-level invocation, never across invocations — mirrors the teacher's
/// `Arc<DashMap<...>>` sharing pattern for cross-resource state.
pub type SubTemplateCache = Arc<DashMap<String, String>>;

/// Recurses into the top-level processor to evaluate an imported
/// sub-template. Boxed so `Context` doesn't need to know the processor's
/// concrete type — this is what breaks the context/processor reference
/// cycle the source language expresses directly.
pub type ProcessFn = Arc<
    dyn Fn(String, Context) -> Pin<Box<dyn Future<Output = Result<TemplateResult>> + Send>>
        + Send
        + Sync,
>;

/// Layered symbol table plus ambient state threaded through evaluation.
/// Cheap to `clone`: the symbol table is duplicated but the sub-template
/// cache and process function are shared by reference.
#[derive(Clone)]
pub struct Context {
    symbols: HashMap<String, Node>,
    pub region: Option<String>,
    pub stack_name: Option<String>,
    pub template_path: Option<String>,
    pub resource_name: Option<String>,
    pub template_is_imported: bool,
    pub sub_template_cache: SubTemplateCache,
    pub process_fn: ProcessFn,
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub provisioner: Arc<dyn ProvisionerClient>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbols: HashMap<String, Node>,
        region: Option<String>,
        template_path: Option<String>,
        stack_name: Option<String>,
        process_fn: ProcessFn,
        object_store: Arc<dyn ObjectStoreClient>,
        provisioner: Arc<dyn ProvisionerClient>,
    ) -> Self {
        Context {
            symbols,
            region,
            stack_name,
            template_path,
            resource_name: None,
            template_is_imported: false,
            sub_template_cache: Arc::new(DashMap::new()),
            process_fn,
            object_store,
            provisioner,
        }
    }

    /// Resolve a symbol: caller-supplied/local bindings first, then the
    /// built-in pseudo-parameters.
    pub fn resolve_var(&self, name: &str) -> Result<Node> {
        if let Some(v) = self.symbols.get(name) {
            return Ok(v.clone());
        }
        match name {
            "AWS::Region" if self.region.is_some() => {
                Ok(Node::String(self.region.clone().unwrap()))
            }
            "AWS::StackName" if self.stack_name.is_some() => {
                Ok(Node::String(self.stack_name.clone().unwrap()))
            }
            _ => Err(CfnPlusError::invalid_template(format!(
                "Cannot resolve variable \"{}\"",
                name
            ))),
        }
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Node) {
        self.symbols.insert(name.into(), value);
    }

    /// Resolve a path relative to the current template's directory.
    pub fn abspath(&self, rel_path: &str) -> Result<std::path::PathBuf> {
        let template_path = self.template_path.as_ref().ok_or_else(|| {
            CfnPlusError::invalid_template("template path is required to resolve relative paths")
        })?;
        let dir = std::path::Path::new(template_path)
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."));
        Ok(dir.join(rel_path))
    }

    /// Cache key for sub-template memoisation: the template text plus the
    /// context fields that influence its evaluation. Symbol keys are
    /// sorted so structurally-equal contexts hash identically regardless
    /// of insertion order.
    pub fn cache_key(&self, template_text: &str) -> String {
        let mut symbol_keys: Vec<&String> = self.symbols.keys().collect();
        symbol_keys.sort();
        let symbols_repr: Vec<String> = symbol_keys
            .into_iter()
            .map(|k| format!("{}={:?}", k, self.symbols.get(k)))
            .collect();
        format!(
            "{}|{:?}|{:?}|{:?}|{}|[{}]",
            template_text,
            self.region,
            self.stack_name,
            self.template_is_imported,
            self.template_path.as_deref().unwrap_or(""),
            symbols_repr.join(",")
        )
    }
}
