//! Tool registry and dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crewdesk_core::agent::ToolDispatcher;
use crewdesk_core::error::ToolError;
use crewdesk_core::provider::ToolSchema;
use jsonschema::Validator;
use serde_json::Value;

use crate::builtin::Tool;
use crate::context::ToolCtx;

/// Catalog of declared tools with compiled input validators.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    validators: HashMap<String, Validator>,
    /// Registration order, for a stable provider-facing catalog.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            validators: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Ok(validator) = Validator::new(&tool.input_schema()) {
            self.validators.insert(name.clone(), validator);
        }
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Provider-facing schemas, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.input_schema(),
            })
            .collect()
    }

    /// Validate parsed arguments against a tool's schema.
    pub fn validate(&self, name: &str, args: &Value) -> Result<(), ToolError> {
        if !self.tools.contains_key(name) {
            return Err(ToolError::not_found(name));
        }
        if let Some(validator) = self.validators.get(name) {
            let errors: Vec<String> = match validator.validate(args) {
                Ok(()) => Vec::new(),
                Err(iter) => iter
                    .map(|e| format!("{}: {}", e.instance_path, e))
                    .collect(),
            };
            if !errors.is_empty() {
                return Err(ToolError::invalid_arguments(name, errors.join("; ")));
            }
        }
        Ok(())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a registry to one turn's context and implements the loop's
/// dispatch surface.
pub struct RegistryDispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ToolCtx,
}

impl RegistryDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolCtx) -> Self {
        Self { registry, ctx }
    }
}

#[async_trait]
impl ToolDispatcher for RegistryDispatcher {
    fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    async fn dispatch(&self, name: &str, args_json: &str) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::not_found(name))?;

        let args: Value = serde_json::from_str(if args_json.trim().is_empty() {
            "{}"
        } else {
            args_json
        })
        .map_err(|e| ToolError::invalid_arguments(name, e.to_string()))?;

        self.registry.validate(name, &args)?;

        // Capability enforcement happens before the handler runs, so a
        // denied call has no side effects.
        if !tool.risk().permitted(self.ctx.effective) {
            return Err(ToolError::disabled(name));
        }

        let timeout: Duration = tool.timeout();
        let timeout_ms = timeout.as_millis() as u64;
        tracing::debug!(tool = name, "dispatching tool call");
        tokio::time::timeout(timeout, tool.call(args, &self.ctx))
            .await
            .map_err(|_| ToolError::timeout(name, timeout_ms))?
    }
}
