//! Built-in tools.
//!
//! Each tool declares its name, description, risk class, and JSON input
//! schema, and implements an async handler over the per-turn [`ToolCtx`].

pub mod attachment;
pub mod browser;
pub mod docs;
pub mod fs;
pub mod proto;
pub mod shell;

use std::time::Duration;

use async_trait::async_trait;
use crewdesk_core::error::ToolError;
use crewdesk_core::policy::CapabilitySet;
use serde_json::Value;

use crate::context::ToolCtx;

/// Risk classification deciding which capability bit gates a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskClass {
    /// Read-only access to workspace or prior artifacts.
    Reader,
    /// Produces artifacts through the artifact store; allowed even without
    /// the write capability.
    Generator,
    /// Arbitrary command execution; gated by `shell`.
    DangerousShell,
    /// Writes into the workspace; gated by `write`.
    DangerousWrite,
    /// Drives a browser; gated by `browser`.
    DangerousBrowser,
}

impl RiskClass {
    /// Whether the effective capability set permits this class.
    pub fn permitted(self, caps: CapabilitySet) -> bool {
        match self {
            Self::Reader | Self::Generator => true,
            Self::DangerousShell => caps.shell,
            Self::DangerousWrite => caps.write,
            Self::DangerousBrowser => caps.browser,
        }
    }
}

/// A declared, dispatchable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn risk(&self) -> RiskClass;

    /// JSON Schema for the arguments object.
    fn input_schema(&self) -> Value;

    /// Dispatch-level timeout; handlers with their own internal timeouts
    /// set this above their worst case.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_and_generator_always_permitted() {
        assert!(RiskClass::Reader.permitted(CapabilitySet::NONE));
        assert!(RiskClass::Generator.permitted(CapabilitySet::NONE));
    }

    #[test]
    fn test_dangerous_classes_follow_their_bit() {
        let write_only = CapabilitySet {
            write: true,
            ..CapabilitySet::NONE
        };
        assert!(RiskClass::DangerousWrite.permitted(write_only));
        assert!(!RiskClass::DangerousShell.permitted(write_only));
        assert!(!RiskClass::DangerousBrowser.permitted(write_only));
    }
}
