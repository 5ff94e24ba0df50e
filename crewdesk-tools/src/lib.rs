//! crewdesk-tools - tool registry and built-in tools.
//!
//! Tools are a closed set declared with a name, a risk class, a JSON input
//! schema, and a handler. The registry compiles a schema validator per tool
//! and the dispatcher enforces, in order: existence, argument validity, the
//! turn's capability set, and the tool's timeout. Capability denial happens
//! before any side effect and is reported inside the event stream, never as
//! a transport failure.

pub mod artifacts;
pub mod builtin;
pub mod context;
pub mod registry;
pub mod schema;

pub use artifacts::{ArtifactContent, ArtifactRegistrar, NewArtifact, RegisteredArtifact};
pub use builtin::browser::BrowserService;
pub use builtin::docs::{DocumentRenderer, HtmlDocumentRenderer, RenderedDocument};
pub use builtin::{RiskClass, Tool};
pub use context::{ToolCtx, ToolLimits};
pub use registry::{RegistryDispatcher, ToolRegistry};

use std::sync::Arc;

/// Build the full tool catalog.
///
/// Every tool is always registered and advertised; the capability policy is
/// enforced at dispatch time so a disabled tool still answers with a
/// structured `disabled` error instead of vanishing mid-session.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(builtin::fs::FsListTool));
    registry.register(Arc::new(builtin::fs::FsReadTool));
    registry.register(Arc::new(builtin::fs::FsWriteTool));
    registry.register(Arc::new(builtin::shell::ShellRunTool));
    registry.register(Arc::new(builtin::attachment::AttachmentReadTool));
    registry.register(Arc::new(builtin::docs::DocPptxCreateTool));
    registry.register(Arc::new(builtin::docs::DocQuoteDocxCreateTool));
    registry.register(Arc::new(builtin::docs::DocQuoteXlsxCreateTool));
    registry.register(Arc::new(builtin::docs::DocInspectionDocxCreateTool));
    registry.register(Arc::new(builtin::docs::DocInspectionXlsxCreateTool));
    registry.register(Arc::new(builtin::proto::ProtoGenerateTool));
    registry.register(Arc::new(builtin::browser::BrowserStartTool));
    registry.register(Arc::new(builtin::browser::BrowserNavigateTool));
    registry.register(Arc::new(builtin::browser::BrowserScreenshotTool));
    registry
}
