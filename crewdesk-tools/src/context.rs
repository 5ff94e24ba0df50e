//! Per-turn tool context.

use std::sync::Arc;

use crewdesk_core::policy::CapabilitySet;
use crewdesk_core::sandbox::WorkspaceSandbox;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactRegistrar;
use crate::builtin::browser::BrowserService;
use crate::builtin::docs::DocumentRenderer;

/// Output-size budgets carried into every handler.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    pub max_file_read_chars: usize,
    pub max_tool_output_chars: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_file_read_chars: 120_000,
            max_tool_output_chars: 12_000,
        }
    }
}

/// Everything a tool handler may touch for one turn.
///
/// The workspace root and capability set are fixed at turn entry; because
/// turns are serialized per session, handlers never observe an intra-turn
/// change.
#[derive(Clone)]
pub struct ToolCtx {
    pub team_id: i64,
    pub user_id: i64,
    pub session_id: Option<String>,
    pub project_id: Option<i64>,
    pub workspace: WorkspaceSandbox,
    pub effective: CapabilitySet,
    pub limits: ToolLimits,
    pub artifacts: Arc<dyn ArtifactRegistrar>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub browser: Arc<BrowserService>,
    /// Cooperative cancellation; long-running handlers race against it.
    pub cancel: CancellationToken,
}
