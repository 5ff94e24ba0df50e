//! Filesystem tools: fs_list, fs_read, fs_write.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use crewdesk_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::builtin::{RiskClass, Tool};
use crate::context::ToolCtx;
use crate::schema::{truncate_chars, SchemaBuilder};

const MAX_DEPTH: u64 = 5;
const MAX_ENTRIES: u64 = 5000;

#[derive(Debug, Deserialize)]
struct FsListArgs {
    #[serde(default = "default_path")]
    path: String,
    #[serde(default = "default_depth")]
    depth: u64,
    #[serde(default = "default_max_entries")]
    max_entries: u64,
}

fn default_path() -> String {
    ".".to_string()
}

fn default_depth() -> u64 {
    2
}

fn default_max_entries() -> u64 {
    500
}

#[derive(Debug, Deserialize)]
struct FsReadArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FsWriteArgs {
    path: String,
    content: String,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "overwrite".to_string()
}

/// Depth-first listing, directories first, case-insensitive by name.
fn list_dir_recursive(base: &Path, depth: u64, max_entries: usize, prefix: &str, lines: &mut Vec<String>) {
    if lines.len() >= max_entries {
        return;
    }
    let Ok(read) = std::fs::read_dir(base) else {
        return;
    };
    let mut entries: Vec<_> = read.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| {
        let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
        (!is_dir, e.file_name().to_string_lossy().to_lowercase())
    });

    for entry in entries {
        if lines.len() >= max_entries {
            break;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let marker = if is_dir { "/" } else { "" };
        lines.push(format!("{prefix}{name}{marker}"));
        if is_dir && depth > 0 {
            list_dir_recursive(
                &entry.path(),
                depth - 1,
                max_entries,
                &format!("{prefix}{name}/"),
                lines,
            );
        }
    }
}

/// List the workspace directory tree.
pub struct FsListTool;

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &'static str {
        "fs_list"
    }

    fn description(&self) -> &'static str {
        "List the workspace directory tree (to understand the file layout)"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::Reader
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("path", json!({"type": "string", "default": "."}))
            .property(
                "depth",
                json!({"type": "integer", "minimum": 0, "maximum": MAX_DEPTH, "default": 2}),
            )
            .property(
                "max_entries",
                json!({"type": "integer", "minimum": 1, "maximum": MAX_ENTRIES, "default": 500}),
            )
            .build()
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let args: FsListArgs =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments("fs_list", e.to_string()))?;
        let full = ctx
            .workspace
            .resolve(&args.path)
            .map_err(ToolError::failed)?;

        let base = full.clone();
        let depth = args.depth.min(MAX_DEPTH);
        let max_entries = args.max_entries.min(MAX_ENTRIES) as usize;
        let lines = tokio::task::spawn_blocking(move || {
            let mut lines = Vec::new();
            list_dir_recursive(&base, depth, max_entries, "", &mut lines);
            lines
        })
        .await
        .map_err(|e| ToolError::failed(e))?;

        Ok(Value::String(lines.join("\n")))
    }
}

/// Read a UTF-8 text file within the workspace.
pub struct FsReadTool;

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &'static str {
        "fs_read"
    }

    fn description(&self) -> &'static str {
        "Read a text file inside the workspace"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::Reader
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("path", json!({"type": "string", "minLength": 1}))
            .required("path")
            .build()
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let args: FsReadArgs =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments("fs_read", e.to_string()))?;
        let full = ctx
            .workspace
            .resolve(&args.path)
            .map_err(ToolError::failed)?;

        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ToolError::failed(format!("read {}: {e}", args.path)))?;
        Ok(Value::String(truncate_chars(
            &content,
            ctx.limits.max_file_read_chars,
        )))
    }
}

/// Write a text file within the workspace. Gated by the write capability.
pub struct FsWriteTool;

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &'static str {
        "fs_write"
    }

    fn description(&self) -> &'static str {
        "Write a text file inside the workspace (disabled unless the write capability is on)"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::DangerousWrite
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("path", json!({"type": "string", "minLength": 1}))
            .property("content", json!({"type": "string"}))
            .property(
                "mode",
                json!({"type": "string", "enum": ["overwrite", "append"], "default": "overwrite"}),
            )
            .required("path")
            .required("content")
            .build()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let args: FsWriteArgs =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments("fs_write", e.to_string()))?;
        let full = ctx
            .workspace
            .resolve(&args.path)
            .map_err(ToolError::failed)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::failed(e))?;
        }

        if args.mode == "append" {
            let existing = tokio::fs::read_to_string(&full).await.unwrap_or_default();
            tokio::fs::write(&full, existing + &args.content)
                .await
                .map_err(|e| ToolError::failed(e))?;
        } else {
            tokio::fs::write(&full, &args.content)
                .await
                .map_err(|e| ToolError::failed(e))?;
        }

        Ok(json!({"ok": true, "path": args.path, "mode": args.mode}))
    }
}
