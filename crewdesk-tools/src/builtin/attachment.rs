//! Read previously uploaded or generated attachments by file id.

use async_trait::async_trait;
use base64::Engine;
use crewdesk_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::builtin::{RiskClass, Tool};
use crate::context::ToolCtx;
use crate::schema::{truncate_chars, SchemaBuilder};

#[derive(Debug, Deserialize)]
struct AttachmentReadArgs {
    file_id: String,
}

fn looks_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("json")
        || ct.contains("xml")
        || ct.contains("yaml")
        || ct.contains("javascript")
        || ct.contains("html")
        || ct.contains("csv")
        || ct.contains("markdown")
}

/// Read an attachment from the same team.
///
/// Textual content comes back as a string (truncated to the file-read
/// budget); binary content as base64 with an `encoding` marker.
pub struct AttachmentReadTool;

#[async_trait]
impl Tool for AttachmentReadTool {
    fn name(&self) -> &'static str {
        "attachment_read"
    }

    fn description(&self) -> &'static str {
        "Read a chat attachment by file_id (text returned directly, binary as base64)"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::Reader
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("file_id", json!({"type": "string", "minLength": 1}))
            .required("file_id")
            .build()
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let args: AttachmentReadArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("attachment_read", e.to_string()))?;

        let content = ctx
            .artifacts
            .read(&args.file_id, ctx.team_id)
            .await
            .map_err(ToolError::failed)?;

        if looks_textual(&content.content_type) {
            if let Ok(text) = String::from_utf8(content.bytes.clone()) {
                return Ok(json!({
                    "file_id": args.file_id,
                    "filename": content.filename,
                    "content_type": content.content_type,
                    "text": truncate_chars(&text, ctx.limits.max_file_read_chars),
                }));
            }
        }
        // Fall back to utf-8 detection for unlabeled uploads.
        if content.content_type.is_empty() {
            if let Ok(text) = String::from_utf8(content.bytes.clone()) {
                return Ok(json!({
                    "file_id": args.file_id,
                    "filename": content.filename,
                    "content_type": "text/plain",
                    "text": truncate_chars(&text, ctx.limits.max_file_read_chars),
                }));
            }
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&content.bytes);
        Ok(json!({
            "file_id": args.file_id,
            "filename": content.filename,
            "content_type": content.content_type,
            "encoding": "base64",
            "data": truncate_chars(&encoded, ctx.limits.max_file_read_chars),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_with_caps;
    use crewdesk_core::policy::CapabilitySet;

    #[tokio::test]
    async fn test_text_attachment_returns_text() {
        let ctx = ctx_with_caps(CapabilitySet::NONE);
        let out = AttachmentReadTool
            .call(json!({"file_id": "known.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["text"], "attached text");
        assert!(out.get("data").is_none());
    }

    #[tokio::test]
    async fn test_binary_attachment_returns_base64() {
        let ctx = ctx_with_caps(CapabilitySet::NONE);
        let out = AttachmentReadTool
            .call(json!({"file_id": "known.bin"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["encoding"], "base64");
        let data = out["data"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(data).unwrap();
        assert_eq!(decoded, vec![0u8, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_missing_attachment_is_tool_error() {
        let ctx = ctx_with_caps(CapabilitySet::NONE);
        let err = AttachmentReadTool
            .call(json!({"file_id": "ghost.pdf"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_textual_detection() {
        assert!(looks_textual("text/plain"));
        assert!(looks_textual("application/json"));
        assert!(looks_textual("image/svg+xml"));
        assert!(!looks_textual("application/pdf"));
        assert!(!looks_textual("image/png"));
    }
}
