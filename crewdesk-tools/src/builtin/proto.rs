//! Prototype generator: a clickable multi-page HTML bundle.

use async_trait::async_trait;
use crewdesk_core::error::ToolError;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::artifacts::NewArtifact;
use crate::builtin::docs::{mirror_output_to_workspace, slugify};
use crate::builtin::{RiskClass, Tool};
use crate::context::ToolCtx;
use crate::schema::SchemaBuilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoPage {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoPayload {
    pub project_name: String,
    pub pages: Vec<ProtoPage>,
}

const PROTO_CSS: &str = "body{font-family:system-ui,sans-serif;margin:0;display:flex;min-height:100vh}nav{width:16rem;background:#1d2733;color:#dde;padding:1.5rem}nav a{display:block;color:#9cf;margin:.4rem 0;text-decoration:none}main{flex:1;padding:2rem}header{border-bottom:1px solid #ddd;margin-bottom:1rem}.placeholder{border:2px dashed #bbb;border-radius:8px;padding:3rem;text-align:center;color:#888;margin:1rem 0}";

fn page_file_name(index: usize, title: &str) -> String {
    format!("page-{:02}-{}.html", index + 1, slugify(title, "page"))
}

fn nav_html(payload: &ProtoPayload) -> String {
    let mut nav = format!("<nav><h2>{}</h2><a href=\"index.html\">Overview</a>", payload.project_name);
    for (i, page) in payload.pages.iter().enumerate() {
        nav.push_str(&format!(
            "<a href=\"{}\">{}</a>",
            page_file_name(i, &page.title),
            page.title
        ));
    }
    nav.push_str("</nav>");
    nav
}

fn render_page(payload: &ProtoPayload, index: Option<usize>) -> String {
    let nav = nav_html(payload);
    let (title, body) = match index {
        None => (
            payload.project_name.clone(),
            format!(
                "<header><h1>{}</h1></header><p>Prototype with {} pages. Use the navigation to browse.</p>",
                payload.project_name,
                payload.pages.len()
            ),
        ),
        Some(i) => {
            let page = &payload.pages[i];
            let desc = page
                .description
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| format!("<p>{d}</p>"))
                .unwrap_or_default();
            (
                page.title.clone(),
                format!(
                    "<header><h1>{}</h1></header>{desc}<div class=\"placeholder\">Content area</div><div class=\"placeholder\">Actions</div>",
                    page.title
                ),
            )
        }
    };
    format!(
        "<!doctype html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"><title>{title}</title><style>{PROTO_CSS}</style></head><body>{nav}<main>{body}</main></body></html>\n"
    )
}

fn append_file(
    archive: &mut tar::Builder<GzEncoder<Vec<u8>>>,
    name: String,
    content: String,
) -> Result<(), ToolError> {
    let bytes = content.into_bytes();
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive
        .append_data(&mut header, name, bytes.as_slice())
        .map_err(|e| ToolError::failed(e))
}

/// Bundle the rendered pages into a gzipped tarball.
fn build_bundle(payload: &ProtoPayload) -> Result<Vec<u8>, ToolError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);

    append_file(&mut archive, "index.html".to_string(), render_page(payload, None))?;
    for (i, page) in payload.pages.iter().enumerate() {
        append_file(
            &mut archive,
            page_file_name(i, &page.title),
            render_page(payload, Some(i)),
        )?;
    }

    let encoder = archive.into_inner().map_err(|e| ToolError::failed(e))?;
    encoder.finish().map_err(|e| ToolError::failed(e))
}

/// Generate an HTML prototype bundle and register it as an artifact.
pub struct ProtoGenerateTool;

#[async_trait]
impl Tool for ProtoGenerateTool {
    fn name(&self) -> &'static str {
        "proto_generate"
    }

    fn description(&self) -> &'static str {
        "Generate a clickable HTML prototype bundle (tar.gz) and return its download link"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::Generator
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("project_name", json!({"type": "string", "minLength": 1}))
            .property(
                "pages",
                json!({
                    "type": "array",
                    "minItems": 1,
                    "maxItems": 40,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "title": {"type": "string", "minLength": 1},
                            "description": {"type": "string"},
                        },
                        "required": ["title"],
                    },
                }),
            )
            .required("project_name")
            .required("pages")
            .build()
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let payload: ProtoPayload = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("proto_generate", e.to_string()))?;

        let bytes = build_bundle(&payload)?;
        let filename = format!("{}.tar.gz", slugify(&payload.project_name, "prototype"));

        let registered = ctx
            .artifacts
            .register(NewArtifact {
                kind: "generated".to_string(),
                filename: filename.clone(),
                content_type: "application/gzip".to_string(),
                bytes: bytes.clone(),
                team_id: ctx.team_id,
                user_id: ctx.user_id,
                session_id: ctx.session_id.clone(),
                project_id: ctx.project_id,
            })
            .await
            .map_err(ToolError::failed)?;

        let payload_json = serde_json::to_value(&payload).unwrap_or(Value::Null);
        let workspace_path = mirror_output_to_workspace(
            ctx,
            &registered,
            &bytes,
            "prototype",
            &payload.project_name,
            &payload_json,
            "tool:proto_generate",
        )
        .await;

        let mut meta = json!({
            "file_id": registered.file_id,
            "filename": registered.filename,
            "content_type": registered.content_type,
            "size_bytes": registered.size_bytes,
            "download_url": registered.download_url,
            "pages": payload.pages.len(),
        });
        if let Some(preview) = registered.preview_url {
            meta["preview_url"] = Value::String(preview);
        }
        if let Some(path) = workspace_path {
            meta["workspace_path"] = Value::String(path);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_in_workspace;
    use crewdesk_core::policy::CapabilitySet;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    fn payload() -> ProtoPayload {
        ProtoPayload {
            project_name: "Fleet Console".to_string(),
            pages: vec![
                ProtoPage {
                    title: "Dashboard".to_string(),
                    description: Some("Live overview".to_string()),
                },
                ProtoPage {
                    title: "Devices".to_string(),
                    description: None,
                },
            ],
        }
    }

    #[test]
    fn test_bundle_contains_all_pages() {
        let bytes = build_bundle(&payload()).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"index.html".to_string()));
        assert_eq!(names.len(), 3);
        assert!(names.iter().any(|n| n.contains("dashboard")));
    }

    #[test]
    fn test_pages_link_each_other() {
        let html = render_page(&payload(), Some(0));
        assert!(html.contains("index.html"));
        assert!(html.contains("page-02-devices.html"));
        assert!(html.contains("Live overview"));
    }

    #[tokio::test]
    async fn test_proto_generate_registers_bundle() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_in_workspace(CapabilitySet::NONE, dir.path().to_path_buf());
        let meta = ProtoGenerateTool
            .call(
                json!({"project_name": "Fleet Console", "pages": [{"title": "Dashboard"}]}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(meta["file_id"].as_str().unwrap().ends_with(".gz"));
        assert_eq!(meta["pages"], 1);
    }
}
