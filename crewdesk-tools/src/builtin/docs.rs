//! Document generator tools.
//!
//! The actual binary encoders (PPTX/DOCX/XLSX writers) are an external
//! capability behind [`DocumentRenderer`]; the in-tree renderer produces
//! self-contained HTML documents. Generator tools are permitted regardless
//! of the write capability - they only produce artifacts through the
//! artifact store, never workspace writes.

use async_trait::async_trait;
use chrono::Utc;
use crewdesk_core::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::artifacts::{NewArtifact, RegisteredArtifact};
use crate::builtin::{RiskClass, Tool};
use crate::context::ToolCtx;
use crate::schema::SchemaBuilder;

// ===========================================================================
// Payloads
// ===========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PptSlide {
    pub title: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PptPayload {
    pub title: String,
    pub slides: Vec<PptSlide>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub layout_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteItem {
    pub name: String,
    /// Zero is allowed as a placeholder for missing quantities.
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_unit() -> String {
    "unit".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotePayload {
    pub seller: String,
    pub buyer: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub items: Vec<QuoteItem>,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_currency() -> String {
    "CNY".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionItem {
    pub name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub remark: Option<String>,
}

fn default_inspection_items() -> Vec<InspectionItem> {
    [
        "Appearance and packaging",
        "Labeling and traceability (nameplate/SN/QR)",
        "Power-on self test",
        "Sensing accuracy (if applicable)",
        "Network registration and connection stability",
        "Platform integration (MQTT/HTTP/CoAP)",
        "Remote configuration / OTA upgrade",
        "Alarm and event reporting",
        "Power consumption (if applicable)",
        "Security (TLS/certificates/keys/weak passwords)",
        "Other",
    ]
    .iter()
    .map(|name| InspectionItem {
        name: name.to_string(),
        result: String::new(),
        remark: None,
    })
    .collect()
}

fn default_inspection_title() -> String {
    "Device inspection sheet".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionPayload {
    #[serde(default = "default_inspection_title")]
    pub title: String,
    #[serde(default)]
    pub basic_info: Map<String, Value>,
    #[serde(default)]
    pub device_info: Map<String, Value>,
    #[serde(default)]
    pub network_info: Map<String, Value>,
    #[serde(default = "default_inspection_items")]
    pub inspection_items: Vec<InspectionItem>,
    #[serde(default)]
    pub conclusion: Map<String, Value>,
    #[serde(default)]
    pub signatures: Map<String, Value>,
}

/// One render request, tagged by target document kind.
#[derive(Debug, Clone)]
pub enum DocRequest {
    Pptx(PptPayload),
    QuoteDocx(QuotePayload),
    QuoteXlsx(QuotePayload),
    InspectionDocx(InspectionPayload),
    InspectionXlsx(InspectionPayload),
}

impl DocRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pptx(_) => "pptx",
            Self::QuoteDocx(_) => "quote_docx",
            Self::QuoteXlsx(_) => "quote_xlsx",
            Self::InspectionDocx(_) => "inspection_docx",
            Self::InspectionXlsx(_) => "inspection_xlsx",
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Pptx(p) => p.title.clone(),
            Self::QuoteDocx(_) | Self::QuoteXlsx(_) => "Quotation".to_string(),
            Self::InspectionDocx(p) | Self::InspectionXlsx(p) => p.title.clone(),
        }
    }

    fn payload_json(&self) -> Value {
        match self {
            Self::Pptx(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            Self::QuoteDocx(p) | Self::QuoteXlsx(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            Self::InspectionDocx(p) | Self::InspectionXlsx(p) => {
                serde_json::to_value(p).unwrap_or(Value::Null)
            }
        }
    }
}

/// A rendered document ready for registration.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Document encoding capability.
///
/// Deployments with real OOXML writers plug them in here; the in-tree
/// [`HtmlDocumentRenderer`] keeps the full pipeline functional without
/// them.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, request: &DocRequest) -> Result<RenderedDocument, String>;
}

// ===========================================================================
// In-tree HTML renderer
// ===========================================================================

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const DOC_CSS: &str = "body{font-family:system-ui,sans-serif;margin:2rem auto;max-width:60rem;color:#222}h1{border-bottom:2px solid #36c;padding-bottom:.3rem}table{border-collapse:collapse;width:100%;margin:1rem 0}th,td{border:1px solid #ccc;padding:.4rem .6rem;text-align:left}th{background:#f0f4ff}section.slide{border:1px solid #ddd;border-radius:6px;padding:1rem 1.5rem;margin:1rem 0}footer{color:#888;font-size:.8rem;margin-top:2rem}";

fn html_page(title: &str, body: &str) -> Vec<u8> {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}\n<footer>Generated {}</footer>\n</body>\n</html>\n",
        html_escape(title),
        DOC_CSS,
        body,
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    )
    .into_bytes()
}

fn kv_table(map: &Map<String, Value>) -> String {
    if map.is_empty() {
        return String::new();
    }
    let rows: String = map
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                html_escape(k),
                html_escape(&value)
            )
        })
        .collect();
    format!("<table>{rows}</table>")
}

pub struct HtmlDocumentRenderer;

impl HtmlDocumentRenderer {
    fn render_ppt(payload: &PptPayload) -> RenderedDocument {
        let mut body = format!("<h1>{}</h1>", html_escape(&payload.title));
        for (i, slide) in payload.slides.iter().enumerate() {
            let bullets: String = slide
                .bullets
                .iter()
                .map(|b| format!("<li>{}</li>", html_escape(b)))
                .collect();
            body.push_str(&format!(
                "<section class=\"slide\"><h2>{}. {}</h2><ul>{}</ul></section>",
                i + 1,
                html_escape(&slide.title),
                bullets
            ));
        }
        RenderedDocument {
            filename: format!("{}.html", slugify(&payload.title, "deck")),
            content_type: "text/html".to_string(),
            bytes: html_page(&payload.title, &body),
        }
    }

    fn render_quote(payload: &QuotePayload) -> RenderedDocument {
        let mut rows = String::new();
        let mut total = 0f64;
        for (i, item) in payload.items.iter().enumerate() {
            let subtotal = item.quantity * item.unit_price;
            total += subtotal;
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>",
                i + 1,
                html_escape(&item.name),
                item.quantity,
                html_escape(&item.unit),
                item.unit_price,
                subtotal,
                html_escape(item.note.as_deref().unwrap_or("")),
            ));
        }
        let mut body = format!(
            "<h1>Quotation</h1><table><tr><th>Seller</th><td>{}</td><th>Buyer</th><td>{}</td></tr><tr><th>Date</th><td>{}</td><th>Currency</th><td>{}</td></tr></table>",
            html_escape(&payload.seller),
            html_escape(&payload.buyer),
            Utc::now().format("%Y-%m-%d"),
            html_escape(&payload.currency),
        );
        body.push_str(&format!(
            "<table><tr><th>#</th><th>Item</th><th>Qty</th><th>Unit</th><th>Unit price ({c})</th><th>Subtotal ({c})</th><th>Note</th></tr>{rows}<tr><th colspan=\"5\">Total</th><th colspan=\"2\">{total:.2}</th></tr></table>",
            c = html_escape(&payload.currency),
        ));
        if let Some(note) = payload.note.as_deref().filter(|n| !n.is_empty()) {
            body.push_str(&format!("<p><strong>Note:</strong> {}</p>", html_escape(note)));
        }
        RenderedDocument {
            filename: "quotation.html".to_string(),
            content_type: "text/html".to_string(),
            bytes: html_page("Quotation", &body),
        }
    }

    fn render_inspection(payload: &InspectionPayload) -> RenderedDocument {
        let mut body = format!("<h1>{}</h1>", html_escape(&payload.title));
        for (heading, map) in [
            ("Basic information", &payload.basic_info),
            ("Device", &payload.device_info),
            ("Network", &payload.network_info),
        ] {
            if !map.is_empty() {
                body.push_str(&format!("<h2>{heading}</h2>{}", kv_table(map)));
            }
        }
        let rows: String = payload
            .inspection_items
            .iter()
            .map(|item| {
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    html_escape(&item.name),
                    html_escape(&item.result),
                    html_escape(item.remark.as_deref().unwrap_or("")),
                )
            })
            .collect();
        body.push_str(&format!(
            "<h2>Inspection items</h2><table><tr><th>Item</th><th>Result</th><th>Remark</th></tr>{rows}</table>"
        ));
        for (heading, map) in [("Conclusion", &payload.conclusion), ("Signatures", &payload.signatures)] {
            if !map.is_empty() {
                body.push_str(&format!("<h2>{heading}</h2>{}", kv_table(map)));
            }
        }
        RenderedDocument {
            filename: format!("{}.html", slugify(&payload.title, "inspection")),
            content_type: "text/html".to_string(),
            bytes: html_page(&payload.title, &body),
        }
    }
}

impl DocumentRenderer for HtmlDocumentRenderer {
    fn render(&self, request: &DocRequest) -> Result<RenderedDocument, String> {
        Ok(match request {
            DocRequest::Pptx(p) => Self::render_ppt(p),
            DocRequest::QuoteDocx(p) | DocRequest::QuoteXlsx(p) => Self::render_quote(p),
            DocRequest::InspectionDocx(p) | DocRequest::InspectionXlsx(p) => {
                Self::render_inspection(p)
            }
        })
    }
}

// ===========================================================================
// Workspace mirror
// ===========================================================================

/// ASCII slug for filenames; non-alphanumerics collapse to dashes.
pub fn slugify(text: &str, fallback: &str) -> String {
    let slug: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(60).collect();
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

/// Copy a produced artifact into `<workspace>/outputs/` with a context
/// sidecar and an index entry. Best effort: failures are logged, never
/// surfaced.
pub async fn mirror_output_to_workspace(
    ctx: &ToolCtx,
    registered: &RegisteredArtifact,
    bytes: &[u8],
    kind: &str,
    title: &str,
    payload: &Value,
    source: &str,
) -> Option<String> {
    let outputs_dir = ctx.workspace.resolve("outputs").ok()?;
    if tokio::fs::create_dir_all(&outputs_dir).await.is_err() {
        return None;
    }

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let short_id: String = registered.file_id.chars().take(8).collect();
    let ext = std::path::Path::new(&registered.filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let base = format!("{}-{stamp}-{short_id}", slugify(title, kind));
    let dest = outputs_dir.join(format!("{base}{ext}"));

    if let Err(err) = tokio::fs::write(&dest, bytes).await {
        tracing::debug!(%err, "workspace mirror write failed");
        return None;
    }

    let context = json!({
        "kind": kind,
        "title": title,
        "source": source,
        "created_at": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "workspace_file": dest.to_string_lossy(),
        "file_id": registered.file_id,
        "payload": payload,
    });
    let ctx_path = outputs_dir.join(format!("{base}.context.json"));
    let _ = tokio::fs::write(
        &ctx_path,
        serde_json::to_string_pretty(&context).unwrap_or_default(),
    )
    .await;

    let index_path = outputs_dir.join("README.md");
    let entry = format!(
        "- {} | {} | {} | file: {}{} | context: {}.context.json | source: {}\n",
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        kind.to_uppercase(),
        title,
        base,
        ext,
        base,
        source,
    );
    let existing = tokio::fs::read_to_string(&index_path)
        .await
        .unwrap_or_else(|_| "# Outputs Index\n\n".to_string());
    let _ = tokio::fs::write(&index_path, existing + &entry).await;

    Some(dest.to_string_lossy().to_string())
}

// ===========================================================================
// Tools
// ===========================================================================

async fn render_and_register(
    ctx: &ToolCtx,
    request: DocRequest,
    source: &str,
) -> Result<Value, ToolError> {
    let rendered = ctx.renderer.render(&request).map_err(ToolError::failed)?;

    let registered = ctx
        .artifacts
        .register(NewArtifact {
            kind: "generated".to_string(),
            filename: rendered.filename.clone(),
            content_type: rendered.content_type.clone(),
            bytes: rendered.bytes.clone(),
            team_id: ctx.team_id,
            user_id: ctx.user_id,
            session_id: ctx.session_id.clone(),
            project_id: ctx.project_id,
        })
        .await
        .map_err(ToolError::failed)?;

    let workspace_path = mirror_output_to_workspace(
        ctx,
        &registered,
        &rendered.bytes,
        request.kind(),
        &request.title(),
        &request.payload_json(),
        source,
    )
    .await;

    let mut meta = json!({
        "file_id": registered.file_id,
        "filename": registered.filename,
        "content_type": registered.content_type,
        "size_bytes": registered.size_bytes,
        "download_url": registered.download_url,
    });
    if let Some(preview) = registered.preview_url {
        meta["preview_url"] = Value::String(preview);
    }
    if let Some(path) = workspace_path {
        meta["workspace_path"] = Value::String(path);
    }
    Ok(meta)
}

fn quote_schema() -> Value {
    SchemaBuilder::new()
        .property("seller", json!({"type": "string", "minLength": 1}))
        .property("buyer", json!({"type": "string", "minLength": 1}))
        .property("currency", json!({"type": "string", "default": "CNY"}))
        .property(
            "items",
            json!({
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": {"type": "string", "minLength": 1},
                        "quantity": {"type": "number", "minimum": 0},
                        "unit_price": {"type": "number", "minimum": 0},
                        "unit": {"type": "string"},
                        "note": {"type": "string"},
                    },
                    "required": ["name", "quantity", "unit_price"],
                },
            }),
        )
        .property("note", json!({"type": "string"}))
        .required("seller")
        .required("buyer")
        .required("items")
        .build()
}

fn inspection_schema() -> Value {
    SchemaBuilder::new()
        .property("title", json!({"type": "string", "minLength": 1}))
        .property("basic_info", json!({"type": "object"}))
        .property("device_info", json!({"type": "object"}))
        .property("network_info", json!({"type": "object"}))
        .property(
            "inspection_items",
            json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": {"type": "string", "minLength": 1},
                        "result": {"type": "string", "default": ""},
                        "remark": {"type": "string"},
                    },
                    "required": ["name"],
                },
            }),
        )
        .property("conclusion", json!({"type": "object"}))
        .property("signatures", json!({"type": "object"}))
        .build()
}

macro_rules! generator_tool {
    ($tool:ident, $name:literal, $desc:literal, $payload:ty, $variant:ident, $schema:expr) => {
        pub struct $tool;

        #[async_trait]
        impl Tool for $tool {
            fn name(&self) -> &'static str {
                $name
            }

            fn description(&self) -> &'static str {
                $desc
            }

            fn risk(&self) -> RiskClass {
                RiskClass::Generator
            }

            fn input_schema(&self) -> Value {
                $schema
            }

            fn timeout(&self) -> std::time::Duration {
                std::time::Duration::from_secs(60)
            }

            async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
                let payload: $payload = serde_json::from_value(args)
                    .map_err(|e| ToolError::invalid_arguments($name, e.to_string()))?;
                render_and_register(ctx, DocRequest::$variant(payload), concat!("tool:", $name)).await
            }
        }
    };
}

generator_tool!(
    DocPptxCreateTool,
    "doc_pptx_create",
    "Generate a slide deck document and return its download link",
    PptPayload,
    Pptx,
    SchemaBuilder::new()
        .property("title", json!({"type": "string", "minLength": 1}))
        .property(
            "slides",
            json!({
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "title": {"type": "string", "minLength": 1},
                        "bullets": {"type": "array", "items": {"type": "string"}, "default": []},
                    },
                    "required": ["title"],
                },
            }),
        )
        .property("style", json!({"type": "string"}))
        .property("layout_mode", json!({"type": "string"}))
        .required("title")
        .required("slides")
        .build()
);

generator_tool!(
    DocQuoteDocxCreateTool,
    "doc_quote_docx_create",
    "Generate a quotation document (Word flavor) and return its download link",
    QuotePayload,
    QuoteDocx,
    quote_schema()
);

generator_tool!(
    DocQuoteXlsxCreateTool,
    "doc_quote_xlsx_create",
    "Generate a quotation sheet (Excel flavor) and return its download link",
    QuotePayload,
    QuoteXlsx,
    quote_schema()
);

generator_tool!(
    DocInspectionDocxCreateTool,
    "doc_inspection_docx_create",
    "Generate an inspection sheet (Word flavor) and return its download link",
    InspectionPayload,
    InspectionDocx,
    inspection_schema()
);

generator_tool!(
    DocInspectionXlsxCreateTool,
    "doc_inspection_xlsx_create",
    "Generate an inspection sheet (Excel flavor) and return its download link",
    InspectionPayload,
    InspectionXlsx,
    inspection_schema()
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_in_workspace;
    use crewdesk_core::policy::CapabilitySet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_quote_tool_registers_artifact_without_write_capability() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_in_workspace(CapabilitySet::NONE, dir.path().to_path_buf());
        let meta = DocQuoteXlsxCreateTool
            .call(
                json!({
                    "seller": "Acme",
                    "buyer": "Globex",
                    "currency": "CNY",
                    "items": [{"name": "x", "quantity": 2, "unit_price": 10}],
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(meta["file_id"].as_str().unwrap().ends_with(".html"));
        assert!(meta["download_url"].as_str().unwrap().contains("/files/"));
    }

    #[tokio::test]
    async fn test_quote_renderer_totals() {
        let payload = QuotePayload {
            seller: "A".into(),
            buyer: "B".into(),
            currency: "USD".into(),
            items: vec![
                QuoteItem {
                    name: "alpha".into(),
                    quantity: 2.0,
                    unit_price: 10.0,
                    unit: default_unit(),
                    note: None,
                },
                QuoteItem {
                    name: "beta".into(),
                    quantity: 1.0,
                    unit_price: 5.5,
                    unit: default_unit(),
                    note: None,
                },
            ],
            note: Some("draft".into()),
        };
        let doc = HtmlDocumentRenderer.render(&DocRequest::QuoteXlsx(payload)).unwrap();
        let html = String::from_utf8(doc.bytes).unwrap();
        assert!(html.contains("25.50"));
        assert!(html.contains("draft"));
        assert!(html.contains("alpha"));
    }

    #[tokio::test]
    async fn test_ppt_tool_mirrors_into_workspace_outputs() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_in_workspace(CapabilitySet::NONE, dir.path().to_path_buf());
        DocPptxCreateTool
            .call(
                json!({"title": "Alpha", "slides": [{"title": "Intro", "bullets": ["a", "b"]}]}),
                &ctx,
            )
            .await
            .unwrap();

        let outputs = dir.path().join("outputs");
        let entries: Vec<_> = std::fs::read_dir(&outputs).unwrap().collect();
        // Document, context sidecar, and the index.
        assert!(entries.len() >= 3);
        assert!(outputs.join("README.md").exists());
        let has_context = std::fs::read_dir(&outputs).unwrap().any(|e| {
            e.unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".context.json")
        });
        assert!(has_context);
    }

    #[tokio::test]
    async fn test_inspection_defaults_fill_items() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_in_workspace(CapabilitySet::NONE, dir.path().to_path_buf());
        let meta = DocInspectionDocxCreateTool.call(json!({}), &ctx).await.unwrap();
        assert!(meta["file_id"].as_str().is_some());

        let payload: InspectionPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.inspection_items.len() >= 10);
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Quarterly Report 2026!", "doc"), "quarterly-report-2026");
        assert_eq!(slugify("///", "doc"), "doc");
    }
}
