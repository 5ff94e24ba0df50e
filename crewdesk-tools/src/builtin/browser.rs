//! Session-scoped headless browser tools.
//!
//! The browser engine is the host's: screenshots shell out to a configured
//! headless browser command (`CREWDESK_BROWSER_CMD`, chromium-compatible
//! flags). Pages are tracked per chat session with a count bound and an
//! idle TTL; all three tools are gated by the browser capability.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crewdesk_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

use crate::artifacts::NewArtifact;
use crate::builtin::{RiskClass, Tool};
use crate::context::ToolCtx;
use crate::schema::SchemaBuilder;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct BrowserPage {
    url: Option<String>,
    last_used: Instant,
}

/// Tracks one headless page per chat session.
pub struct BrowserService {
    command: String,
    max_pages: usize,
    page_ttl: Duration,
    pages: Mutex<HashMap<String, BrowserPage>>,
}

impl BrowserService {
    pub fn new(command: String, max_pages: usize, page_ttl: Duration) -> Self {
        Self {
            command,
            max_pages,
            page_ttl,
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Test instance with a command that will never be spawned.
    pub fn disabled_for_tests() -> Self {
        Self::new("false".to_string(), 4, Duration::from_secs(60))
    }

    fn prune(&self, pages: &mut HashMap<String, BrowserPage>) {
        let ttl = self.page_ttl;
        pages.retain(|_, page| page.last_used.elapsed() <= ttl);
    }

    pub async fn start(&self, session_id: &str) -> Result<(), ToolError> {
        let mut pages = self.pages.lock().await;
        self.prune(&mut pages);
        if !pages.contains_key(session_id) && pages.len() >= self.max_pages {
            return Err(ToolError::failed(format!(
                "browser page limit reached ({})",
                self.max_pages
            )));
        }
        pages.insert(
            session_id.to_string(),
            BrowserPage {
                url: None,
                last_used: Instant::now(),
            },
        );
        Ok(())
    }

    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<(), ToolError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::failed("only http(s) URLs are allowed"));
        }
        let mut pages = self.pages.lock().await;
        self.prune(&mut pages);
        let page = pages
            .get_mut(session_id)
            .ok_or_else(|| ToolError::failed("no browser page for this session; call browser_start first"))?;
        page.url = Some(url.to_string());
        page.last_used = Instant::now();
        Ok(())
    }

    async fn current_url(&self, session_id: &str) -> Result<String, ToolError> {
        let mut pages = self.pages.lock().await;
        self.prune(&mut pages);
        let page = pages
            .get_mut(session_id)
            .ok_or_else(|| ToolError::failed("no browser page for this session; call browser_start first"))?;
        page.last_used = Instant::now();
        page.url
            .clone()
            .ok_or_else(|| ToolError::failed("no URL loaded; call browser_navigate first"))
    }

    /// Render the current page to PNG bytes via the headless browser.
    pub async fn screenshot(&self, session_id: &str) -> Result<(String, Vec<u8>), ToolError> {
        let url = self.current_url(session_id).await?;

        let shot_dir = tempfile::tempdir().map_err(|e| ToolError::failed(e))?;
        let shot_path = shot_dir.path().join("page.png");

        info!(%url, "taking headless browser screenshot");
        let mut cmd = Command::new(&self.command);
        cmd.arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--window-size=1280,800")
            .arg(format!("--screenshot={}", shot_path.display()))
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(SCREENSHOT_TIMEOUT, cmd.output())
            .await
            .map_err(|_| ToolError::timeout("browser_screenshot", SCREENSHOT_TIMEOUT.as_millis() as u64))?
            .map_err(|e| ToolError::failed(format!("spawn browser: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::failed(format!(
                "browser exited with {:?}: {}",
                output.status.code(),
                stderr.chars().take(400).collect::<String>()
            )));
        }

        let bytes = tokio::fs::read(&shot_path)
            .await
            .map_err(|e| ToolError::failed(format!("screenshot missing: {e}")))?;
        Ok((url, bytes))
    }

    pub async fn close(&self, session_id: &str) {
        self.pages.lock().await.remove(session_id);
    }
}

fn session_id(ctx: &ToolCtx) -> Result<String, ToolError> {
    ctx.session_id
        .clone()
        .ok_or_else(|| ToolError::failed("browser tools need a session"))
}

/// Open a page context for this session.
pub struct BrowserStartTool;

#[async_trait]
impl Tool for BrowserStartTool {
    fn name(&self) -> &'static str {
        "browser_start"
    }

    fn description(&self) -> &'static str {
        "Open a headless browser page for this session (disabled unless the browser capability is on)"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::DangerousBrowser
    }

    fn input_schema(&self) -> Value {
        crate::schema::empty_object_schema()
    }

    async fn call(&self, _args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let sid = session_id(ctx)?;
        ctx.browser.start(&sid).await?;
        Ok(json!({"ok": true}))
    }
}

#[derive(Debug, Deserialize)]
struct NavigateArgs {
    url: String,
}

/// Point the session page at a URL.
pub struct BrowserNavigateTool;

#[async_trait]
impl Tool for BrowserNavigateTool {
    fn name(&self) -> &'static str {
        "browser_navigate"
    }

    fn description(&self) -> &'static str {
        "Navigate the session's browser page to an http(s) URL"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::DangerousBrowser
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("url", json!({"type": "string", "minLength": 1}))
            .required("url")
            .build()
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let args: NavigateArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("browser_navigate", e.to_string()))?;
        let sid = session_id(ctx)?;
        ctx.browser.navigate(&sid, &args.url).await?;
        Ok(json!({"ok": true, "url": args.url}))
    }
}

/// Screenshot the current page into an attachment.
pub struct BrowserScreenshotTool;

#[async_trait]
impl Tool for BrowserScreenshotTool {
    fn name(&self) -> &'static str {
        "browser_screenshot"
    }

    fn description(&self) -> &'static str {
        "Screenshot the session's current page; the image is stored as an attachment"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::DangerousBrowser
    }

    fn input_schema(&self) -> Value {
        crate::schema::empty_object_schema()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(90)
    }

    async fn call(&self, _args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let sid = session_id(ctx)?;
        let (url, bytes) = ctx.browser.screenshot(&sid).await?;

        let registered = ctx
            .artifacts
            .register(NewArtifact {
                kind: "generated".to_string(),
                filename: "screenshot.png".to_string(),
                content_type: "image/png".to_string(),
                bytes,
                team_id: ctx.team_id,
                user_id: ctx.user_id,
                session_id: ctx.session_id.clone(),
                project_id: ctx.project_id,
            })
            .await
            .map_err(ToolError::failed)?;

        Ok(json!({
            "file_id": registered.file_id,
            "filename": registered.filename,
            "content_type": registered.content_type,
            "size_bytes": registered.size_bytes,
            "download_url": registered.download_url,
            "url": url,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx_with_caps;
    use crewdesk_core::policy::CapabilitySet;

    fn browser_caps() -> CapabilitySet {
        CapabilitySet {
            browser: true,
            ..CapabilitySet::NONE
        }
    }

    #[tokio::test]
    async fn test_navigate_requires_start() {
        let ctx = ctx_with_caps(browser_caps());
        let err = BrowserNavigateTool
            .call(json!({"url": "https://example.com"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("browser_start"));
    }

    #[tokio::test]
    async fn test_start_then_navigate() {
        let ctx = ctx_with_caps(browser_caps());
        BrowserStartTool.call(json!({}), &ctx).await.unwrap();
        let out = BrowserNavigateTool
            .call(json!({"url": "https://example.com"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["url"], "https://example.com");
    }

    #[tokio::test]
    async fn test_non_http_url_rejected() {
        let ctx = ctx_with_caps(browser_caps());
        BrowserStartTool.call(json!({}), &ctx).await.unwrap();
        let err = BrowserNavigateTool
            .call(json!({"url": "file:///etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[tokio::test]
    async fn test_page_limit() {
        let service = BrowserService::new("false".to_string(), 1, Duration::from_secs(60));
        service.start("a").await.unwrap();
        let err = service.start("b").await.unwrap_err();
        assert!(err.to_string().contains("limit"));
        // Re-starting an existing page is fine.
        service.start("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_page_ttl_pruning() {
        let service = BrowserService::new("false".to_string(), 8, Duration::from_millis(10));
        service.start("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let err = service.navigate("a", "https://example.com").await.unwrap_err();
        assert!(err.to_string().contains("browser_start"));
    }

    #[tokio::test]
    async fn test_screenshot_without_navigation_fails() {
        let ctx = ctx_with_caps(browser_caps());
        BrowserStartTool.call(json!({}), &ctx).await.unwrap();
        let err = BrowserScreenshotTool.call(json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("browser_navigate"));
    }
}
