//! Artifact lifecycle through the full stack: generator tools, tokenized
//! downloads, tenancy, direct endpoints, and provider fallback.

mod support;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use crewdesk_core::policy::CapabilitySet;
use crewdesk_core::provider::ProviderCaps;
use serde_json::json;
use support::{call_completion, events_of_type, text_completion, ScriptedProvider, TestEnv};

const QUOTE_ARGS: &str = r#"{"seller":"Acme","buyer":"Globex","currency":"CNY","items":[{"name":"x","quantity":2,"unit_price":10}]}"#;

#[tokio::test]
async fn test_generator_tool_artifact_roundtrip() {
    let provider = Arc::new(ScriptedProvider::new(
        "mock",
        ProviderCaps::FULL,
        vec![
            call_completion("tc_1", "doc_quote_xlsx_create", QUOTE_ARGS),
            text_completion("here is your quotation"),
        ],
    ));
    let env = TestEnv::new(provider, CapabilitySet::NONE);

    let (status, body) = env
        .post_chat(&env.owner_token, json!({"message": "make a quotation"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    // The tool result carries the registered attachment.
    let results = events_of_type(&body, "tool_result");
    let file_id = results[0]["result"]["file_id"].as_str().unwrap().to_string();
    let download_url = results[0]["result"]["download_url"].as_str().unwrap();
    assert!(download_url.contains(&file_id));

    // An attachment row exists and is linked to the assistant message.
    let record = env.state.db.get_file(env.team_a, &file_id).unwrap().unwrap();
    assert_eq!(record.kind, "generated");
    assert!(record.session_id.is_some());

    // Download with the issuing team's token.
    let token = env
        .state
        .artifacts
        .issue_download_token(&file_id, env.team_a)
        .unwrap();
    let (status, bytes, content_type) = env
        .raw_get(&format!("/files/{file_id}?token={token}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!bytes.is_empty());
    assert_eq!(content_type.as_deref(), Some("text/html"));

    // A sibling team's token is rejected with 403.
    let foreign_token = env
        .state
        .artifacts
        .issue_download_token(&file_id, env.team_b)
        .unwrap();
    let (status, _, _) = env
        .raw_get(&format!("/files/{file_id}?token={foreign_token}"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Preview works for HTML artifacts.
    let (status, _, _) = env
        .raw_get(&format!("/files/preview/{file_id}?token={token}"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_generator_allowed_without_write_capability() {
    // Safe preset: generator tools still run (they are not write tools).
    let provider = Arc::new(ScriptedProvider::new(
        "mock",
        ProviderCaps::FULL,
        vec![
            call_completion("tc_1", "doc_quote_xlsx_create", QUOTE_ARGS),
            text_completion("generated"),
        ],
    ));
    let env = TestEnv::new(provider, CapabilitySet::NONE);

    let (_, body) = env
        .post_chat(
            &env.owner_token,
            json!({"message": "quotation please", "security_preset": "safe"}),
        )
        .await;
    let results = events_of_type(&body, "tool_result");
    assert!(results[0]["result"]["file_id"].as_str().is_some());
}

#[tokio::test]
async fn test_provider_fallback_for_docs_request() {
    // Requested provider cannot generate docs; the native override can.
    let limited = Arc::new(ScriptedProvider::new(
        "opencode",
        ProviderCaps::default(),
        vec![],
    ));
    let native = Arc::new(ScriptedProvider::new(
        "native",
        ProviderCaps::FULL,
        vec![
            call_completion("tc_1", "doc_pptx_create", r#"{"title":"Alpha","slides":[{"title":"Intro","bullets":["a"]}]}"#),
            text_completion("deck is ready, download below"),
        ],
    ));

    let mut env = TestEnv::new(limited.clone(), CapabilitySet::NONE);
    env.state.native_override = Some(native.clone());
    env.app = crewdesk_rest::router(env.state.clone());

    let (status, body) = env
        .post_chat(&env.owner_token, json!({"message": "generate a PPT titled Alpha"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    // The fallback decision is visible in the trace, before provider_start.
    let fallback = events_of_type(&body, "provider_fallback");
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0]["from"], "opencode");
    assert_eq!(fallback[0]["to"], "native");
    assert_eq!(fallback[0]["requested"][0], "docs");

    let start = events_of_type(&body, "provider_start");
    assert_eq!(start[0]["provider"], "native");

    // The limited provider was never called; the final answer carries a
    // download link through the tool result.
    assert!(limited.seen.lock().unwrap().is_empty());
    let results = events_of_type(&body, "tool_result");
    assert!(results[0]["result"]["download_url"].as_str().is_some());
}

#[tokio::test]
async fn test_direct_quote_endpoint_registers_attachment() {
    let env = TestEnv::new(
        Arc::new(ScriptedProvider::answering("unused")),
        CapabilitySet::NONE,
    );

    let (status, body) = env
        .request(
            Method::POST,
            "/docs/quote-xlsx",
            Some(&env.owner_token),
            Some(json!({
                "seller": "Acme",
                "buyer": "Globex",
                "items": [{"name": "sensor", "quantity": 3, "unit_price": 12.5}],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let file_id = body["file_id"].as_str().unwrap();
    assert!(env.state.db.get_file(env.team_a, file_id).unwrap().is_some());

    // Workspace mirror wrote into outputs/ of the team workspace.
    let outputs = env.workspace_root().join("outputs");
    assert!(outputs.join("README.md").exists());
}

#[tokio::test]
async fn test_direct_endpoint_validates_payload() {
    let env = TestEnv::new(
        Arc::new(ScriptedProvider::answering("unused")),
        CapabilitySet::NONE,
    );
    // Missing required fields.
    let (status, _) = env
        .request(
            Method::POST,
            "/docs/quote-xlsx",
            Some(&env.owner_token),
            Some(json!({"seller": "Acme"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_prototype_endpoint_returns_bundle() {
    let env = TestEnv::new(
        Arc::new(ScriptedProvider::answering("unused")),
        CapabilitySet::NONE,
    );
    let (status, body) = env
        .request(
            Method::POST,
            "/prototype/generate",
            Some(&env.owner_token),
            Some(json!({
                "project_name": "Fleet Console",
                "pages": [{"title": "Dashboard"}, {"title": "Devices"}],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["file_id"].as_str().unwrap().ends_with(".gz"));
    assert_eq!(body["pages"], 2);
}

#[tokio::test]
async fn test_history_files_lists_team_artifacts_only() {
    let provider = Arc::new(ScriptedProvider::new(
        "mock",
        ProviderCaps::FULL,
        vec![
            call_completion("tc_1", "doc_quote_xlsx_create", QUOTE_ARGS),
            text_completion("ok"),
        ],
    ));
    let env = TestEnv::new(provider, CapabilitySet::NONE);
    env.post_chat(&env.owner_token, json!({"message": "quotation"})).await;

    let (_, mine) = env
        .request(Method::GET, "/history/files", Some(&env.owner_token), None)
        .await;
    assert_eq!(mine["files"].as_array().unwrap().len(), 1);

    let (_, theirs) = env
        .request(Method::GET, "/history/files", Some(&env.team_b_token), None)
        .await;
    assert!(theirs["files"].as_array().unwrap().is_empty());
}
