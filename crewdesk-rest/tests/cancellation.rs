//! Cancellation semantics: an aborted turn commits the user message and
//! nothing else.

mod support;

use std::sync::Arc;

use crewdesk_core::agent::EventSink;
use crewdesk_core::policy::{CapabilitySet, TeamRole};
use crewdesk_rest::auth::Principal;
use crewdesk_rest::chat::{run_chat_turn, ChatRequest};
use crewdesk_rest::ApiError;
use support::{ScriptedProvider, TestEnv};
use tokio_util::sync::CancellationToken;

fn principal(env: &TestEnv) -> Principal {
    Principal {
        user_id: 1,
        email: "owner@a.example".to_string(),
        team_id: env.team_a,
        team_role: TeamRole::Owner,
    }
}

fn request(message: &str, session_id: Option<String>) -> ChatRequest {
    serde_json::from_value(serde_json::json!({
        "message": message,
        "session_id": session_id,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_cancelled_turn_commits_only_user_message() {
    let env = TestEnv::new(
        Arc::new(ScriptedProvider::answering("never sent")),
        CapabilitySet::NONE,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_chat_turn(
        env.state.clone(),
        principal(&env),
        request("long running request", Some("cancel-test-1".to_string())),
        EventSink::buffered(),
        cancel,
    )
    .await;

    assert!(matches!(result, Err(ApiError::Cancelled)));

    // The user message committed; no assistant state did.
    let messages = env
        .state
        .db
        .session_messages(env.team_a, "cancel-test-1")
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "long running request");
}

#[tokio::test]
async fn test_turn_after_cancellation_continues_cleanly() {
    let env = TestEnv::new(
        Arc::new(ScriptedProvider::new(
            "mock",
            crewdesk_core::provider::ProviderCaps::FULL,
            vec![support::text_completion("recovered")],
        )),
        CapabilitySet::NONE,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let _ = run_chat_turn(
        env.state.clone(),
        principal(&env),
        request("first", Some("cancel-test-2".to_string())),
        EventSink::buffered(),
        cancel,
    )
    .await;

    // The next turn on the same session proceeds and ordinals stay
    // strictly increasing.
    let result = run_chat_turn(
        env.state.clone(),
        principal(&env),
        request("second", Some("cancel-test-2".to_string())),
        EventSink::buffered(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(result.assistant, "recovered");

    let messages = env
        .state
        .db
        .session_messages(env.team_a, "cancel-test-2")
        .unwrap();
    let ordinals: Vec<i64> = messages.iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
}
