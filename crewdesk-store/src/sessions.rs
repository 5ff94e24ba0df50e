//! Chat sessions and messages.
//!
//! Ordinals are strictly increasing per session and match commit order. A
//! turn commits atomically: session upsert, user message, assistant/tool
//! messages with the event trace on the terminal assistant message, and
//! the output artifact links.

use crewdesk_core::types::{AttachmentRef, ChatMessage, ChatRole};
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;

use crate::db::{utc_now, Database};
use crate::error::StoreError;

/// Durable session metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub session_id: String,
    pub team_id: i64,
    pub user_id: i64,
    pub role: String,
    pub provider: String,
    pub model: String,
    pub project_id: Option<i64>,
    pub title: String,
    pub remote_session_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing shape for `/history/sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub role: String,
    pub provider: String,
    pub model: String,
    pub project_id: Option<i64>,
    pub title: String,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One durable message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub ordinal: i64,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
    pub tool_call_id: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub events: Option<serde_json::Value>,
    pub created_at: String,
}

/// Everything one turn persists.
pub struct TurnCommit<'a> {
    pub session: &'a SessionRow,
    /// The user message (with input attachments).
    pub user_message: &'a ChatMessage,
    /// Assistant and tool messages emitted this turn, in order. May be
    /// empty for an aborted turn (then only the user message commits).
    pub turn_messages: &'a [ChatMessage],
    /// Serialized event trace, attached to the terminal assistant message.
    pub events_json: Option<String>,
    /// Artifact file ids produced this turn, linked as outputs of the
    /// terminal assistant message.
    pub output_file_ids: &'a [String],
}

fn truncate_title(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 48 {
        flat
    } else {
        let cut: String = flat.chars().take(47).collect();
        format!("{cut}…")
    }
}

fn next_ordinal(tx: &Transaction<'_>, session_id: &str) -> Result<i64, rusqlite::Error> {
    tx.query_row(
        "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM chat_messages WHERE session_id = ?1",
        params![session_id],
        |r| r.get(0),
    )
}

#[allow(clippy::too_many_arguments)]
fn insert_message(
    tx: &Transaction<'_>,
    session: &SessionRow,
    ordinal: i64,
    message: &ChatMessage,
    events_json: Option<&str>,
    now: &str,
) -> Result<i64, rusqlite::Error> {
    let tool_calls_json = if message.tool_calls.is_empty() {
        None
    } else {
        serde_json::to_string(&message.tool_calls).ok()
    };
    let attachments_json = if message.attachments.is_empty() {
        None
    } else {
        serde_json::to_string(&message.attachments).ok()
    };
    tx.execute(
        "INSERT INTO chat_messages(
            session_id, team_id, user_id, ordinal, role, content,
            tool_calls_json, tool_call_id, attachments_json, events_json, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            session.session_id,
            session.team_id,
            session.user_id,
            ordinal,
            message.role.as_str(),
            message.content,
            tool_calls_json,
            message.tool_call_id,
            attachments_json,
            events_json,
            now,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

impl Database {
    /// Commit one turn atomically.
    ///
    /// All steps succeed or none: the caller restores its in-memory
    /// session from the pre-turn snapshot on error.
    pub fn commit_turn(&self, commit: &TurnCommit<'_>) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let now = utc_now();
            let session = commit.session;

            // Session ownership guard before any write.
            let existing_team: Option<i64> = tx
                .query_row(
                    "SELECT team_id FROM chat_sessions WHERE session_id = ?1",
                    params![session.session_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(StoreError::from)?;
            if let Some(team) = existing_team {
                if team != session.team_id {
                    return Err(StoreError::NotFound);
                }
            }

            let title = truncate_title(&commit.user_message.content);
            tx.execute(
                "INSERT INTO chat_sessions(
                    session_id, team_id, user_id, role, provider, model,
                    project_id, title, remote_session_id, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                ON CONFLICT(session_id) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    role = excluded.role,
                    provider = excluded.provider,
                    model = excluded.model,
                    project_id = excluded.project_id,
                    remote_session_id = COALESCE(excluded.remote_session_id, chat_sessions.remote_session_id),
                    title = CASE WHEN chat_sessions.title = '' THEN excluded.title ELSE chat_sessions.title END",
                params![
                    session.session_id,
                    session.team_id,
                    session.user_id,
                    session.role,
                    session.provider,
                    session.model,
                    session.project_id,
                    title,
                    session.remote_session_id,
                    now,
                ],
            )
            .map_err(StoreError::from)?;

            let mut ordinal = next_ordinal(tx, &session.session_id).map_err(StoreError::from)?;

            let user_message_id =
                insert_message(tx, session, ordinal, commit.user_message, None, &now)
                    .map_err(StoreError::from)?;
            ordinal += 1;

            for attachment in &commit.user_message.attachments {
                tx.execute(
                    "INSERT INTO message_attachments(message_id, file_id, direction)
                     VALUES (?1, ?2, 'input')",
                    params![user_message_id, attachment.file_id],
                )
                .map_err(StoreError::from)?;
                // Back-fill associations for files uploaded before the turn.
                tx.execute(
                    "UPDATE file_records
                     SET session_id = COALESCE(session_id, ?1),
                         project_id = COALESCE(project_id, ?2)
                     WHERE file_id = ?3 AND team_id = ?4",
                    params![
                        session.session_id,
                        session.project_id,
                        attachment.file_id,
                        session.team_id
                    ],
                )
                .map_err(StoreError::from)?;
            }

            // The event trace lands on the final assistant message.
            let terminal_assistant_index = commit
                .turn_messages
                .iter()
                .rposition(|m| m.role == ChatRole::Assistant);

            let mut terminal_assistant_id: Option<i64> = None;
            for (index, message) in commit.turn_messages.iter().enumerate() {
                let events = if Some(index) == terminal_assistant_index {
                    commit.events_json.as_deref()
                } else {
                    None
                };
                let message_id = insert_message(tx, session, ordinal, message, events, &now)
                    .map_err(StoreError::from)?;
                ordinal += 1;
                if Some(index) == terminal_assistant_index {
                    terminal_assistant_id = Some(message_id);
                }
            }

            if let Some(assistant_id) = terminal_assistant_id {
                for file_id in commit.output_file_ids {
                    tx.execute(
                        "INSERT INTO message_attachments(message_id, file_id, direction)
                         VALUES (?1, ?2, 'output')",
                        params![assistant_id, file_id],
                    )
                    .map_err(StoreError::from)?;
                    tx.execute(
                        "UPDATE file_records
                         SET session_id = COALESCE(session_id, ?1),
                             project_id = COALESCE(project_id, ?2)
                         WHERE file_id = ?3 AND team_id = ?4",
                        params![
                            session.session_id,
                            session.project_id,
                            file_id,
                            session.team_id
                        ],
                    )
                    .map_err(StoreError::from)?;
                }
            }

            Ok(())
        })
    }

    pub fn get_session(&self, team_id: i64, session_id: &str) -> Result<Option<SessionRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT session_id, team_id, user_id, role, provider, model, project_id,
                        title, remote_session_id, created_at, updated_at
                 FROM chat_sessions WHERE session_id = ?1 AND team_id = ?2",
                params![session_id, team_id],
                |r| {
                    Ok(SessionRow {
                        session_id: r.get(0)?,
                        team_id: r.get(1)?,
                        user_id: r.get(2)?,
                        role: r.get(3)?,
                        provider: r.get(4)?,
                        model: r.get(5)?,
                        project_id: r.get(6)?,
                        title: r.get(7)?,
                        remote_session_id: r.get(8)?,
                        created_at: r.get(9)?,
                        updated_at: r.get(10)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Whether the session id exists under any team (tenancy probe).
    pub fn session_exists_anywhere(&self, session_id: &str) -> Result<bool, StoreError> {
        let team: Option<i64> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT team_id FROM chat_sessions WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()
        })?;
        Ok(team.is_some())
    }

    pub fn list_sessions(&self, team_id: i64) -> Result<Vec<SessionSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.session_id, s.role, s.provider, s.model, s.project_id, s.title,
                        (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.session_id),
                        s.created_at, s.updated_at
                 FROM chat_sessions s
                 WHERE s.team_id = ?1
                 ORDER BY s.updated_at DESC",
            )?;
            let rows = stmt.query_map(params![team_id], |r| {
                Ok(SessionSummary {
                    session_id: r.get(0)?,
                    role: r.get(1)?,
                    provider: r.get(2)?,
                    model: r.get(3)?,
                    project_id: r.get(4)?,
                    title: r.get(5)?,
                    message_count: r.get(6)?,
                    created_at: r.get(7)?,
                    updated_at: r.get(8)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn session_messages(&self, team_id: i64, session_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ordinal, role, content, tool_calls_json, tool_call_id,
                        attachments_json, events_json, created_at
                 FROM chat_messages
                 WHERE session_id = ?1 AND team_id = ?2
                 ORDER BY ordinal",
            )?;
            let rows = stmt.query_map(params![session_id, team_id], |r| {
                let tool_calls: Option<String> = r.get(4)?;
                let attachments: Option<String> = r.get(6)?;
                let events: Option<String> = r.get(7)?;
                Ok(MessageRow {
                    id: r.get(0)?,
                    ordinal: r.get(1)?,
                    role: r.get(2)?,
                    content: r.get(3)?,
                    tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
                    tool_call_id: r.get(5)?,
                    attachments: attachments
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    events: events.and_then(|s| serde_json::from_str(&s).ok()),
                    created_at: r.get(8)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Last `limit` user/assistant messages for cache rehydration, oldest
    /// first. Tool rounds are dropped and assistant rows are reduced to
    /// their text - the rebuilt context must never carry a tool call
    /// without its paired result.
    pub fn recent_messages(
        &self,
        team_id: i64,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, attachments_json
                 FROM chat_messages
                 WHERE session_id = ?1 AND team_id = ?2
                   AND role IN ('user', 'assistant') AND content != ''
                 ORDER BY ordinal DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![session_id, team_id, limit as i64], |r| {
                let role: String = r.get(0)?;
                let content: String = r.get(1)?;
                let attachments: Option<String> = r.get(2)?;
                Ok((role, content, attachments))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        let mut messages: Vec<ChatMessage> = rows
            .into_iter()
            .filter_map(|(role, content, attachments)| {
                let role = ChatRole::parse(&role)?;
                let attachments: Vec<AttachmentRef> = attachments
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default();
                Some(ChatMessage {
                    role,
                    content,
                    attachments,
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                })
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Delete a session with its messages and attachment links.
    pub fn delete_session(&self, team_id: i64, session_id: &str) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let deleted = tx
                .execute(
                    "DELETE FROM chat_sessions WHERE session_id = ?1 AND team_id = ?2",
                    params![session_id, team_id],
                )
                .map_err(StoreError::from)?;
            if deleted == 0 {
                return Err(StoreError::NotFound);
            }
            tx.execute(
                "DELETE FROM message_attachments WHERE message_id IN (
                     SELECT id FROM chat_messages WHERE session_id = ?1 AND team_id = ?2
                 )",
                params![session_id, team_id],
            )
            .map_err(StoreError::from)?;
            tx.execute(
                "DELETE FROM chat_messages WHERE session_id = ?1 AND team_id = ?2",
                params![session_id, team_id],
            )
            .map_err(StoreError::from)?;
            Ok(())
        })
    }

    pub fn count_messages(&self, team_id: i64, session_id: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE session_id = ?1 AND team_id = ?2",
                params![session_id, team_id],
                |r| r.get(0),
            )
        })
    }
}
