//! Context budgeter.
//!
//! A pure transform from a message list plus limits to a trimmed list plus
//! a diagnostic report. The freshly assembled system prompt is always kept;
//! the conversational suffix is bounded first by message count, then by a
//! character estimate. An assistant message that opened a tool round and
//! its paired tool results are dropped as one group so the provider never
//! sees an orphaned half of a round.

use crate::types::{ChatMessage, ChatRole};

/// Limits applied to one turn's provider context.
#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    /// Keep at most this many non-system messages (0 = unlimited).
    pub max_messages: usize,
    /// Character budget across non-system messages (0 = unlimited).
    pub max_chars: usize,
}

/// What the budgeter removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub dropped: usize,
}

/// Rough per-message cost: textual fields plus tool payload JSON plus a
/// fixed overhead for role labels and separators.
pub fn estimate_message_chars(message: &ChatMessage) -> usize {
    let mut n = message.content.len();
    for att in &message.attachments {
        n += att.file_id.len() + att.filename.len();
    }
    if !message.tool_calls.is_empty() {
        n += serde_json::to_string(&message.tool_calls)
            .map(|s| s.len())
            .unwrap_or(0);
    }
    n + 64
}

/// Split the non-system suffix into drop groups: each user message and each
/// bare assistant message is its own group; an assistant message with tool
/// calls absorbs the tool messages that follow it.
fn group_boundaries(rest: &[ChatMessage]) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let start = i;
        let msg = &rest[i];
        i += 1;
        if msg.role == ChatRole::Assistant && msg.has_tool_calls() {
            while i < rest.len() && rest[i].role == ChatRole::Tool {
                i += 1;
            }
        }
        groups.push((start, i));
    }
    groups
}

/// Trim `messages` to the limits. System messages always survive.
pub fn trim_messages(messages: Vec<ChatMessage>, limits: ContextLimits) -> (Vec<ChatMessage>, TrimReport) {
    let (system, mut rest): (Vec<ChatMessage>, Vec<ChatMessage>) = messages
        .into_iter()
        .partition(|m| m.role == ChatRole::System);

    let before = rest.len();

    // Count bound: keep the most recent suffix.
    if limits.max_messages > 0 && rest.len() > limits.max_messages {
        rest = rest.split_off(rest.len() - limits.max_messages);
    }

    // Character bound: drop oldest groups until under budget, always keeping
    // the newest group.
    if limits.max_chars > 0 {
        let groups = group_boundaries(&rest);
        let costs: Vec<usize> = groups
            .iter()
            .map(|&(s, e)| rest[s..e].iter().map(estimate_message_chars).sum())
            .collect();
        let mut total: usize = costs.iter().sum();
        let mut cut_group = 0;
        while cut_group + 1 < groups.len() && total > limits.max_chars {
            total -= costs[cut_group];
            cut_group += 1;
        }
        if cut_group > 0 {
            let cut_at = groups[cut_group].0;
            rest = rest.split_off(cut_at);
        }
    }

    let dropped = before - rest.len();
    let mut kept = system;
    kept.extend(rest);
    (kept, TrimReport { dropped })
}
