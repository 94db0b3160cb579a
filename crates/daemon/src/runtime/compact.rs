//! Dangling-tool-use repair and threshold-based compaction (spec §4.4
//! step 2).
//!
//! Both operate on the slice of messages the Agent Loop has already loaded
//! from the Store (the tail after the latest compaction's cutoff, or the
//! whole history if none exists) and are pure — callers persist whatever
//! they decide to keep.

use muxd_domain::message::{Compaction, Message, Role};

/// Drop any assistant message whose `tool_use` ids are not fully answered
/// by `tool_result` blocks in the immediately following message, together
/// with that (partial) following message. Repeats until stable — this is
/// a fixpoint, so applying it twice is the same as applying it once.
pub fn repair_dangling(mut messages: Vec<Message>) -> Vec<Message> {
    loop {
        let mut drop_at = None;
        for i in 0..messages.len() {
            if messages[i].role != Role::Assistant {
                continue;
            }
            let pending = messages[i].tool_use_ids();
            if pending.is_empty() {
                continue;
            }
            let answered = messages
                .get(i + 1)
                .filter(|m| m.role == Role::User)
                .map(|m| m.tool_result_ids())
                .unwrap_or_default();
            let fully_answered = pending.iter().all(|id| answered.contains(id));
            if !fully_answered {
                drop_at = Some(i);
                break;
            }
        }

        match drop_at {
            Some(i) => {
                let removes_following = messages.get(i + 1).map(|m| m.role == Role::User).unwrap_or(false);
                if removes_following {
                    messages.remove(i + 1);
                }
                messages.remove(i);
            }
            None => return messages,
        }
    }
}

/// Whether the loaded tail's estimated token count warrants compaction
/// before assembling the prompt.
pub fn should_compact(messages: &[Message], threshold_tokens: u64) -> bool {
    messages.iter().map(|m| m.tokens).sum::<u64>() > threshold_tokens
}

/// Result of compacting a message tail: the two synthetic messages that
/// replace the middle, and the sequence the compaction is anchored at.
pub struct CompactionPlan {
    pub prefix: Vec<Message>,
    pub tail: Vec<Message>,
    pub dropped_count: usize,
    pub cutoff_sequence: u64,
}

/// Keep the prefix through the first assistant message and the tail of
/// the last `tail_len` messages, aligned to start on a `user` role; the
/// dropped middle is summarized by the caller into two synthetic messages
/// and persisted as a [`Compaction`] anchored at `cutoff_sequence`.
pub fn plan_compaction(messages: &[Message], tail_len: usize) -> Option<CompactionPlan> {
    let first_assistant = messages.iter().position(|m| m.role == Role::Assistant)?;
    let prefix: Vec<Message> = messages[..=first_assistant].to_vec();

    if messages.len() <= prefix.len() {
        return None;
    }

    let mut tail_start = messages.len().saturating_sub(tail_len).max(prefix.len());
    while tail_start < messages.len() && messages[tail_start].role != Role::User {
        tail_start += 1;
    }
    if tail_start >= messages.len() {
        return None;
    }

    let tail: Vec<Message> = messages[tail_start..].to_vec();
    let dropped_count = tail_start - prefix.len();
    if dropped_count == 0 {
        return None;
    }

    let cutoff_sequence = messages[tail_start - 1].sequence;

    Some(CompactionPlan { prefix, tail, dropped_count, cutoff_sequence })
}

/// Render a [`CompactionPlan`]'s dropped middle as the `summary_text`
/// stored on the persisted [`Compaction`] row — a short, model-legible
/// note rather than an actual re-summarization (no provider call is made
/// here; this is a structural compaction, not a semantic one).
pub fn summarize_dropped(plan: &CompactionPlan) -> String {
    format!(
        "[{} earlier messages omitted to stay within the context budget]",
        plan.dropped_count
    )
}

pub fn build_compaction(session_id: &str, plan: &CompactionPlan) -> Compaction {
    Compaction::new(session_id, summarize_dropped(plan), plan.cutoff_sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::message::{ContentBlock, MessageContent};

    fn text(role: Role, seq: u64) -> Message {
        Message::new_text("s1", role, format!("m{seq}"), 10, seq)
    }

    fn tool_use_msg(seq: u64, ids: &[&str]) -> Message {
        let blocks = ids.iter().map(|id| ContentBlock::tool_use(*id, "t", serde_json::json!({}))).collect();
        Message::new_blocks("s1", Role::Assistant, blocks, 10, seq)
    }

    fn tool_result_msg(seq: u64, ids: &[&str]) -> Message {
        let blocks = ids.iter().map(|id| ContentBlock::tool_result(*id, "ok", false)).collect();
        Message::new_blocks("s1", Role::User, blocks, 10, seq)
    }

    #[test]
    fn repair_keeps_fully_answered_tool_use() {
        let messages = vec![text(Role::User, 1), tool_use_msg(2, &["a"]), tool_result_msg(3, &["a"])];
        let repaired = repair_dangling(messages.clone());
        assert_eq!(repaired.len(), 3);
    }

    #[test]
    fn repair_drops_dangling_tool_use_and_partial_follower() {
        let messages = vec![text(Role::User, 1), tool_use_msg(2, &["a", "b"]), tool_result_msg(3, &["a"])];
        let repaired = repair_dangling(messages);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].sequence, 1);
    }

    #[test]
    fn repair_drops_tool_use_with_no_follower_at_all() {
        let messages = vec![text(Role::User, 1), tool_use_msg(2, &["a"])];
        let repaired = repair_dangling(messages);
        assert_eq!(repaired.len(), 1);
    }

    #[test]
    fn repair_is_a_fixpoint() {
        let messages = vec![text(Role::User, 1), tool_use_msg(2, &["a", "b"]), tool_result_msg(3, &["a"])];
        let once = repair_dangling(messages.clone());
        let twice = repair_dangling(once.clone());
        assert_eq!(once.len(), twice.len());
        assert_eq!(once[0].sequence, twice[0].sequence);
    }

    #[test]
    fn should_compact_respects_threshold() {
        let messages = vec![text(Role::User, 1), text(Role::Assistant, 2)];
        assert!(!should_compact(&messages, 100));
        assert!(should_compact(&messages, 5));
    }

    #[test]
    fn plan_compaction_keeps_prefix_and_aligned_tail() {
        let mut messages = vec![text(Role::User, 1), text(Role::Assistant, 2)];
        for i in 3..=10u64 {
            let role = if i % 2 == 1 { Role::User } else { Role::Assistant };
            messages.push(text(role, i));
        }
        let plan = plan_compaction(&messages, 4).unwrap();
        assert_eq!(plan.prefix.len(), 2);
        assert_eq!(plan.tail[0].role, Role::User);
        assert!(plan.dropped_count > 0);
        assert_eq!(plan.cutoff_sequence, messages[messages.len() - plan.tail.len() - 1].sequence);
    }

    #[test]
    fn plan_compaction_none_when_nothing_to_drop() {
        let messages = vec![text(Role::User, 1), text(Role::Assistant, 2)];
        assert!(plan_compaction(&messages, 20).is_none());
    }

    #[test]
    fn summarize_dropped_reports_count() {
        let mut messages = vec![text(Role::User, 1), text(Role::Assistant, 2)];
        for i in 3..=10u64 {
            let role = if i % 2 == 1 { Role::User } else { Role::Assistant };
            messages.push(text(role, i));
        }
        let plan = plan_compaction(&messages, 4).unwrap();
        let summary = summarize_dropped(&plan);
        assert!(summary.contains(&plan.dropped_count.to_string()));
    }

    #[test]
    fn build_compaction_anchors_at_plan_cutoff() {
        let mut messages = vec![text(Role::User, 1), text(Role::Assistant, 2)];
        for i in 3..=10u64 {
            let role = if i % 2 == 1 { Role::User } else { Role::Assistant };
            messages.push(text(role, i));
        }
        let plan = plan_compaction(&messages, 4).unwrap();
        let compaction = build_compaction("s1", &plan);
        assert_eq!(compaction.cutoff_sequence, plan.cutoff_sequence);
    }

    #[test]
    fn content_blocks_and_message_content_helpers_are_used() {
        // Sanity check that MessageContent's block accessor agrees with
        // the tool_use/tool_result id helpers used above.
        let m = tool_use_msg(1, &["a"]);
        assert!(matches!(m.content, MessageContent::Blocks { .. }));
    }
}
