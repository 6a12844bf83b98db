//! Prompt budgeter: fits a conversation into the backend's context window.
//!
//! [`assemble`] keeps the system prompt and the most recent turn verbatim and,
//! when the prompt runs past 95 % of the ceiling, replaces everything in
//! between with one summary produced by [`summarize`].
//!
//! ```text
//! [head, m1, m2, ..., mk, t1, t2]  ->  [head, summary(m1..mk), t1, t2]
//! ```

use thiserror::Error;
use tracing::debug;

use crate::error::ValidationError;
use crate::llm::ChatBackend;
use crate::message::{Message, SYSTEM};
use crate::subsystems::agents::AgentError;

/// Instruction placed before the summarized texts.
pub const SUMMARY_PREAMBLE: &str = "Summarize the following conversation segment.";

/// Share of the ceiling a prompt may use before the budgeter intervenes.
const MARGIN_PERCENT: usize = 95;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error("system prompt needs {needed} tokens but the ceiling is {ceiling}")]
    SystemPromptTooLarge { needed: usize, ceiling: usize },

    #[error("prompt needs {total} tokens of {ceiling} and has nothing left to summarize")]
    Irreducible { total: usize, ceiling: usize },

    #[error("head and tail use {used} of {ceiling} tokens, leaving no room for a summary")]
    NoRoomForSummary { used: usize, ceiling: usize },

    #[error("summary budget is zero")]
    ZeroSummaryBudget,

    #[error("summary needs {measured} tokens but its budget is {budget}")]
    SummaryTooLarge { measured: usize, budget: usize },
}

/// `total` fits inside the safety margin of `ceiling`.
pub fn within_margin(total: usize, ceiling: usize) -> bool {
    total.saturating_mul(100) <= ceiling.saturating_mul(MARGIN_PERCENT)
}

/// Largest token total that still fits the margin of `ceiling`.
pub fn margin_tokens(ceiling: usize) -> usize {
    ceiling.saturating_mul(MARGIN_PERCENT) / 100
}

/// Fit `messages` (system prompt first, every entry measured) under `ceiling`.
///
/// Returns the input unchanged when it already fits the margin.  Otherwise
/// the span between the head and the tail is summarized: the tail is the
/// last two messages, or the last one when at most two follow the head.
pub async fn assemble(
    backend: &ChatBackend,
    agent: &str,
    messages: Vec<Message>,
    ceiling: usize,
) -> Result<Vec<Message>, AgentError> {
    if messages.is_empty() {
        return Err(ValidationError::Invalid("cannot assemble an empty prompt".into()).into());
    }
    let tokens = messages
        .iter()
        .map(Message::measured_tokens)
        .collect::<Result<Vec<_>, _>>()?;

    if tokens[0] > ceiling {
        return Err(BudgetError::SystemPromptTooLarge { needed: tokens[0], ceiling }.into());
    }

    let total: usize = tokens.iter().sum();
    if within_margin(total, ceiling) {
        return Ok(messages);
    }

    let rest = messages.len() - 1;
    let tail_len = match rest {
        0 => 0,
        1 | 2 => 1,
        _ => 2,
    };
    let tail_start = messages.len() - tail_len;

    if tail_start == 1 {
        // Nothing between head and tail; only the margin is exceeded.
        return if total <= ceiling {
            Ok(messages)
        } else {
            Err(BudgetError::Irreducible { total, ceiling }.into())
        };
    }

    let used = tokens[0] + tokens[tail_start..].iter().sum::<usize>();
    if used >= ceiling {
        return Err(BudgetError::NoRoomForSummary { used, ceiling }.into());
    }
    let budget = ceiling - used;

    debug!(
        agent,
        total,
        ceiling,
        summarized = tail_start - 1,
        budget,
        "prompt over budget, summarizing middle span"
    );

    let mut messages = messages;
    let tail = messages.split_off(tail_start);
    let middle = messages.split_off(1);
    let summary = summarize(backend, agent, &middle, budget).await?;

    let measured = summary.measured_tokens()?;
    if measured > budget {
        return Err(BudgetError::SummaryTooLarge { measured, budget }.into());
    }

    messages.push(summary);
    messages.extend(tail);
    Ok(messages)
}

/// One backend call condensing `messages` into a `System` message for
/// `agent`, stamped with the oldest input's timestamp.
pub async fn summarize(
    backend: &ChatBackend,
    agent: &str,
    messages: &[Message],
    token_budget: usize,
) -> Result<Message, AgentError> {
    let oldest = messages
        .first()
        .ok_or_else(|| ValidationError::Invalid("nothing to summarize".into()))?;
    if token_budget == 0 {
        return Err(BudgetError::ZeroSummaryBudget.into());
    }

    let mut request_text = SUMMARY_PREAMBLE.to_string();
    for m in messages {
        request_text.push_str("\n\n");
        request_text.push_str(m.text());
    }
    let request = Message::new(SYSTEM, Some(agent), request_text)?;

    let reply = backend.send(std::slice::from_ref(&request), Some(token_budget)).await?;
    let tokens = backend.message_size(&reply).await?;

    Ok(Message::at(SYSTEM, Some(agent), reply, oldest.timestamp())?.with_tokens(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmProvider, MessageTemplate, RetryPolicy};
    use chrono::{Duration, TimeZone, Utc};

    fn backend(context: usize) -> (DummyProvider, ChatBackend) {
        let p = DummyProvider::new(context, MessageTemplate::default());
        (p.clone(), ChatBackend::new(LlmProvider::Dummy(p), RetryPolicy::none()))
    }

    /// A message whose text is `tokens` words long, measured.
    fn words(from: &str, label: &str, tokens: usize, offset: i64) -> Message {
        let text = (0..tokens).map(|i| format!("{label}{i}")).collect::<Vec<_>>().join(" ");
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(offset);
        Message::at(from, Some("Bob"), text, ts).unwrap().with_tokens(tokens)
    }

    fn prompt(sizes: &[usize]) -> Vec<Message> {
        let mut out = vec![words(SYSTEM, "sys", sizes[0], 0)];
        for (i, &n) in sizes[1..].iter().enumerate() {
            out.push(words("Alice", &format!("m{i}_"), n, i as i64 + 1));
        }
        out
    }

    fn total(messages: &[Message]) -> usize {
        messages.iter().map(|m| m.tokens().unwrap()).sum()
    }

    #[tokio::test]
    async fn oversize_system_prompt_is_a_budget_error() {
        let (_, b) = backend(100);
        for sizes in [&[101][..], &[150, 1], &[101, 1, 1, 1]] {
            let err = assemble(&b, "Bob", prompt(sizes), 100).await.unwrap_err();
            assert!(matches!(err, AgentError::Budget(BudgetError::SystemPromptTooLarge { .. })));
        }
    }

    #[tokio::test]
    async fn within_margin_passes_through_unchanged() {
        let (p, b) = backend(100);
        for sizes in [&[10][..], &[10, 40, 45], &[95], &[30, 30, 30, 5]] {
            let input = prompt(sizes);
            let out = assemble(&b, "Bob", input.clone(), 100).await.unwrap();
            assert_eq!(out, input);
        }
        assert!(p.calls().is_empty());
    }

    #[test]
    fn margin_is_integer_exact() {
        assert!(within_margin(95, 100));
        assert!(!within_margin(96, 100));
        assert!(within_margin(19, 20));
        assert!(!within_margin(20, 20));
        assert!(within_margin(0, 0));
        assert_eq!(margin_tokens(100), 95);
        assert_eq!(margin_tokens(20), 19);
    }

    #[tokio::test]
    async fn head_and_last_two_are_kept_verbatim() {
        let (p, b) = backend(100);
        let input = prompt(&[10, 30, 30, 20, 15]);
        let out = assemble(&b, "Bob", input.clone(), 100).await.unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(out[0], input[0]);
        assert_eq!(out[2..], input[3..]);
        assert!(total(&out) <= 100);

        let calls = p.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].max_tokens, Some(100 - 10 - 20 - 15));
        let request = calls[0].messages[0].text();
        assert!(request.starts_with(SUMMARY_PREAMBLE));
        assert!(request.contains(input[1].text()));
        assert!(request.contains(input[2].text()));
        assert!(!request.contains(input[3].text()));
    }

    #[tokio::test]
    async fn three_after_head_keeps_last_two() {
        let (p, b) = backend(100);
        let input = prompt(&[10, 50, 20, 20]);
        let out = assemble(&b, "Bob", input.clone(), 100).await.unwrap();
        assert_eq!(out[0], input[0]);
        assert_eq!(out[2..], input[2..]);
        assert_eq!(p.calls()[0].max_tokens, Some(50));
    }

    #[tokio::test]
    async fn two_after_head_keeps_last_one() {
        let (p, b) = backend(100);
        let input = prompt(&[10, 85, 20]);
        let out = assemble(&b, "Bob", input.clone(), 100).await.unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], input[0]);
        assert_eq!(out[2], input[2]);
        assert_eq!(p.calls()[0].max_tokens, Some(70));
        assert!(total(&out) <= 100);
    }

    #[tokio::test]
    async fn summary_is_system_authored_and_oldest_stamped() {
        let (_, b) = backend(100);
        let input = prompt(&[10, 30, 30, 20, 15]);
        let out = assemble(&b, "Bob", input.clone(), 100).await.unwrap();
        let summary = &out[1];
        assert_eq!(summary.from(), SYSTEM);
        assert_eq!(summary.to(), "Bob");
        assert_eq!(summary.timestamp(), input[1].timestamp());
        assert!(summary.tokens().is_some());
    }

    #[tokio::test]
    async fn head_plus_one_over_ceiling_is_irreducible() {
        let (_, b) = backend(100);
        let err = assemble(&b, "Bob", prompt(&[60, 50]), 100).await.unwrap_err();
        assert!(matches!(err, AgentError::Budget(BudgetError::Irreducible { total: 110, ceiling: 100 })));
    }

    #[tokio::test]
    async fn head_plus_one_inside_ceiling_passes() {
        let (p, b) = backend(100);
        let input = prompt(&[50, 48]);
        assert_eq!(assemble(&b, "Bob", input.clone(), 100).await.unwrap(), input);
        assert!(p.calls().is_empty());
    }

    #[tokio::test]
    async fn no_room_for_summary_errors_without_calling_backend() {
        let (p, b) = backend(100);
        let err = assemble(&b, "Bob", prompt(&[50, 10, 30, 20]), 100).await.unwrap_err();
        assert!(matches!(err, AgentError::Budget(BudgetError::NoRoomForSummary { used: 100, .. })));
        assert!(p.calls().is_empty());
    }

    #[tokio::test]
    async fn oversize_summary_is_rejected() {
        let (p, b) = backend(100);
        p.push_reply((0..60).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" "));
        let err = assemble(&b, "Bob", prompt(&[10, 50, 20, 20]), 100).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Budget(BudgetError::SummaryTooLarge { measured: 60, budget: 50 })
        ));
    }

    #[tokio::test]
    async fn unmeasured_or_empty_input_is_a_validation_error() {
        let (_, b) = backend(100);
        let err = assemble(&b, "Bob", Vec::new(), 100).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let raw = vec![Message::new(SYSTEM, Some("Bob"), "hi").unwrap()];
        let err = assemble(&b, "Bob", raw, 100).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(ValidationError::Unmeasured { .. })));
    }

    #[tokio::test]
    async fn summarize_rejects_empty_input_and_zero_budget() {
        let (p, b) = backend(100);
        assert!(matches!(
            summarize(&b, "Bob", &[], 10).await.unwrap_err(),
            AgentError::Validation(_)
        ));
        assert!(matches!(
            summarize(&b, "Bob", &prompt(&[1, 1]), 0).await.unwrap_err(),
            AgentError::Budget(BudgetError::ZeroSummaryBudget)
        ));
        assert!(p.calls().is_empty());
    }

    #[tokio::test]
    async fn summarize_joins_texts_with_blank_lines() {
        let (p, b) = backend(100);
        let msgs = vec![
            Message::new("Alice", Some("Bob"), "first").unwrap(),
            Message::new("Bob", Some("Alice"), "second").unwrap(),
        ];
        summarize(&b, "Bob", &msgs, 5).await.unwrap();
        let call = &p.calls()[0];
        assert_eq!(call.messages.len(), 1);
        assert_eq!(call.messages[0].text(), format!("{SUMMARY_PREAMBLE}\n\nfirst\n\nsecond"));
        assert_eq!(call.max_tokens, Some(5));
    }
}
