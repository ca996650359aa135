use quorum_core::{
    Category, NotificationDraft, Signal, SignalOutput, TickerDecision, TradeAction, TurnReply,
    Urgency, VerdictSource,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::AgentError;

const MAX_FALLBACK_REASONING: usize = 500;

const BULLISH_WORDS: &[&str] = &[
    "bullish",
    "buy",
    "upside",
    "outperform",
    "accumulate",
    "uptrend",
];
const BEARISH_WORDS: &[&str] = &[
    "bearish",
    "sell",
    "downside",
    "underperform",
    "reduce",
    "downtrend",
];

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common Claude response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the analysis:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// Extract JSON from a markdown code block (```json ... ``` or ``` ... ```)
fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Find the first balanced { ... } in the text.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse a signal from raw model output.
///
/// Never fails: structured JSON is preferred, then keyword extraction over
/// the free text, then a neutral default. The returned source says which.
pub fn parse_signal_output(raw: &str) -> (SignalOutput, VerdictSource) {
    if let Ok(json_str) = extract_json(raw) {
        if let Ok(output) = serde_json::from_str::<SignalOutput>(&json_str) {
            return (output, VerdictSource::Structured);
        }
    }

    match rule_based_signal(raw) {
        Some(output) => (output, VerdictSource::RuleFallback),
        None => (
            SignalOutput::neutral("No usable signal in model response"),
            VerdictSource::NeutralDefault,
        ),
    }
}

/// Keyword vote over free text. `None` when no direction word appears.
pub fn rule_based_signal(text: &str) -> Option<SignalOutput> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let bullish = words.iter().filter(|w| BULLISH_WORDS.contains(w)).count();
    let bearish = words.iter().filter(|w| BEARISH_WORDS.contains(w)).count();
    let neutral = words.iter().any(|w| *w == "neutral" || *w == "hold");

    let signal = match bullish.cmp(&bearish) {
        std::cmp::Ordering::Greater => Signal::Bullish,
        std::cmp::Ordering::Less => Signal::Bearish,
        std::cmp::Ordering::Equal if bullish > 0 || neutral => Signal::Neutral,
        std::cmp::Ordering::Equal => return None,
    };

    let confidence = confidence_after_keyword(&words).unwrap_or(Decimal::from(50));
    let reasoning: String = text.trim().chars().take(MAX_FALLBACK_REASONING).collect();

    Some(SignalOutput {
        signal,
        confidence: quorum_core::signal::clamp_confidence(confidence),
        reasoning,
        signal_adjustment: None,
    })
}

/// First number within three words after "confidence".
fn confidence_after_keyword(words: &[&str]) -> Option<Decimal> {
    let pos = words.iter().position(|w| *w == "confidence")?;
    words[pos + 1..]
        .iter()
        .take(3)
        .find_map(|w| w.parse::<u32>().ok())
        .map(Decimal::from)
}

/// Parse a conversation reply. Free text becomes the message content.
pub fn parse_turn_reply(raw: &str) -> TurnReply {
    if let Ok(json_str) = extract_json(raw) {
        if let Ok(reply) = serde_json::from_str::<TurnReply>(&json_str) {
            return reply;
        }
    }
    TurnReply {
        content: raw.trim().to_string(),
        wants_another_turn: false,
    }
}

#[derive(Debug, Deserialize)]
struct NotifyDecision {
    should_notify: bool,
    #[serde(default)]
    content: String,
    #[serde(default = "default_urgency")]
    urgency: Urgency,
    #[serde(default = "default_category")]
    category: Category,
}

fn default_urgency() -> Urgency {
    Urgency::Low
}

fn default_category() -> Category {
    Category::General
}

/// Parse the post-analysis notify decision. `Ok(None)` means stay silent.
pub fn parse_notification_decision(raw: &str) -> Result<Option<NotificationDraft>, AgentError> {
    let json_str = extract_json(raw)?;
    let decision: NotifyDecision = serde_json::from_str(&json_str)
        .map_err(|e| AgentError::Parse(format!("Failed to parse notify decision: {e}")))?;

    if !decision.should_notify || decision.content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(NotificationDraft {
        content: decision.content,
        urgency: decision.urgency,
        category: decision.category,
    }))
}

#[derive(Debug, Deserialize)]
struct PortfolioDecisions {
    decisions: Vec<TickerDecision>,
}

/// Parse the portfolio manager's per-ticker decisions.
pub fn parse_portfolio_decisions(raw: &str) -> Result<Vec<TickerDecision>, AgentError> {
    let json_str = extract_json(raw)?;
    let parsed: PortfolioDecisions = serde_json::from_str(&json_str).map_err(|e| {
        AgentError::Parse(format!("Failed to parse portfolio decisions: {e}\nJSON: {json_str}"))
    })?;
    Ok(parsed
        .decisions
        .into_iter()
        .map(|mut d| {
            d.confidence = quorum_core::signal::clamp_confidence(d.confidence);
            if d.quantity.is_sign_negative() {
                d.quantity = d.quantity.abs();
            }
            if d.quantity.is_zero() {
                d.action = TradeAction::Hold;
            }
            d
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"signal": "bullish", "confidence": 70}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my analysis:\n```json\n{\"confidence\": 75}\n```\nDone.";
        assert_eq!(extract_json(input).unwrap(), r#"{"confidence": 75}"#);
    }

    #[test]
    fn extract_with_braces_in_strings() {
        let input = r#"Result: {"reasoning": "range {low} to {high}", "confidence": 50}"#;
        let parsed: serde_json::Value =
            serde_json::from_str(&extract_json(input).unwrap()).unwrap();
        assert_eq!(parsed["confidence"], 50);
    }

    #[test]
    fn extract_no_json() {
        assert!(extract_json("plain text only").is_err());
        assert!(extract_json("} stray closing brace").is_err());
    }

    #[test]
    fn structured_signal_from_markdown_block() {
        let raw = concat!(
            "```json\n",
            r#"{"signal": "bearish", "confidence": 64, "reasoning": "margin compression"}"#,
            "\n```"
        );
        let (output, source) = parse_signal_output(raw);
        assert_eq!(source, VerdictSource::Structured);
        assert_eq!(output.signal, Signal::Bearish);
        assert_eq!(output.confidence, dec!(64));
    }

    #[test]
    fn structured_signal_with_prefix_and_adjustment() {
        let raw = "After the meeting I revise:\n{\"signal\": \"neutral\", \"confidence\": \"55\", \
                   \"reasoning\": \"risk warning\", \"signal_adjustment\": true}";
        let (output, source) = parse_signal_output(raw);
        assert_eq!(source, VerdictSource::Structured);
        assert_eq!(output.signal_adjustment, Some(true));
    }

    #[test]
    fn free_text_falls_back_to_keywords() {
        let raw = "Momentum is strong and I am bullish on the breakout, confidence 72 percent.";
        let (output, source) = parse_signal_output(raw);
        assert_eq!(source, VerdictSource::RuleFallback);
        assert_eq!(output.signal, Signal::Bullish);
        assert_eq!(output.confidence, dec!(72));
        assert_eq!(output.signal_adjustment, None);
    }

    #[test]
    fn keyword_fallback_defaults_confidence() {
        let output = rule_based_signal("Sell. Downside risk dominates.").unwrap();
        assert_eq!(output.signal, Signal::Bearish);
        assert_eq!(output.confidence, dec!(50));
    }

    #[test]
    fn unparseable_text_is_neutral_default() {
        let (output, source) = parse_signal_output("The quarter was eventful.");
        assert_eq!(source, VerdictSource::NeutralDefault);
        assert_eq!(output.signal, Signal::Neutral);
        assert_eq!(output.confidence, dec!(50));
    }

    #[test]
    fn turn_reply_json_and_free_text() {
        let reply =
            parse_turn_reply(r#"{"content": "I disagree on AAPL", "wants_another_turn": true}"#);
        assert!(reply.wants_another_turn);
        assert_eq!(reply.content, "I disagree on AAPL");

        let reply = parse_turn_reply("  Fine by me.  ");
        assert_eq!(reply.content, "Fine by me.");
        assert!(!reply.wants_another_turn);
    }

    #[test]
    fn notification_decision() {
        let raw = concat!(
            r#"{"should_notify": true, "content": "Guidance cut", "#,
            r#""urgency": "high", "category": "risk_warning"}"#
        );
        let draft = parse_notification_decision(raw).unwrap().unwrap();
        assert_eq!(draft.urgency, Urgency::High);
        assert_eq!(draft.category, Category::RiskWarning);

        assert!(parse_notification_decision(r#"{"should_notify": false}"#).unwrap().is_none());
        assert!(parse_notification_decision("no").is_err());
    }

    #[test]
    fn portfolio_decisions_are_normalized() {
        let raw = r#"{"decisions": [
            {"ticker": "AAPL", "action": "long", "quantity": "50", "confidence": 120,
             "reasoning": "consensus"},
            {"ticker": "MSFT", "action": "short", "quantity": 0, "confidence": 40,
             "reasoning": "split"}
        ]}"#;
        let decisions = parse_portfolio_decisions(raw).unwrap();
        assert_eq!(decisions[0].confidence, dec!(100));
        assert_eq!(decisions[1].action, TradeAction::Hold);
    }
}
