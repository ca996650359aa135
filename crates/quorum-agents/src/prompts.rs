use quorum_core::{
    AnalysisRequest, AnalystRole, ConversationTurn, SessionKind, SignalRecord, ToolOutput,
};

/// Schema description included in all analyst system prompts.
fn signal_schema() -> String {
    let example = serde_json::json!({
        "signal": "bullish | bearish | neutral",
        "confidence": 70,
        "reasoning": "<two or three sentences citing the tool outputs>"
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn revision_schema() -> String {
    let example = serde_json::json!({
        "signal": "bullish | bearish | neutral",
        "confidence": 55,
        "reasoning": "<what you learned and why it does or does not change your view>",
        "signal_adjustment": true
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn role_focus(role: AnalystRole) -> &'static str {
    match role {
        AnalystRole::Fundamentals => {
            "You assess business quality: profitability, growth, balance-sheet health \
             and cash generation. Weigh durable trends above a single quarter."
        }
        AnalystRole::Technical => {
            "You read price action: trend, momentum, volatility and volume. \
             Favour confirmed signals over single indicators."
        }
        AnalystRole::Sentiment => {
            "You gauge market mood: news flow, insider activity and positioning. \
             Flag sharp shifts in tone early."
        }
        AnalystRole::Valuation => {
            "You judge price against value: discounted cash flow, relative multiples \
             and implied growth. A cheap stock can stay cheap; say so."
        }
    }
}

pub fn analyst_system_prompt(role: AnalystRole) -> String {
    format!(
        "You are the {role} analyst on a trading team of four analysts \
         (fundamentals, technical, sentiment, valuation), a risk manager and a \
         portfolio manager. {focus}\n\n\
         ## OUTPUT FORMAT\n\n\
         Respond with ONLY a JSON object:\n{schema}\n\n\
         `confidence` is 0-100. Use 50 with a neutral signal when the evidence is mixed.",
        focus = role_focus(role),
        schema = signal_schema(),
    )
}

/// Round-1 prompt for one ticker.
pub fn signal_prompt(request: &AnalysisRequest, ticker: &str, tools: &[ToolOutput]) -> String {
    let mut prompt = format!(
        "Ticker: {ticker}\nDate: {date}\n\n## TOOL OUTPUTS\n",
        date = request.as_of
    );
    push_tool_outputs(&mut prompt, tools);
    push_pipeline_context(&mut prompt, request);
    prompt.push_str("\nGive your independent signal for this ticker.");
    prompt
}

/// Round-2 prompt: the analyst reconsiders its round-1 call.
pub fn revision_prompt(
    request: &AnalysisRequest,
    ticker: &str,
    tools: &[ToolOutput],
    prior: Option<&SignalRecord>,
) -> String {
    let mut prompt = format!(
        "Ticker: {ticker}\nDate: {date}\n\n",
        date = request.as_of
    );

    if let Some(prior) = prior {
        prompt.push_str(&format!(
            "## YOUR ROUND-1 SIGNAL\n{} at confidence {}: {}\n\n",
            prior.signal, prior.confidence, prior.reasoning
        ));
    }

    prompt.push_str("## TOOL OUTPUTS\n");
    push_tool_outputs(&mut prompt, tools);

    if !request.notifications.is_empty() {
        prompt.push_str("\n## NOTIFICATIONS RECEIVED\n");
        for n in &request.notifications {
            prompt.push_str(&format!(
                "- [{:?}/{:?}] {}: {}\n",
                n.urgency, n.category, n.sender_agent_id, n.content
            ));
        }
    }

    let sessions: Vec<_> = request
        .sessions
        .iter()
        .filter(|s| s.topic_tickers.iter().any(|t| t == ticker))
        .collect();
    if !sessions.is_empty() {
        prompt.push_str("\n## DISCUSSIONS\n");
        for session in sessions {
            prompt.push_str(&format!(
                "### {} with {}\n",
                kind_label(session.kind),
                session.participants.join(", ")
            ));
            for msg in &session.messages {
                prompt.push_str(&format!("{}: {}\n", msg.speaker, msg.content));
            }
        }
    }

    push_history(&mut prompt, &request.historical_context);
    push_pipeline_context(&mut prompt, request);

    prompt.push_str(&format!(
        "\nReconsider your signal. Set `signal_adjustment` to true only if you change it; \
         otherwise set it to false.\n\nRespond with ONLY a JSON object:\n{}",
        revision_schema()
    ));
    prompt
}

pub fn conversation_system_prompt(role: AnalystRole) -> String {
    format!(
        "You are the {role} analyst in a discussion with colleagues. {focus}\n\n\
         Keep each contribution under 120 words. Defend your view with evidence, \
         and concede when a colleague's point is stronger.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"content\": \"<your message>\", \"wants_another_turn\": false}}\n\n\
         Set `wants_another_turn` to true only if an open disagreement remains.",
        focus = role_focus(role),
    )
}

pub fn conversation_prompt(turn: &ConversationTurn) -> String {
    let mut prompt = format!(
        "{kind} with {others} about {tickers} (cycle {cycle}).\n\n## YOUR SIGNALS\n",
        kind = kind_label(turn.kind),
        others = turn
            .participants
            .iter()
            .filter(|p| **p != turn.speaker)
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        tickers = turn.tickers.join(", "),
        cycle = turn.cycle,
    );
    for (ticker, record) in &turn.own_signals {
        prompt.push_str(&format!(
            "- {ticker}: {} at {} ({})\n",
            record.signal, record.confidence, record.reasoning
        ));
    }

    if !turn.recent_notifications.is_empty() {
        prompt.push_str("\n## RECENT NOTIFICATIONS\n");
        for n in &turn.recent_notifications {
            prompt.push_str(&format!("- {}: {}\n", n.sender_agent_id, n.content));
        }
    }

    push_history(&mut prompt, &turn.historical_context);

    prompt.push_str("\n## TRANSCRIPT\n");
    if turn.transcript.is_empty() {
        prompt.push_str("(you speak first)\n");
    }
    for msg in &turn.transcript {
        prompt.push_str(&format!("{}: {}\n", msg.speaker, msg.content));
    }
    prompt
}

pub fn notify_system_prompt() -> String {
    "You decide whether your fresh analysis warrants alerting the rest of the team. \
     Alert only on material, time-sensitive findings.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"should_notify\": false, \"content\": \"<one sentence>\", \
     \"urgency\": \"low | medium | high | critical\", \
     \"category\": \"market_alert | risk_warning | opportunity | policy_update | general\"}"
        .to_string()
}

pub fn notify_prompt(analyst_id: &str, signals: &[(&str, &quorum_core::SignalOutput)]) -> String {
    let mut prompt = format!("Analyst: {analyst_id}\n\n## YOUR SIGNALS\n");
    for (ticker, output) in signals {
        prompt.push_str(&format!(
            "- {ticker}: {} at {} ({})\n",
            output.signal, output.confidence, output.reasoning
        ));
    }
    prompt
}

pub fn portfolio_manager_system_prompt() -> String {
    "You are the portfolio manager. You receive every analyst's final signal per \
     ticker and the risk manager's limits, and decide one action per ticker.\n\n\
     Never exceed `max_position_value`. Prefer `hold` when analysts are split.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"decisions\": [{\"ticker\": \"AAPL\", \"action\": \"long | short | hold\", \
     \"quantity\": 100, \"confidence\": 60, \"reasoning\": \"<short>\"}]}"
        .to_string()
}

fn push_tool_outputs(prompt: &mut String, tools: &[ToolOutput]) {
    if tools.is_empty() {
        prompt.push_str("(no tool output available)\n");
    }
    for t in tools {
        prompt.push_str(&format!(
            "- {} / {}: score {:.2}. {}\n",
            t.tool, t.metric, t.score, t.rationale
        ));
    }
}

fn push_pipeline_context(prompt: &mut String, request: &AnalysisRequest) {
    if request.pipeline_context.is_empty() {
        return;
    }
    prompt.push_str("\n## CONTEXT\n");
    for (key, value) in &request.pipeline_context {
        prompt.push_str(&format!("- {key}: {value}\n"));
    }
}

fn push_history(prompt: &mut String, history: &[String]) {
    if history.is_empty() {
        return;
    }
    prompt.push_str("\n## FROM YOUR PAST DAYS\n");
    for snippet in history {
        prompt.push_str(&format!("- {snippet}\n"));
    }
}

fn kind_label(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::PrivateChat => "Private chat",
        SessionKind::Meeting => "Meeting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use quorum_core::{Round, Signal, SignalOutput};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn request(round: Round) -> AnalysisRequest {
        AnalysisRequest {
            request_id: Uuid::new_v4(),
            analyst_id: "valuation_analyst".to_string(),
            role: AnalystRole::Valuation,
            tickers: vec!["AAPL".to_string()],
            as_of: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            round,
            prior_signals: BTreeMap::new(),
            notifications: vec![],
            sessions: vec![],
            pipeline_context: [(
                "market_outlook".to_string(),
                serde_json::json!("risk-off"),
            )]
            .into(),
            historical_context: vec![],
        }
    }

    #[test]
    fn every_role_has_a_system_prompt() {
        for role in AnalystRole::ALL {
            let prompt = analyst_system_prompt(role);
            assert!(prompt.contains(role.as_str()));
            assert!(prompt.contains("\"confidence\""));
        }
    }

    #[test]
    fn signal_prompt_lists_tools_and_context() {
        let tools = vec![ToolOutput {
            tool: "dcf".to_string(),
            metric: "upside_pct".to_string(),
            score: 0.12,
            rationale: "12% below intrinsic value".to_string(),
        }];
        let prompt = signal_prompt(&request(Round::One), "AAPL", &tools);
        assert!(prompt.contains("dcf / upside_pct: score 0.12"));
        assert!(prompt.contains("market_outlook"));
    }

    #[test]
    fn revision_prompt_includes_prior_signal() {
        let prior = SignalRecord::from_output(
            "valuation_analyst",
            "AAPL",
            &SignalOutput {
                signal: Signal::Bullish,
                confidence: dec!(70),
                reasoning: "cheap".to_string(),
                signal_adjustment: None,
            },
            Round::One,
            Utc::now(),
        );
        let prompt = revision_prompt(&request(Round::Two), "AAPL", &[], Some(&prior));
        assert!(prompt.contains("bullish at confidence 70"));
        assert!(prompt.contains("signal_adjustment"));
    }
}
