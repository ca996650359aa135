//! Integration tests that invoke the real Claude CLI.
//!
//! These tests are `#[ignore]` by default; they need the `claude` CLI on PATH
//! with valid credentials.
//!
//! Run explicitly with:
//! ```bash
//! cargo test -p quorum-agents --test cli_integration -- --ignored
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use quorum_agents::claude_cli::{check_cli_available, invoke_claude, ClaudeCliConfig};
use quorum_agents::parser::{extract_json, parse_turn_reply};
use quorum_agents::test_support::StaticTool;
use quorum_agents::{AnalysisTool, Analyst, ClaudeCli, LanguageModel, LlmAnalyst};
use quorum_core::{AnalysisRequest, AnalystRole, Round};
use rust_decimal::Decimal;
use uuid::Uuid;

const MODEL: &str = "claude-3-5-haiku-latest";

#[tokio::test]
#[ignore]
async fn cli_is_available() {
    assert!(check_cli_available().await, "claude CLI not found on PATH");
}

/// Catches changes in the CLI's output wrapping that would break extraction.
#[tokio::test]
#[ignore]
async fn cli_output_is_parseable_json() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: MODEL.to_string(),
        timeout: Duration::from_secs(30),
    };
    let system_prompt = concat!(
        "You are a test agent. Respond ONLY with a JSON object, no other text.\n",
        "The JSON must have exactly these fields:\n",
        "- \"status\": the string \"ok\"\n",
        "- \"echo\": repeat back the user's message exactly\n",
    );

    let raw = invoke_claude(system_prompt, "ping", &config)
        .await
        .expect("Claude CLI invocation failed");
    let json_str = extract_json(&raw)
        .unwrap_or_else(|e| panic!("No JSON in CLI output ({e}):\n---\n{raw}\n---"));
    let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();
    assert_eq!(parsed["status"], "ok", "Unexpected response: {parsed}");
}

#[tokio::test]
#[ignore]
async fn cli_reports_errors_for_invalid_model() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let llm = ClaudeCli::new("no-such-model", Duration::from_secs(30));
    assert!(llm.complete("Reply with OK.", "ping").await.is_err());
}

/// A full round-1 call: tools, prompt, CLI, parse.
#[tokio::test]
#[ignore]
async fn live_analyst_returns_a_signal_per_ticker() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let analyst = LlmAnalyst::new(
        "technical_analyst",
        AnalystRole::Technical,
        Arc::new(ClaudeCli::new(MODEL, Duration::from_secs(60))),
        vec![Arc::new(StaticTool::new("momentum", 0.8)) as Arc<dyn AnalysisTool>],
    );
    let request = AnalysisRequest {
        request_id: Uuid::new_v4(),
        analyst_id: "technical_analyst".to_string(),
        role: AnalystRole::Technical,
        tickers: vec!["AAPL".to_string()],
        as_of: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
        round: Round::One,
        prior_signals: BTreeMap::new(),
        notifications: Vec::new(),
        sessions: Vec::new(),
        pipeline_context: BTreeMap::new(),
        historical_context: Vec::new(),
    };

    let report = analyst.analyze(&request).await.expect("analysis failed");
    let output = &report.signals["AAPL"];
    assert!(output.confidence >= Decimal::ZERO && output.confidence <= Decimal::ONE_HUNDRED);
    assert!(!output.reasoning.is_empty());
}

#[tokio::test]
#[ignore]
async fn live_turn_reply_parses() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let llm = ClaudeCli::new(MODEL, Duration::from_secs(30));
    let raw = llm
        .complete(
            "Respond ONLY with JSON: {\"content\": string, \"wants_another_turn\": bool}",
            "Say hello to the other analysts and do not ask for another turn.",
        )
        .await
        .expect("Claude CLI invocation failed");
    let reply = parse_turn_reply(&raw);
    assert!(!reply.content.is_empty());
}
