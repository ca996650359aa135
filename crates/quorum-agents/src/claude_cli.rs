//! [`LanguageModel`] adapter over the `claude` command-line tool.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::llm::LanguageModel;

const DEFAULT_BINARY: &str = "claude";
/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 500;

/// Model and deadline for one `claude` invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(45),
        }
    }
}

fn cli_args<'a>(system_prompt: &'a str, user_prompt: &'a str, model: &'a str) -> [&'a str; 8] {
    [
        "-p",
        user_prompt,
        "--system-prompt",
        system_prompt,
        "--model",
        model,
        "--output-format",
        "text",
    ]
}

fn excerpt(text: &str) -> &str {
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn run_cli(
    binary: &str,
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    let started = Instant::now();
    let output = tokio::time::timeout(
        config.timeout,
        Command::new(binary)
            .args(cli_args(system_prompt, user_prompt, &config.model))
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| AgentError::Timeout(config.timeout.as_secs()))?
    .map_err(|e| AgentError::Llm(format!("failed to spawn {binary}: {e}")))?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(model = %config.model, status = %output.status, elapsed_ms, "Model call failed");
        return Err(AgentError::Llm(format!(
            "{binary} exited {}: {}",
            output.status,
            excerpt(&stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(AgentError::Llm(format!("{binary} returned an empty response")));
    }
    debug!(model = %config.model, elapsed_ms, bytes = stdout.len(), "Model call complete");
    Ok(stdout)
}

/// Run the `claude` CLI once and return its raw stdout.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    run_cli(DEFAULT_BINARY, system_prompt, user_prompt, config).await
}

/// Whether `claude --version` runs successfully.
pub async fn check_cli_available() -> bool {
    Command::new(DEFAULT_BINARY)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Language model backed by the `claude` binary.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: String,
    config: ClaudeCliConfig,
}

impl ClaudeCli {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            config: ClaudeCliConfig {
                model: model.into(),
                timeout,
            },
        }
    }

    /// Use a different executable with the same argument protocol.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl LanguageModel for ClaudeCli {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AgentError> {
        run_cli(&self.binary, system, prompt, &self.config).await
    }
}
