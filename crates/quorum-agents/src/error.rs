use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Language model error: {0}")]
    Llm(String),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Store error: {0}")]
    Store(#[from] quorum_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// How a recovered occurrence of this error is reported.
    pub fn failure_kind(&self) -> quorum_core::FailureKind {
        use quorum_core::FailureKind;
        match self {
            AgentError::Timeout(_) => FailureKind::Timeout,
            AgentError::Parse(_) | AgentError::Json(_) => FailureKind::Parse,
            AgentError::Tool(_) | AgentError::Llm(_) | AgentError::Store(_) => FailureKind::Tool,
            AgentError::Configuration(_) | AgentError::Invariant(_) => FailureKind::Analyst,
        }
    }
}
