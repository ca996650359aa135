use thiserror::Error;

/// Failures that abort a trading day. Everything an analyst or tool can get
/// wrong is recovered inside the day and never surfaces here.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Clock error: {0}")]
    Clock(#[from] quorum_core::ClockError),

    #[error("Calendar error: {0}")]
    Calendar(String),

    #[error("Configuration error: {0}")]
    Config(#[from] quorum_core::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] quorum_store::StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] quorum_agents::AgentError),
}
