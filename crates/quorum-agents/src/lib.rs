pub mod analyst;
pub mod broker;
pub mod claude_cli;
pub mod communication;
pub mod decision;
pub mod error;
pub mod llm;
pub mod memory;
pub mod parser;
pub mod prompts;
pub mod scheduler;
pub mod signal_store;
pub mod tools;

pub mod test_support;

pub use analyst::{Analyst, LlmAnalyst};
pub use broker::NotificationBroker;
pub use claude_cli::ClaudeCli;
pub use communication::{CommunicationEngine, CommunicationOutcome, SessionPlan};
pub use decision::{
    DecisionInput, LlmPortfolioManager, PortfolioManager, RiskManager, RulePortfolioManager,
    RuleRiskManager,
};
pub use error::AgentError;
pub use llm::LanguageModel;
pub use memory::AgentMemory;
pub use scheduler::{
    AnalystInputs, AnalystScheduler, RoundContext, ScheduleOutcome, SchedulerConfig,
};
pub use signal_store::SignalStore;
pub use tools::{AnalysisTool, StoredMetricTool};
