use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use quorum_core::{AnalystRole, ToolOutput};
use quorum_store::MetricReader;

use crate::error::AgentError;

/// An analysis tool: `(ticker, as_of) -> {metric, score, rationale}`.
#[async_trait]
pub trait AnalysisTool: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ticker: &str, as_of: NaiveDate) -> Result<ToolOutput, AgentError>;
}

/// Tool names each role runs by default.
pub fn default_tool_names(role: AnalystRole) -> &'static [&'static str] {
    match role {
        AnalystRole::Fundamentals => &["financial_health", "growth", "profitability"],
        AnalystRole::Technical => &["momentum", "trend", "volatility"],
        AnalystRole::Sentiment => &["insider_activity", "news"],
        AnalystRole::Valuation => &["dcf", "relative_multiples"],
    }
}

/// Serves pre-computed outputs from the metric store.
pub struct StoredMetricTool {
    name: String,
    role: AnalystRole,
    reader: Arc<MetricReader>,
}

impl StoredMetricTool {
    pub fn new(name: impl Into<String>, role: AnalystRole, reader: Arc<MetricReader>) -> Self {
        Self {
            name: name.into(),
            role,
            reader,
        }
    }

    /// The default tool set for a role.
    pub fn for_role(role: AnalystRole, reader: &Arc<MetricReader>) -> Vec<Arc<dyn AnalysisTool>> {
        default_tool_names(role)
            .iter()
            .map(|name| {
                Arc::new(StoredMetricTool::new(*name, role, Arc::clone(reader)))
                    as Arc<dyn AnalysisTool>
            })
            .collect()
    }
}

#[async_trait]
impl AnalysisTool for StoredMetricTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ticker: &str, as_of: NaiveDate) -> Result<ToolOutput, AgentError> {
        let outputs = self
            .reader
            .tool_outputs(self.role.as_str(), ticker, as_of)
            .await?;
        outputs
            .iter()
            .find(|o| o.tool == self.name)
            .cloned()
            .ok_or_else(|| {
                AgentError::Tool(format!(
                    "{} has no stored output for {ticker} on {as_of}",
                    self.name
                ))
            })
    }
}
