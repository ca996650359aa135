use async_trait::async_trait;

use crate::error::AgentError;

/// Text completion collaborator. Latency is bounded by the implementation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AgentError>;
}
