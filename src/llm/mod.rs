pub mod assess;

pub use assess::{Assessor, LlmAssessor};

use crate::config::Settings;
use crate::error::{Error, Result};

/// Create a mixtape Agent configured from the stored LLM settings.
pub async fn create_agent(settings: &Settings) -> Result<mixtape_core::Agent> {
    build_agent(&settings.llm_provider, &settings.llm_model).await
}

async fn build_agent(provider: &str, model_name: &str) -> Result<mixtape_core::Agent> {
    // Each combination needs its own builder call since the model types are different.
    match (provider, model_name) {
        ("bedrock", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("bedrock", _) => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", _) => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        (other, _) => Err(Error::Config(format!("unknown llm_provider: {other}"))),
    }
}

/// Assessor for the configured provider and model.
pub async fn create_assessor(settings: &Settings) -> Result<LlmAssessor> {
    let agent = create_agent(settings).await?;
    log::info!(
        "Using {} model {} for call assessment",
        settings.llm_provider,
        settings.llm_model
    );
    Ok(LlmAssessor::new(agent))
}
