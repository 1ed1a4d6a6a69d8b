//! Application State

use std::sync::Arc;

use squad_core::{
    GenerationOptions, InMemoryChatStorage, LlmAgent, LlmClassifier, LlmProvider, LlmSummarizer,
    Orchestrator, RetryPolicy, SquadConfig,
};

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Router over the configured agents
    pub orchestrator: Arc<Orchestrator>,

    /// LLM provider (Ollama, OpenAI-compatible)
    pub provider: Arc<dyn LlmProvider>,
}

impl AppState {
    /// Wire classifier, storage and agents around one provider
    pub fn build(
        server: &ServerConfig,
        squad: SquadConfig,
        provider: Arc<dyn LlmProvider>,
    ) -> squad_core::Result<Self> {
        let classifier = LlmClassifier::new(
            Arc::clone(&provider),
            GenerationOptions::with_model(server.classifier_model.clone()),
        )
        .with_retry(RetryPolicy::new(squad.max_retries))
        .with_raw_output_logging(squad.log_classifier_raw_output);

        let storage = if server.summarize_history {
            InMemoryChatStorage::with_summarizer(Arc::new(LlmSummarizer::new(
                Arc::clone(&provider),
                GenerationOptions::with_model(server.model.clone()),
            )))
        } else {
            InMemoryChatStorage::new()
        };

        let mut orchestrator = Orchestrator::new(squad, Arc::new(classifier), Arc::new(storage));

        for (index, spec) in server.agents.iter().enumerate() {
            let agent = Arc::new(
                LlmAgent::builder()
                    .name(&spec.name)
                    .description(&spec.description)
                    .provider(Arc::clone(&provider))
                    .model(&server.model)
                    .streaming(server.streaming)
                    .build()?,
            );
            let is_default = server
                .default_agent
                .as_deref()
                .map_or(index == 0, |name| name.eq_ignore_ascii_case(&spec.name));
            if is_default {
                orchestrator.set_default_agent(agent.clone());
            }
            orchestrator.add_agent(agent);
        }

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            provider,
        })
    }
}
