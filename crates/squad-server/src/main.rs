//! agent-squad HTTP Server
//!
//! Axum-based front door for the orchestrator: REST routing plus a WebSocket
//! endpoint that relays streamed agent answers.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use squad_core::{LlmProvider, SquadConfig};
use squad_runtime::{OllamaProvider, OpenAiProvider};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ProviderKind, ServerConfig};
use crate::handlers::{health_check, list_agents, route_handler, route_stream_handler};
use crate::state::AppState;

/// Build the router over prepared state
fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/agents", get(list_agents))
        .route("/api/route", post(route_handler))
        .route("/api/route/stream", get(route_stream_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = ServerConfig::from_env().context("invalid server configuration")?;
    let squad = SquadConfig::from_env().context("invalid routing configuration")?;

    let provider: Arc<dyn LlmProvider> = match server.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_env()?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_env()?),
    };

    if provider.health_check().await.unwrap_or(false) {
        tracing::info!(provider = provider.name(), "✓ Connected to model backend");
    } else {
        tracing::warn!(provider = provider.name(), "⚠ Model backend not reachable - requests will fail");
    }

    let state = AppState::build(&server, squad, provider).context("building orchestrator")?;

    for (id, info) in state.orchestrator.get_all_agents() {
        tracing::info!("  • {} ({}): {}", info.name, id, info.description);
    }
    match state.orchestrator.get_default_agent() {
        Ok(agent) => tracing::info!(agent = agent.id(), "default agent"),
        Err(_) => tracing::warn!("no default agent matches SQUAD_DEFAULT_AGENT"),
    }

    let listener = tokio::net::TcpListener::bind(&server.bind_addr).await?;

    tracing::info!("🚀 agent-squad server running on http://{}", server.bind_addr);
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  GET  /api/agents        - Registered agents");
    tracing::info!("  POST /api/route         - Route a request");
    tracing::info!("  GET  /api/route/stream  - WebSocket streaming");

    axum::serve(listener, app(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use squad_core::agent::{AdditionalParams, Agent, AgentDescriptor, AgentOutput};
    use squad_core::provider::{Completion, CompletionStream, GenerationOptions};
    use squad_core::{ConversationHistory, Message, Result, SquadError};
    use tower::ServiceExt;

    use super::*;
    use crate::config::AgentSpec;

    /// Classifies everything as `tech-agent` and answers with fixed text
    struct CannedProvider;

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
            let is_classifier = options
                .system_prompt
                .as_deref()
                .is_some_and(|prompt| prompt.contains("selected_agent"));
            let content = if is_classifier {
                r#"{"userinput": "x", "selected_agent": "tech-agent", "confidence": 0.9}"#
            } else {
                "Restart the router."
            };
            Ok(Completion {
                content: content.into(),
                model: options.model.clone(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<CompletionStream> {
            Err(SquadError::Provider("not used".into()))
        }
    }

    struct Unused(AgentDescriptor);

    #[async_trait]
    impl Agent for Unused {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }

        async fn process_request(
            &self,
            _input_text: &str,
            _user_id: &str,
            _session_id: &str,
            _history: &ConversationHistory,
            _additional_params: &AdditionalParams,
        ) -> Result<AgentOutput> {
            Err(SquadError::Provider("unused".into()))
        }
    }

    fn test_state() -> AppState {
        let server = ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            provider: ProviderKind::Ollama,
            model: "llama3.2".into(),
            classifier_model: "llama3.2".into(),
            agents: vec![
                AgentSpec {
                    name: "Tech Agent".into(),
                    description: "Routers and laptops".into(),
                },
                AgentSpec {
                    name: "Billing Agent".into(),
                    description: "Invoices".into(),
                },
            ],
            default_agent: None,
            summarize_history: false,
            streaming: false,
        };
        AppState::build(&server, SquadConfig::default(), Arc::new(CannedProvider)).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_agents() {
        let response = app(test_state())
            .oneshot(Request::get("/api/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["tech-agent"]["name"], "Tech Agent");
        assert_eq!(body["billing-agent"]["description"], "Invoices");
    }

    #[tokio::test]
    async fn test_route_returns_answer_and_metadata() {
        let request = Request::post("/api/route")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"content": "my router keeps dropping", "user_id": "u1", "session_id": "s1"}"#,
            ))
            .unwrap();
        let response = app(test_state()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["content"], "Restart the router.");
        assert_eq!(body["metadata"]["agent_id"], "tech-agent");
        assert_eq!(body["metadata"]["session_id"], "s1");
    }

    #[tokio::test]
    async fn test_route_rejects_empty_content() {
        let request = Request::post("/api/route")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"content": "", "user_id": "u1"}"#))
            .unwrap();
        let response = app(test_state()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_health() {
        let mut state = test_state();
        let mut orchestrator = squad_core::Orchestrator::new(
            SquadConfig::default(),
            Arc::new(squad_core::LlmClassifier::new(
                Arc::new(CannedProvider),
                GenerationOptions::default(),
            )),
            Arc::new(squad_core::InMemoryChatStorage::new()),
        );
        orchestrator.add_agent(Arc::new(Unused(AgentDescriptor::new("Solo", "Only agent"))));
        state.orchestrator = Arc::new(orchestrator);

        let response = app(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["provider"], "canned");
        assert_eq!(body["provider_connected"], true);
        assert_eq!(body["agents"], 1);
    }
}
