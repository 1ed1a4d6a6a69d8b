//! HTTP/WebSocket Handlers

use std::collections::HashMap;

use axum::{
    Json,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use squad_core::{AdditionalParams, AgentInfo, ResponseMetadata, ResponseOutput, SquadError};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub agents: usize,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub content: String,
    pub user_id: String,
    /// Generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub additional_params: AdditionalParams,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub content: String,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Frames sent over the streaming socket
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Chunk { content: String },
    Done { metadata: Box<ResponseMetadata> },
    Error { error: String, code: String },
}

// ============================================================================
// Errors
// ============================================================================

/// Handler failure rendered as JSON
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Squad(#[from] SquadError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Squad(error) => match error {
                SquadError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                SquadError::Overloaded(_) | SquadError::ProviderUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SquadError::Classification { .. }
                | SquadError::AgentExecution { .. }
                | SquadError::Provider(_)
                | SquadError::Parse(_)
                | SquadError::Auth(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Squad(error) => match error {
                SquadError::Classification { .. } => "CLASSIFICATION_ERROR",
                SquadError::AgentExecution { .. } => "AGENT_ERROR",
                SquadError::RateLimited(_) => "RATE_LIMITED",
                SquadError::Overloaded(_) | SquadError::ProviderUnavailable(_) => "UNAVAILABLE",
                SquadError::NotConfigured(_) | SquadError::Config(_) => "NOT_CONFIGURED",
                SquadError::Storage(_) => "STORAGE_ERROR",
                _ => "INTERNAL_ERROR",
            },
        }
    }

    fn body(&self) -> ErrorResponse {
        let error = match self {
            Self::BadRequest(message) => message.clone(),
            Self::Squad(error) => error.user_message(),
        };
        ErrorResponse {
            error,
            code: self.code().into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Squad(error) = &self {
            tracing::error!(%error, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl RouteRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.content.trim().is_empty() {
            return Err(ApiError::BadRequest("content must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(ApiError::BadRequest("user_id must not be empty".into()));
        }
        Ok(())
    }

    fn session_id(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.name().to_string(),
        provider_connected,
        agents: state.orchestrator.get_all_agents().len(),
    })
}

/// Registered agents keyed by id
pub async fn list_agents(State(state): State<AppState>) -> Json<HashMap<String, AgentInfo>> {
    Json(state.orchestrator.get_all_agents())
}

/// Route one request and return the full answer
pub async fn route_handler(
    State(state): State<AppState>,
    Json(payload): Json<RouteRequest>,
) -> Result<Json<RouteResponse>, ApiError> {
    payload.validate()?;
    let session_id = payload.session_id();

    let response = state
        .orchestrator
        .route_request(
            &payload.content,
            &payload.user_id,
            &session_id,
            payload.additional_params,
            false,
        )
        .await?;

    let metadata = response.metadata.clone();
    let content = response.into_text().await?;
    Ok(Json(RouteResponse { content, metadata }))
}

/// WebSocket streaming route
pub async fn route_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

fn frame(frame: &StreamFrame) -> Message {
    let text = serde_json::to_string(frame).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","error":"{e}","code":"INTERNAL_ERROR"}}"#)
    });
    Message::Text(text.into())
}

fn error_frame(error: &ApiError) -> Message {
    let body = error.body();
    frame(&StreamFrame::Error {
        error: body.error,
        code: body.code,
    })
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        let request = match serde_json::from_str::<RouteRequest>(&msg)
            .map_err(|e| ApiError::BadRequest(e.to_string()))
            .and_then(|request| request.validate().map(|()| request))
        {
            Ok(request) => request,
            Err(error) => {
                if sender.send(error_frame(&error)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let session_id = request.session_id();
        let routed = state
            .orchestrator
            .route_request(
                &request.content,
                &request.user_id,
                &session_id,
                request.additional_params,
                true,
            )
            .await;

        let response = match routed {
            Ok(response) => response,
            Err(error) => {
                let error = ApiError::from(error);
                tracing::warn!(%error, "streaming route failed");
                if sender.send(error_frame(&error)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let metadata = Box::new(response.metadata);
        let delivered = match response.output {
            ResponseOutput::Message(message) => sender
                .send(frame(&StreamFrame::Chunk {
                    content: message.text(),
                }))
                .await
                .is_ok(),
            ResponseOutput::Stream(mut stream) => {
                let mut delivered = true;
                while let Some(fragment) = stream.next().await {
                    let outgoing = match fragment {
                        Ok(content) => frame(&StreamFrame::Chunk { content }),
                        Err(error) => {
                            delivered = false;
                            error_frame(&ApiError::from(error))
                        }
                    };
                    if sender.send(outgoing).await.is_err() {
                        return;
                    }
                    if !delivered {
                        break;
                    }
                }
                delivered
            }
        };

        if delivered && sender.send(frame(&StreamFrame::Done { metadata })).await.is_err() {
            break;
        }
    }
}
