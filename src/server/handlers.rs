use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::auth::{AuthError, UserAllowList};
use super::types::*;
use crate::core::codec::{decode_image, encode_image};
use crate::engine::{EngineError, InferenceDispatcher};
use crate::styles::STYLE_CATALOG;

/// Shared server state.
pub struct AppState {
    pub dispatcher: Arc<InferenceDispatcher>,
    pub users: UserAllowList,
    /// Base64 PNGs, one per catalog style that has an example.
    pub examples: Vec<String>,
}

pub type SharedState = Arc<AppState>;

/// Failures are answered with a plain-text body.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Request content type must be json.")]
    NotJson,

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Inference task failed: {0}")]
    Join(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotJson | ServiceError::Malformed(_) => StatusCode::BAD_REQUEST,
            ServiceError::Auth(AuthError::MissingCredentials) => StatusCode::BAD_REQUEST,
            ServiceError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Engine(
                EngineError::UnknownStyle(_)
                | EngineError::MissingStyleImage(_)
                | EngineError::NoContentImages
                | EngineError::Image(_)
                | EngineError::Decode(_),
            ) => StatusCode::BAD_REQUEST,
            ServiceError::Engine(_) | ServiceError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("[ModelService] {}", self);
        } else {
            tracing::warn!("[ModelService] Rejected request: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// The body must be a non-empty JSON object.
fn parse_json(body: &Bytes) -> Result<Value, ServiceError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) if !map.is_empty() => Ok(Value::Object(map)),
        _ => Err(ServiceError::NotJson),
    }
}

fn authenticate(users: &UserAllowList, body: &Value) -> Result<(), ServiceError> {
    let field = |name: &str| body.get(name).and_then(Value::as_str);
    users.verify(field("username"), field("password"))?;
    Ok(())
}

// ============================================================================
// Transfer
// ============================================================================

pub async fn transfer(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<TransferResponse>, ServiceError> {
    let value = parse_json(&body)?;
    authenticate(&state.users, &value)?;
    let request: TransferRequest =
        serde_json::from_value(value).map_err(|e| ServiceError::Malformed(e.to_string()))?;

    let style_image = if request.style_image.trim().is_empty() {
        None
    } else {
        Some(decode_image(&request.style_image).map_err(EngineError::from)?)
    };
    let content_images = request
        .content_images
        .iter()
        .map(|image| decode_image(image))
        .collect::<Result<Vec<_>, _>>()
        .map_err(EngineError::from)?;

    tracing::info!(
        "[ModelService] Transfer '{}' for {} image(s)",
        request.style,
        content_images.len()
    );

    let dispatcher = state.dispatcher.clone();
    let style = request.style;
    let fitted = tokio::task::spawn_blocking(move || {
        dispatcher.transfer(&style, style_image, content_images)
    })
    .await
    .map_err(|e| ServiceError::Join(e.to_string()))??;

    Ok(Json(TransferResponse {
        fitted_images: fitted.iter().map(|image| encode_image(image)).collect(),
    }))
}

// ============================================================================
// Examples
// ============================================================================

pub async fn examples(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<ExamplesResponse>, ServiceError> {
    let value = parse_json(&body)?;
    authenticate(&state.users, &value)?;

    Ok(Json(ExamplesResponse {
        example_images: state.examples.clone(),
    }))
}

/// Read `<dir>/<style>/transformed.png` for every catalog style, re-encoded
/// as PNG and base64. Missing files are skipped.
pub fn load_examples(dir: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
    let mut examples = Vec::new();
    for style in STYLE_CATALOG {
        let path = dir.as_ref().join(style.id).join("transformed.png");
        if !path.exists() {
            tracing::warn!("No example image for '{}' at {}", style.id, path.display());
            continue;
        }

        let image = image::open(&path)?;
        let mut png = std::io::Cursor::new(Vec::new());
        image.write_to(&mut png, image::ImageFormat::Png)?;
        examples.push(encode_image(png.get_ref()));
    }

    tracing::info!("Loaded {} example image(s)", examples.len());
    Ok(examples)
}
