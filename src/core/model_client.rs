use super::codec::{decode_image, encode_image};
use crate::config::settings::ModelServiceConfig;
use crate::server::types::{ExamplesRequest, ExamplesResponse, TransferRequest, TransferResponse};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelClientError {
    #[error("model service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("model service is unreachable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("model service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to decode model service response: {0}")]
    Decode(String),

    #[error("model service request failed: {0}")]
    Http(#[source] reqwest::Error),
}

/// HTTP client for the model service.
#[derive(Clone)]
pub struct ModelClient {
    client: Client,
    config: ModelServiceConfig,
}

impl ModelClient {
    pub fn new(config: ModelServiceConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.config.model_url.trim_end_matches('/'), action)
    }

    /// Send style and content images, get the processed images back in
    /// content order.
    pub async fn transfer(
        &self,
        style: &str,
        style_image: Option<&[u8]>,
        content_images: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, ModelClientError> {
        let request = TransferRequest {
            style: style.to_string(),
            style_image: style_image.map(encode_image).unwrap_or_default(),
            content_images: content_images.iter().map(|i| encode_image(i)).collect(),
            username: Some(self.config.username.clone()),
            password: Some(self.config.password.clone()),
        };

        let timeout = self.config.transfer_timeout(content_images.len());
        tracing::info!(
            "[ModelClient] Requesting '{}' transfer for {} image(s)",
            style,
            content_images.len()
        );

        let response: TransferResponse = self.post("transfer", &request, timeout).await?;
        decode_all(&response.fitted_images)
    }

    pub async fn examples(&self) -> Result<Vec<Vec<u8>>, ModelClientError> {
        let request = ExamplesRequest {
            username: Some(self.config.username.clone()),
            password: Some(self.config.password.clone()),
        };

        let response: ExamplesResponse = self
            .post("examples", &request, self.config.examples_timeout())
            .await?;
        decode_all(&response.example_images)
    }

    async fn post<Req, Resp>(
        &self,
        action: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, ModelClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                ModelClientError::Timeout(timeout)
            } else if e.is_connect() {
                ModelClientError::Unavailable(e)
            } else {
                ModelClientError::Http(e)
            }
        };

        let response = self
            .client
            .post(self.endpoint(action))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let text = response.text().await.map_err(classify)?;

        if !status.is_success() {
            tracing::warn!("[ModelClient] '{}' returned {}: {}", action, status, text);
            return Err(ModelClientError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        // Rejections may also arrive as plain text with a success status.
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|_| ModelClientError::Rejected {
                status: status.as_u16(),
                message: text.clone(),
            })?;

        serde_json::from_value(value).map_err(|e| ModelClientError::Decode(e.to_string()))
    }
}

fn decode_all(images: &[String]) -> Result<Vec<Vec<u8>>, ModelClientError> {
    images
        .iter()
        .map(|i| decode_image(i).map_err(|e| ModelClientError::Decode(e.to_string())))
        .collect()
}
