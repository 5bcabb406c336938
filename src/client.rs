//! Gateway client: one method per endpoint, each a single POST.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{ClientConfig, ConfigError};
use crate::error::{Error, Result};
use crate::transport::{TransportCache, TransportHandle, TransportRoute};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ImageData, ImageRequest, ImageResponse,
    ModerationRequest, ModerationResponse, TextToSpeechRequest, TextToSpeechResponse,
};

pub const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
pub const IMAGE_GENERATIONS_PATH: &str = "images/generations";
pub const TEXT_TO_SPEECH_PATH: &str = "audio/tts/generation";
pub const MODERATIONS_PATH: &str = "moderations";

/// Client for the gateway API.
#[derive(Debug, Clone)]
pub struct ChimeraClient {
    config: ClientConfig,
    headers: HeaderMap,
    cache: Arc<TransportCache>,
}

impl ChimeraClient {
    /// Create a client backed by the process-wide transport cache.
    ///
    /// Fails with [`ConfigError::MissingApiKey`] when the key is empty.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_cache(config, TransportCache::shared())
    }

    /// Create a client backed by an explicitly owned transport cache.
    pub fn with_cache(config: ClientConfig, cache: Arc<TransportCache>) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey.into());
        }

        let value = format!("Bearer {}", config.api_key.expose_secret());
        let mut bearer = HeaderValue::from_str(&value).map_err(|_| {
            ConfigError::Validation("API key contains characters not allowed in a header".into())
        })?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            config,
            headers,
            cache,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Transport for the configured base URL, with the bearer header bound.
    pub async fn transport(&self) -> TransportHandle {
        let handle = self
            .cache
            .acquire(
                &self.config.base_url,
                self.headers.clone(),
                self.config.proxy.as_ref(),
            )
            .await;
        self.report_route(handle.route());
        handle
    }

    fn report_route(&self, route: &TransportRoute) {
        if let TransportRoute::Fallback(reason) = route {
            if self.config.debug_logging {
                tracing::info!(
                    reason = %reason,
                    "Skipping proxy config, using a direct connection"
                );
            } else {
                tracing::debug!(
                    reason = %reason,
                    "Skipping proxy config, using a direct connection"
                );
            }
        }
    }

    /// POST `body` as JSON to `path` and decode the JSON answer.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send<B>(&self, path: &str, body: &B) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let handle = self.transport().await;
        tracing::debug!(url = %handle.url(path), route = %handle.route(), "Sending request");
        let response = handle.post(path).json(body).send().await?;
        ensure_success(response).await
    }

    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        self.post(CHAT_COMPLETIONS_PATH, request).await
    }

    /// Streamed chat completion, read to the end and returned as raw text.
    pub async fn chat_completion_stream(&self, request: &ChatCompletionRequest) -> Result<String> {
        let mut request = request.clone();
        request.stream = Some(true);

        let response = self.send(CHAT_COMPLETIONS_PATH, &request).await?;
        let mut body = response.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk?;
            buffer.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub async fn image_generation(&self, request: &ImageRequest) -> Result<Vec<ImageData>> {
        let response: ImageResponse = self.post(IMAGE_GENERATIONS_PATH, request).await?;
        Ok(response.data)
    }

    pub async fn text_to_speech(
        &self,
        request: &TextToSpeechRequest,
    ) -> Result<TextToSpeechResponse> {
        self.post(TEXT_TO_SPEECH_PATH, request).await
    }

    pub async fn moderation(&self, input: &str) -> Result<ModerationResponse> {
        self.post(MODERATIONS_PATH, &ModerationRequest { input }).await
    }
}

/// Turn a non-success response into [`Error::Api`] carrying the body text.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await?;
    tracing::debug!(status = status.as_u16(), "Gateway returned an error");
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        let result = ChimeraClient::with_cache(
            ClientConfig::new(""),
            Arc::new(TransportCache::new()),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::MissingApiKey))
        ));
    }

    #[test]
    fn header_unsafe_api_key_is_rejected() {
        let result = ChimeraClient::with_cache(
            ClientConfig::new("sk-\nbad"),
            Arc::new(TransportCache::new()),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let client = ChimeraClient::with_cache(
            ClientConfig::new("sk-test"),
            Arc::new(TransportCache::new()),
        )
        .unwrap();
        let value = &client.headers[AUTHORIZATION];
        assert_eq!(value, "Bearer sk-test");
        assert!(value.is_sensitive());
    }
}
