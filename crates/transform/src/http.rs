//! HTTP implementation against an OpenAI-style API.
//!
//! The primary path is two-stage: a vision analysis of the drawing produces
//! an enriched generation prompt, then the image endpoint renders it. The
//! direct path skips the analysis and generates straight from the style
//! preset, the cheaper fallback the orchestrator may invoke once.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tracing::debug;

use async_trait::async_trait;

use crate::cache::{request_fingerprint, AnalysisCache};
use crate::client::{TransformClient, TransformError, TransformOutput, TransformRequest};
use crate::prompt;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpTransformConfig {
    pub base_url: String,
    pub api_key: String,
    pub vision_model: String,
    pub image_model: String,
    /// Explicit per-call timeout; exceeding it is a transform failure.
    pub timeout: Duration,
}

impl Default for HttpTransformConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            vision_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Reqwest-backed [`TransformClient`].
#[derive(Clone)]
pub struct HttpTransformClient {
    http: reqwest::Client,
    config: HttpTransformConfig,
    cache: Option<Arc<dyn AnalysisCache>>,
}

impl HttpTransformClient {
    pub fn new(config: HttpTransformConfig) -> Result<Self, TransformError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransformError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            cache: None,
        })
    }

    /// Cache analysis results by request fingerprint.
    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Vision stage: describe the drawing in terms of the requested style.
    /// Consults the analysis cache first when one is attached.
    async fn analyze(&self, request: &TransformRequest) -> Result<String, TransformError> {
        let fingerprint = self.cache.as_ref().map(|_| request_fingerprint(request));
        if let (Some(cache), Some(fingerprint)) = (&self.cache, &fingerprint) {
            if let Some(cached) = cache.get(fingerprint).await {
                debug!(style = %request.style, "analysis served from cache");
                return Ok(cached);
            }
        }

        let body = json!({
            "model": self.config.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": prompt::analysis_prompt(request.style),
                    },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/png;base64,{}", request.image_data),
                            "detail": "high",
                        },
                    },
                ],
            }],
            "max_tokens": 500,
            "temperature": 0.7,
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let json = read_success_json(response).await?;

        let analysis = json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                TransformError::InvalidResponse("analysis response missing content".to_string())
            })?;

        if let (Some(cache), Some(fingerprint)) = (&self.cache, fingerprint) {
            cache.put(&fingerprint, analysis.clone()).await;
        }
        Ok(analysis)
    }

    /// Generation stage.
    async fn generate(&self, generation_prompt: &str) -> Result<TransformOutput, TransformError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": generation_prompt,
            "n": 1,
            "size": "1024x1024",
            "quality": "hd",
            "response_format": "b64_json",
        });

        let response = self
            .http
            .post(format!("{}/v1/images/generations", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let json = read_success_json(response).await?;

        let image = &json["data"][0];
        if let Some(b64) = image["b64_json"].as_str() {
            return Ok(TransformOutput {
                image_ref: format!("data:image/png;base64,{b64}"),
            });
        }
        if let Some(url) = image["url"].as_str() {
            return Ok(TransformOutput {
                image_ref: url.to_string(),
            });
        }
        Err(TransformError::InvalidResponse(
            "generation response missing image data".to_string(),
        ))
    }
}

#[async_trait]
impl TransformClient for HttpTransformClient {
    async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformOutput, TransformError> {
        let enriched = self.analyze(request).await?;
        debug!(prompt_len = enriched.len(), style = %request.style, "analysis complete");
        self.generate(&enriched).await
    }

    async fn transform_direct(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformOutput, TransformError> {
        self.generate(prompt::style_prompt(request.style)).await
    }
}

fn map_transport_error(error: reqwest::Error) -> TransformError {
    if error.is_timeout() {
        TransformError::Timeout
    } else {
        TransformError::Network(error.to_string())
    }
}

async fn read_success_json(response: reqwest::Response) -> Result<JsonValue, TransformError> {
    let status = response.status();
    if !status.is_success() {
        let mut message = response.text().await.unwrap_or_default();
        message.truncate(500);
        return Err(TransformError::Api {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<JsonValue>()
        .await
        .map_err(|e| TransformError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use sketchforge_core::Style;

    use super::*;
    use crate::cache::InMemoryAnalysisCache;

    fn request() -> TransformRequest {
        TransformRequest {
            image_data: "QUJDRA==".to_string(),
            style: Style::Cartoon,
        }
    }

    fn client_for(server: &MockServer) -> HttpTransformClient {
        HttpTransformClient::new(HttpTransformConfig {
            base_url: server.base_url(),
            api_key: "test-key".to_string(),
            ..HttpTransformConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn primary_path_analyzes_then_generates() {
        let server = MockServer::start_async().await;

        let vision = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "a happy dragon on a hill"}}]
                }));
            })
            .await;
        let image = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(200).json_body(serde_json::json!({
                    "data": [{"b64_json": "UE5H"}]
                }));
            })
            .await;

        let output = client_for(&server).transform(&request()).await.unwrap();
        assert_eq!(output.image_ref, "data:image/png;base64,UE5H");
        vision.assert_async().await;
        image.assert_async().await;
    }

    #[tokio::test]
    async fn cached_analysis_skips_second_vision_call() {
        let server = MockServer::start_async().await;

        let vision = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "a happy dragon"}}]
                }));
            })
            .await;
        let image = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(200).json_body(serde_json::json!({
                    "data": [{"b64_json": "UE5H"}]
                }));
            })
            .await;

        let client =
            client_for(&server).with_cache(Arc::new(InMemoryAnalysisCache::default()));

        client.transform(&request()).await.unwrap();
        client.transform(&request()).await.unwrap();

        // The second run reuses the cached analysis but still generates.
        vision.assert_hits_async(1).await;
        image.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn direct_path_skips_analysis() {
        let server = MockServer::start_async().await;

        let image = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(200).json_body(serde_json::json!({
                    "data": [{"url": "https://cdn.example/img.png"}]
                }));
            })
            .await;

        let output = client_for(&server)
            .transform_direct(&request())
            .await
            .unwrap();
        assert_eq!(output.image_ref, "https://cdn.example/img.png");
        image.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_carries_status() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("rate limited upstream");
            })
            .await;

        let err = client_for(&server).transform(&request()).await.unwrap_err();
        match err {
            TransformError::Api { status, message } => {
                assert_eq!(status, 429);
                assert!(message.contains("rate limited"));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_image_data_is_invalid_response() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(200).json_body(serde_json::json!({"data": []}));
            })
            .await;

        let err = client_for(&server)
            .transform_direct(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::InvalidResponse(_)));
    }
}
