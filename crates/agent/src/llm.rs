use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use maimai_core::config::LlmConfig;
use maimai_core::domain::message::ChatMessage;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRYABLE_STATUS: u16 = 500;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("inference request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("inference endpoint returned HTTP {code}")]
    Status { code: u16 },
    #[error("inference transport failure: {0}")]
    Transport(String),
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status { code } if *code == RETRYABLE_STATUS)
    }
}

/// Chat-completion capability the pipeline depends on. An empty completion is
/// returned as `Ok("")`, never as an error.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError>;

    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Gateway for any endpoint speaking the OpenAI-compatible
/// `/chat/completions` protocol.
pub struct OpenAiCompatGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl OpenAiCompatGateway {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            timeout,
            max_retries,
            retry_base_delay: RETRY_BASE_DELAY,
        })
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&CompletionRequest { model: &self.model, messages })
            .send()
            .await
            .map_err(|error| self.classify_transport_error(&error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status { code: status.as_u16() });
        }

        let body: CompletionResponse = response.json().await.map_err(|error| {
            if error.is_timeout() {
                self.timeout_error()
            } else {
                GatewayError::Malformed(error.to_string())
            }
        })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Malformed("response carried no choices".to_owned()))?;

        Ok(choice.message.content.unwrap_or_default().trim().to_owned())
    }

    fn classify_transport_error(&self, error: &reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            self.timeout_error()
        } else {
            GatewayError::Transport(error.to_string())
        }
    }

    fn timeout_error(&self) -> GatewayError {
        let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        GatewayError::Timeout { after_ms }
    }
}

#[async_trait]
impl InferenceGateway for OpenAiCompatGateway {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        let mut attempt = 0_u32;
        loop {
            match self.attempt(messages).await {
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay.saturating_mul(2_u32.saturating_pow(attempt));
                    warn!(
                        event_name = "inference.request.retrying",
                        model = %self.model,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying inference request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    debug!(
                        event_name = "inference.request.finished",
                        model = %self.model,
                        attempts = attempt + 1,
                        ok = result.is_ok(),
                        "inference request finished"
                    );
                    return result;
                }
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// The gateways the pipeline talks to. Generation uses the secondary model
/// when one is configured and shares the primary otherwise.
#[derive(Clone)]
pub struct GatewaySet {
    pub primary: Arc<dyn InferenceGateway>,
    pub generation: Arc<dyn InferenceGateway>,
}

impl GatewaySet {
    pub fn shared(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { primary: gateway.clone(), generation: gateway }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, GatewayError> {
        let primary: Arc<dyn InferenceGateway> = Arc::new(OpenAiCompatGateway::new(
            &config.base_url,
            config.api_key.clone(),
            config.model.clone(),
            config.request_timeout(),
            config.max_retries,
        )?);

        let secondary = match (
            &config.secondary_api_key,
            &config.secondary_base_url,
            &config.secondary_model,
        ) {
            (Some(api_key), Some(base_url), Some(model)) => Some(OpenAiCompatGateway::new(
                base_url,
                api_key.clone(),
                model.clone(),
                config.request_timeout(),
                config.max_retries,
            )?),
            _ => None,
        };

        Ok(match secondary {
            Some(secondary) => Self { primary, generation: Arc::new(secondary) },
            None => Self::shared(primary),
        })
    }
}
