//! LLM API Providers
//!
//! Concrete clients for the Anthropic and OpenAI APIs, feature-gated so
//! the core pipeline builds without an HTTP stack.

use super::LlmError;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

/// Provider configuration loaded from the environment or built directly.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl LlmConfig {
    /// Load from environment variables.
    ///
    /// `TRUSTLENS_LLM_PROVIDER` (`anthropic`/`openai`) forces a provider;
    /// otherwise the first configured API key wins, Anthropic first.
    pub fn from_env() -> Result<Self, LlmError> {
        let forced = std::env::var("TRUSTLENS_LLM_PROVIDER").ok();

        let want = |name: &str| forced.as_deref().map(|f| f == name).unwrap_or(true);

        if want("anthropic") {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                return Ok(Self::anthropic(
                    &key,
                    &std::env::var("ANTHROPIC_MODEL")
                        .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string()),
                ));
            }
        }

        if want("openai") {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                return Ok(Self::openai(
                    &key,
                    &std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                ));
            }
        }

        Err(LlmError::NotConfigured)
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

// ============================================================================
// Anthropic provider
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    config: LlmConfig,
    http: reqwest::Client,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self { config, http })
    }

    async fn request_text(&self, system_prompt: &str, user_content: &str) -> Result<String, LlmError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": 8192,
            "temperature": 0,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_content}],
        });

        let mut last_err = LlmError::Api("no attempts made".to_string());
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(500u64 << attempt)).await;
            }
            let response = self
                .http
                .post(format!("{base}/v1/messages"))
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    last_err = LlmError::RateLimited { retry_after_ms: 1_000 };
                    continue;
                }
                Ok(resp) if !resp.status().is_success() => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(LlmError::Api(format!("{status}: {text}")));
                }
                Ok(resp) => {
                    let value: serde_json::Value =
                        resp.json().await.map_err(|e| LlmError::Network(e.to_string()))?;
                    return value["content"][0]["text"]
                        .as_str()
                        .map(String::from)
                        .ok_or_else(|| {
                            LlmError::InvalidResponse("missing content[0].text".to_string())
                        });
                }
                Err(e) if e.is_timeout() => {
                    last_err = LlmError::Timeout(self.config.timeout_secs);
                }
                Err(e) => {
                    last_err = LlmError::Network(e.to_string());
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(feature = "anthropic")]
#[async_trait::async_trait]
impl super::LlmClient for AnthropicClient {
    async fn generate_json(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let text = self.request_text(system_prompt, user_content).await?;
        super::extract_json_object(&text)
    }

    async fn generate_text(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, LlmError> {
        self.request_text(system_prompt, user_content).await
    }
}

// ============================================================================
// OpenAI provider
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAIClient {
    config: LlmConfig,
    http: reqwest::Client,
}

#[cfg(feature = "openai")]
impl OpenAIClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self { config, http })
    }

    async fn request_text(
        &self,
        system_prompt: &str,
        user_content: &str,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let system = if json_mode {
            format!("{system_prompt}\n\nYou must respond with valid JSON.")
        } else {
            system_prompt.to_string()
        };
        let mut body = serde_json::json!({
            "model": self.config.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user_content},
            ],
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let mut last_err = LlmError::Api("no attempts made".to_string());
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(500u64 << attempt)).await;
            }
            let response = self
                .http
                .post(format!("{base}/chat/completions"))
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    last_err = LlmError::RateLimited { retry_after_ms: 1_000 };
                    continue;
                }
                Ok(resp) if !resp.status().is_success() => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(LlmError::Api(format!("{status}: {text}")));
                }
                Ok(resp) => {
                    let value: serde_json::Value =
                        resp.json().await.map_err(|e| LlmError::Network(e.to_string()))?;
                    return value["choices"][0]["message"]["content"]
                        .as_str()
                        .map(String::from)
                        .ok_or_else(|| {
                            LlmError::InvalidResponse(
                                "missing choices[0].message.content".to_string(),
                            )
                        });
                }
                Err(e) if e.is_timeout() => {
                    last_err = LlmError::Timeout(self.config.timeout_secs);
                }
                Err(e) => {
                    last_err = LlmError::Network(e.to_string());
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(feature = "openai")]
#[async_trait::async_trait]
impl super::LlmClient for OpenAIClient {
    async fn generate_json(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let text = self.request_text(system_prompt, user_content, true).await?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        if !value.is_object() {
            return Err(LlmError::InvalidResponse(
                "response JSON is not an object".to_string(),
            ));
        }
        Ok(value)
    }

    async fn generate_text(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, LlmError> {
        self.request_text(system_prompt, user_content, false).await
    }
}

// ============================================================================
// Provider selection
// ============================================================================

/// Build a client from the environment. Falls back through the configured
/// providers in order; errors if none is available in this build.
pub fn client_from_env() -> Result<Box<dyn super::LlmClient>, LlmError> {
    let config = LlmConfig::from_env()?;
    match config.provider {
        #[cfg(feature = "anthropic")]
        Provider::Anthropic => Ok(Box::new(AnthropicClient::new(config)?)),
        #[cfg(feature = "openai")]
        Provider::OpenAI => Ok(Box::new(OpenAIClient::new(config)?)),
        #[allow(unreachable_patterns)]
        _ => Err(LlmError::NotConfigured),
    }
}
