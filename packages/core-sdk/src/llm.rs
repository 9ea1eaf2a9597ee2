use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::config::{ApiType, RuntimeConfig};
use crate::error::CompletionError;
use crate::models::{Message, Parameters};
use crate::telemetry;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const AZURE_API_VERSION: &str = "2023-03-15-preview";

const DETAIL_LIMIT: usize = 200;

/**
 * \brief Provider 适配器：一次 HTTP 往返，返回纯文本结果，不重试。
 */
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /** \brief 适配器对应的 Provider 类型。 */
    fn api_type(&self) -> ApiType;

    async fn dispatch(
        &self,
        client: &reqwest::Client,
        messages: &[Message],
        parameters: &Parameters,
    ) -> Result<String, CompletionError>;
}

/**
 * \brief OpenAI Chat Completions。
 */
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    pub api_key: String,
    pub model: String,
    /** \brief 请求地址，默认为官方地址。 */
    pub url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            url: OPENAI_CHAT_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn request_body(&self, messages: &[Message], parameters: &Parameters) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        spread_parameters(&mut body, parameters);
        body
    }
}

#[async_trait]
impl ChatAdapter for OpenAiAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::OpenAi
    }

    async fn dispatch(
        &self,
        client: &reqwest::Client,
        messages: &[Message],
        parameters: &Parameters,
    ) -> Result<String, CompletionError> {
        let request = client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&self.request_body(messages, parameters));
        send_chat(&self.url, request).await
    }
}

/**
 * \brief Azure OpenAI：模型（部署名）编码在 URL 路径中，请求体不含 model。
 */
#[derive(Debug, Clone)]
pub struct AzureAdapter {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
}

impl AzureAdapter {
    pub fn new(endpoint: &str, api_key: &str, deployment: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            deployment: deployment.to_string(),
        }
    }

    pub fn request_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            AZURE_API_VERSION
        )
    }

    pub fn request_body(&self, messages: &[Message], parameters: &Parameters) -> Value {
        let mut body = json!({ "messages": messages });
        spread_parameters(&mut body, parameters);
        body
    }
}

#[async_trait]
impl ChatAdapter for AzureAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::Azure
    }

    async fn dispatch(
        &self,
        client: &reqwest::Client,
        messages: &[Message],
        parameters: &Parameters,
    ) -> Result<String, CompletionError> {
        let url = self.request_url();
        let request = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("api-key", &self.api_key)
            .json(&self.request_body(messages, parameters));
        send_chat(&url, request).await
    }
}

/**
 * \brief 按 api_type 选择适配器；这是唯一的选择依据。
 * \param openai_url OpenAI 请求地址，通常为 OPENAI_CHAT_URL。
 */
pub fn adapter_for(config: &RuntimeConfig, openai_url: &str) -> Box<dyn ChatAdapter> {
    match config.api_type {
        ApiType::OpenAi => {
            Box::new(OpenAiAdapter::new(&config.api_key, &config.model).with_url(openai_url))
        }
        ApiType::Azure => Box::new(AzureAdapter::new(
            &config.endpoint,
            &config.api_key,
            &config.model,
        )),
    }
}

/**
 * \brief 参数展开在固定字段之后，同名参数覆盖固定字段。
 */
fn spread_parameters(body: &mut Value, parameters: &Parameters) {
    if let Some(obj) = body.as_object_mut() {
        for (name, value) in parameters {
            obj.insert(name.clone(), value.clone());
        }
    }
}

async fn send_chat(url: &str, request: reqwest::RequestBuilder) -> Result<String, CompletionError> {
    let resp = request.send().await.map_err(|e| {
        telemetry::log_error("llm", &format!("request to {} failed: {}", url, e));
        CompletionError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        // 状态码优先；错误体读不到时 detail 为空
        let text = resp.text().await.unwrap_or_default();
        telemetry::log_error("llm", &format!("{} -> {}", url, status));
        return Err(CompletionError::ProviderHttp {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            detail: error_detail(&text),
        });
    }

    let text = resp
        .text()
        .await
        .map_err(|e| CompletionError::MalformedResponse(format!("unreadable body: {}", e)))?;

    let v: Value = serde_json::from_str(&text)
        .map_err(|e| CompletionError::MalformedResponse(format!("invalid JSON: {}", e)))?;
    extract_openai_content(&v).ok_or_else(|| {
        CompletionError::MalformedResponse("missing choices[0].message.content".to_string())
    })
}

fn extract_openai_content(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/**
 * \brief 错误响应的简短描述：优先 `error.message`，否则截断原文。
 */
fn error_detail(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }
    body.chars().take(DETAIL_LIMIT).collect()
}
