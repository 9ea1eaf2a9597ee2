use std::sync::Arc;

use crate::config::{ConfigStore, RuntimeConfig};
use crate::error::CompletionError;
use crate::history::{append_history, now_rfc3339, HistoryStore};
use crate::llm::{adapter_for, OPENAI_CHAT_URL};
use crate::models::{HistoryRecord, MenuClick};
use crate::prompt::{build_messages, resolve_catalog};
use crate::telemetry;

/**
 * \brief 补全编排器：读取配置、解析动作、组装消息、调用 Provider、记录历史。
 * \details 存储通过构造函数注入；每次请求都重新读取配置。
 */
#[derive(Clone)]
pub struct Completer {
    config: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryStore>,
    client: reqwest::Client,
    openai_url: String,
}

impl Completer {
    pub fn new(config: Arc<dyn ConfigStore>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            config,
            history,
            client: reqwest::Client::new(),
            openai_url: OPENAI_CHAT_URL.to_string(),
        }
    }

    /** \brief 覆盖 OpenAI 请求地址（兼容网关或测试）。 */
    pub fn with_openai_url(mut self, url: &str) -> Self {
        self.openai_url = url.to_string();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /**
     * \brief 对选中文本执行指定动作，返回模型输出。
     */
    pub async fn run_completion(
        &self,
        action: &str,
        selection: &str,
    ) -> Result<String, CompletionError> {
        self.run(action, selection, "").await
    }

    /**
     * \brief 处理一次菜单点击；页面地址写入历史。
     */
    pub async fn run_click(&self, click: &MenuClick) -> Result<String, CompletionError> {
        self.run(&click.action, &click.text, click.url.as_deref().unwrap_or(""))
            .await
    }

    async fn run(
        &self,
        action: &str,
        selection: &str,
        source_url: &str,
    ) -> Result<String, CompletionError> {
        let config = RuntimeConfig::load(self.config.as_ref()).await?;
        if config.api_key.is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let catalog = resolve_catalog(config.prompts.as_deref());
        let prompt = catalog
            .get(action)
            .filter(|p| p.is_implemented())
            .ok_or_else(|| CompletionError::UnknownAction(action.to_string()))?;

        let messages = build_messages(&config.language, prompt, selection);

        let adapter = adapter_for(&config, &self.openai_url);
        telemetry::log_event(
            "completion",
            &format!(
                "action={} provider={} model={} selection_len={}",
                action,
                adapter.api_type().as_str(),
                config.model,
                selection.len()
            ),
        );

        let result = adapter
            .dispatch(&self.client, &messages, &prompt.parameters)
            .await?;

        let record = HistoryRecord {
            source_url: source_url.to_string(),
            action: action.to_string(),
            selection: selection.to_string(),
            messages,
            result: Some(result.clone()),
            recorded_at: now_rfc3339(),
        };
        if let Err(err) = append_history(self.history.as_ref(), record).await {
            telemetry::log_error("history", &format!("append failed: {}", err));
        }

        Ok(result)
    }
}
