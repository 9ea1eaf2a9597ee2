use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StorageError};
use crate::prompt::validate_overlay;

pub const KEY_LANGUAGE: &str = "language";
pub const KEY_API_TYPE: &str = "apiType";
pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_MODEL: &str = "model";
pub const KEY_ENDPOINT: &str = "endpoint";
pub const KEY_PROMPTS: &str = "prompts";

/** \brief 可选的回答语言，第一个为默认值。 */
pub const LANGUAGES: [&str; 6] = [
    "english",
    "japanese",
    "chinese",
    "korean",
    "thai",
    "vietnamese",
];

const OPENAI_MODELS: [&str; 6] = [
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0301",
    "gpt-4",
    "gpt-4-0314",
    "gpt-4-32k",
    "gpt-4-32k-0314",
];

const AZURE_MODELS: [&str; 1] = ["gpt-35-turbo"];

/**
 * \brief 可同步的小型键值存储（配置）。
 * \details 缺失的键读作空字符串。
 */
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/**
 * \brief Provider 类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    OpenAi,
    Azure,
}

impl ApiType {
    /**
     * \brief 从存储值解析；除 "azure" 外一律按 OpenAI 处理。
     */
    pub fn from_config_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("azure") {
            ApiType::Azure
        } else {
            ApiType::OpenAi
        }
    }

    /**
     * \brief 严格解析，只接受 openai / azure（不区分大小写）。保存配置时使用。
     */
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("openai") {
            Some(ApiType::OpenAi)
        } else if value.eq_ignore_ascii_case("azure") {
            Some(ApiType::Azure)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::OpenAi => "openai",
            ApiType::Azure => "azure",
        }
    }

    /** \brief 该类型允许的模型列表。 */
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            ApiType::OpenAi => &OPENAI_MODELS,
            ApiType::Azure => &AZURE_MODELS,
        }
    }
}

/**
 * \brief 每次补全请求时从配置存储读取的运行时配置。
 */
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub language: String,
    pub api_type: ApiType,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub prompts: Option<String>,
}

impl RuntimeConfig {
    /**
     * \brief 从存储读取配置，不做缓存。
     */
    pub async fn load(store: &dyn ConfigStore) -> Result<Self, StorageError> {
        let language = store.get(KEY_LANGUAGE).await?;
        let api_type = store.get(KEY_API_TYPE).await?;
        let api_key = store.get(KEY_API_KEY).await?;
        let model = store.get(KEY_MODEL).await?;
        let endpoint = store.get(KEY_ENDPOINT).await?;
        let prompts = store.get(KEY_PROMPTS).await?;

        Ok(Self {
            language: if language.is_empty() {
                LANGUAGES[0].to_string()
            } else {
                language
            },
            api_type: ApiType::from_config_value(&api_type),
            api_key,
            model,
            endpoint,
            prompts: if prompts.trim().is_empty() {
                None
            } else {
                Some(prompts)
            },
        })
    }
}

/**
 * \brief 配置页提交的原始表单值，全部为字符串。
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigForm {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub api_type: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub prompts: String,
}

impl ConfigForm {
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            (KEY_LANGUAGE, self.language.as_str()),
            (KEY_API_TYPE, self.api_type.as_str()),
            (KEY_API_KEY, self.api_key.as_str()),
            (KEY_MODEL, self.model.as_str()),
            (KEY_ENDPOINT, self.endpoint.as_str()),
            (KEY_PROMPTS, self.prompts.as_str()),
        ]
    }

    /** \brief 读取存储中的当前值，用于配置页初始化。 */
    pub async fn load(store: &dyn ConfigStore) -> Result<Self, StorageError> {
        Ok(Self {
            language: store.get(KEY_LANGUAGE).await?,
            api_type: store.get(KEY_API_TYPE).await?,
            api_key: store.get(KEY_API_KEY).await?,
            model: store.get(KEY_MODEL).await?,
            endpoint: store.get(KEY_ENDPOINT).await?,
            prompts: store.get(KEY_PROMPTS).await?,
        })
    }
}

/**
 * \brief 保存前校验配置表单。
 */
pub fn validate_config(form: &ConfigForm) -> Result<(), ConfigError> {
    if form.api_key.is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    if form.api_type.is_empty() {
        return Err(ConfigError::MissingApiType);
    }
    let api_type = ApiType::parse(&form.api_type)
        .ok_or_else(|| ConfigError::UnknownApiType(form.api_type.clone()))?;
    if !api_type.models().contains(&form.model.as_str()) {
        return Err(ConfigError::UnknownModel {
            api_type: api_type.as_str().to_string(),
            model: form.model.clone(),
        });
    }
    if api_type == ApiType::Azure && form.endpoint.is_empty() {
        return Err(ConfigError::MissingEndpoint);
    }
    if !form.prompts.trim().is_empty() {
        validate_overlay(&form.prompts)?;
    }
    Ok(())
}

/**
 * \brief 校验并写入全部配置键。
 */
pub async fn save_config(store: &dyn ConfigStore, form: &ConfigForm) -> anyhow::Result<()> {
    validate_config(form)?;
    for (key, value) in form.entries() {
        store.set(key, value).await?;
    }
    Ok(())
}

/**
 * \brief 内存实现，供测试与临时会话使用。
 */
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(map),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(guard.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PromptOverlayError;

    fn form(api_type: &str, model: &str) -> ConfigForm {
        ConfigForm {
            language: "english".into(),
            api_type: api_type.into(),
            api_key: "sk-test".into(),
            model: model.into(),
            endpoint: String::new(),
            prompts: String::new(),
        }
    }

    #[tokio::test]
    async fn test_load_defaults_from_empty_store() {
        let store = MemoryConfigStore::new();
        let config = RuntimeConfig::load(&store).await.expect("load");
        assert_eq!(config.language, "english");
        assert_eq!(config.api_type, ApiType::OpenAi);
        assert!(config.api_key.is_empty());
        assert!(config.prompts.is_none());
    }

    #[tokio::test]
    async fn test_load_reads_every_key() {
        let store = MemoryConfigStore::with_values([
            (KEY_LANGUAGE, "japanese"),
            (KEY_API_TYPE, "azure"),
            (KEY_API_KEY, "k"),
            (KEY_MODEL, "gpt-35-turbo"),
            (KEY_ENDPOINT, "https://e"),
            (KEY_PROMPTS, "foo:\n  message: bar\n"),
        ]);
        let config = RuntimeConfig::load(&store).await.expect("load");
        assert_eq!(config.language, "japanese");
        assert_eq!(config.api_type, ApiType::Azure);
        assert_eq!(config.endpoint, "https://e");
        assert_eq!(config.prompts.as_deref(), Some("foo:\n  message: bar\n"));
    }

    #[test]
    fn test_api_type_falls_back_to_openai() {
        assert_eq!(ApiType::from_config_value(""), ApiType::OpenAi);
        assert_eq!(ApiType::from_config_value("other"), ApiType::OpenAi);
        assert_eq!(ApiType::from_config_value("Azure"), ApiType::Azure);
    }

    #[test]
    fn test_validate_config() {
        assert_eq!(validate_config(&form("openai", "gpt-4")), Ok(()));

        let mut missing_key = form("openai", "gpt-4");
        missing_key.api_key.clear();
        assert_eq!(validate_config(&missing_key), Err(ConfigError::MissingApiKey));

        assert_eq!(validate_config(&form("", "gpt-4")), Err(ConfigError::MissingApiType));

        assert_eq!(
            validate_config(&form("bogus", "gpt-4")),
            Err(ConfigError::UnknownApiType("bogus".into()))
        );
        assert_eq!(validate_config(&form("OpenAI", "gpt-4")), Ok(()));

        assert!(matches!(
            validate_config(&form("azure", "gpt-4")),
            Err(ConfigError::UnknownModel { .. })
        ));
        assert_eq!(
            validate_config(&form("azure", "gpt-35-turbo")),
            Err(ConfigError::MissingEndpoint)
        );

        let mut bad_prompts = form("openai", "gpt-4");
        bad_prompts.prompts = "summarize:\n  message: again\n".into();
        assert_eq!(
            validate_config(&bad_prompts),
            Err(ConfigError::InvalidPrompts(PromptOverlayError::Collision(vec![
                "summarize".into()
            ])))
        );
    }

    #[tokio::test]
    async fn test_save_config_rejects_invalid_form() {
        let store = MemoryConfigStore::new();
        assert!(save_config(&store, &form("azure", "gpt-35-turbo")).await.is_err());
        assert_eq!(store.get(KEY_API_TYPE).await.unwrap(), "");

        save_config(&store, &form("openai", "gpt-4")).await.expect("save");
        assert_eq!(store.get(KEY_MODEL).await.unwrap(), "gpt-4");
    }
}
