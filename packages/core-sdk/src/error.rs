use thiserror::Error;

/**
 * \brief 一次补全请求可能出现的全部失败。
 * \details 前两类（缺少 Key、未知动作）在发起网络请求前即终止；
 *          Provider 相关错误原样返回，不做重试。
 */
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Please set your API key in the config page.")]
    MissingApiKey,

    #[error("Sorry, {0} is not implemented yet.")]
    UnknownAction(String),

    /** \brief Provider 返回非 2xx 状态码。 */
    #[error("provider returned {status} {status_text}: {detail}")]
    ProviderHttp {
        status: u16,
        status_text: String,
        detail: String,
    },

    /** \brief 2xx 响应但无法解析出 `choices[0].message.content`。 */
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CompletionError {
    /**
     * \brief 是否属于配置/动作解析阶段的错误（未触发网络请求）。
     */
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::MissingApiKey | Self::UnknownAction(_))
    }
}

/**
 * \brief 用户提交的 prompts YAML 校验失败。
 * \details 只在保存配置时使用；请求时解析总是降级为内置目录。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptOverlayError {
    #[error("Invalid YAML format: {0}")]
    Parse(String),

    #[error("prompts document is empty")]
    Empty,

    #[error("prompt `{identifier}` is invalid: {reason}")]
    InvalidEntry { identifier: String, reason: String },

    #[error("prompt ids collide with built-in prompts: {}", .0.join(", "))]
    Collision(Vec<String>),
}

/**
 * \brief 键值存储不可用或内容损坏。
 */
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored value under `{key}` is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

/**
 * \brief 配置页保存前的校验错误。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Please set your API key in the config page.")]
    MissingApiKey,

    #[error("Please choose an API type.")]
    MissingApiType,

    #[error("unknown api type `{0}`, expected openai or azure")]
    UnknownApiType(String),

    #[error("model `{model}` is not available for api type `{api_type}`")]
    UnknownModel { api_type: String, model: String },

    #[error("Please set your Azure endpoint in the config page.")]
    MissingEndpoint,

    #[error(transparent)]
    InvalidPrompts(#[from] PromptOverlayError),
}
