use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/**
 * \brief 消息角色；本系统只产生 system 与 user 两种。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user */
    pub role: Role,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/** \brief 透传给 Provider 的采样参数（temperature、top_p、max_tokens 等）。 */
pub type Parameters = Map<String, Value>;

/**
 * \brief 一个可选择的动作及其 prompt。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    /** \brief 动作 ID，同时也是菜单 ID。 */
    #[serde(rename = "id")]
    pub identifier: String,
    /** \brief 菜单标题；为空时菜单回退显示 message。 */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /** \brief 作为首条 system 消息发送的指令；空串表示尚未实现。 */
    pub message: String,
    /** \brief 是否追加 "Answer in {language}"。 */
    #[serde(default = "default_translate")]
    pub translate: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Parameters,
}

fn default_translate() -> bool {
    true
}

impl PromptDefinition {
    pub fn new(identifier: &str, message: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            title: None,
            message: message.to_string(),
            translate: true,
            parameters: Parameters::new(),
        }
    }

    pub fn without_translation(mut self) -> Self {
        self.translate = false;
        self
    }

    pub fn with_parameter(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    /** \brief 空 message 为"未实现"标记。 */
    pub fn is_implemented(&self) -> bool {
        !self.message.is_empty()
    }

    /** \brief 菜单显示用标题。 */
    pub fn menu_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.message)
    }
}

/**
 * \brief 菜单点击后送达核心的消息：`{type, text}`。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuClick {
    #[serde(rename = "type")]
    pub action: String,
    pub text: String,
    /** \brief 页面地址，写入历史记录。 */
    #[serde(default)]
    pub url: Option<String>,
}

/**
 * \brief 一次完成的交互，写入本地历史。
 * \details 字段名与浏览器本地存储中的历史格式保持一致。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "url", default)]
    pub source_url: String,
    #[serde(rename = "type")]
    pub action: String,
    pub selection: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub result: Option<String>,
    /** \brief RFC 3339 时间戳；旧数据中可能缺失。 */
    #[serde(default)]
    pub recorded_at: String,
}
