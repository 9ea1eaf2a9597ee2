use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use serde_yaml::{Mapping, Value as YamlValue};

use crate::error::PromptOverlayError;
use crate::models::{Message, Parameters, PromptDefinition};
use crate::telemetry;

/** \brief 合并后的动作目录：动作 ID → prompt。 */
pub type Catalog = BTreeMap<String, PromptDefinition>;

/**
 * \brief 内置 prompt 表。
 */
pub fn builtin_prompts() -> Catalog {
    [
        PromptDefinition::new("summarize", "Please summarize the following in one line."),
        PromptDefinition::new(
            "paraphrase",
            "Please suggest three bulleted paraphrases of the following.",
        ),
        PromptDefinition::new("translate", "Please translate the following."),
        PromptDefinition::new(
            "detect_language",
            "Please detect the language of the following.",
        ),
        PromptDefinition::new(
            "counterproposal",
            "Please suggest a counterproposal to the following.",
        ),
        PromptDefinition::new("proofreading", "Please proofread the following."),
        PromptDefinition::new(
            "convert_to_markdown",
            "Please convert the following into Markdown. Respond with the Markdown only.",
        )
        .without_translation()
        .with_parameter("temperature", json!(0)),
        PromptDefinition::new(
            "convert_to_json",
            "Please convert the following into JSON. Respond with the JSON only.",
        )
        .without_translation()
        .with_parameter("temperature", json!(0)),
        PromptDefinition::new(
            "convert_to_yaml",
            "Please convert the following into YAML. Respond with the YAML only.",
        )
        .without_translation()
        .with_parameter("temperature", json!(0)),
        PromptDefinition::new(
            "generate_code",
            "Please write code that implements the following. Respond with a single code block.",
        )
        .without_translation()
        .with_parameter("temperature", json!(0)),
        PromptDefinition::new(
            "draw_diagram",
            "Please draw a diagram of the following using Mermaid syntax. Respond with the Mermaid code only.",
        )
        .without_translation(),
    ]
    .into_iter()
    .map(|p| (p.identifier.clone(), p))
    .collect()
}

/**
 * \brief 用户 YAML 中单个条目的中间表示，逐条做类型检查。
 */
#[derive(Debug, Deserialize)]
struct OverlayEntry {
    message: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    translate: Option<bool>,
    #[serde(default)]
    parameters: Option<Parameters>,
}

/**
 * \brief 解析后的用户 prompt 覆盖层，保持文档中的键顺序。
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptOverlay {
    entries: Vec<PromptDefinition>,
}

impl PromptOverlay {
    pub fn entries(&self) -> &[PromptDefinition] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/**
 * \brief 严格解析用户 prompts 文本；任一条目不合法即失败。
 * \details 空文本、null、空 mapping 与 false 等"假值"文档解析为空覆盖层。
 */
pub fn parse_overlay(raw: &str) -> Result<PromptOverlay, PromptOverlayError> {
    let Some(mapping) = load_document(raw)? else {
        return Ok(PromptOverlay::default());
    };
    let entries = mapping
        .into_iter()
        .map(|(key, value)| entry_from_yaml(key, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PromptOverlay { entries })
}

/**
 * \brief 保存配置时的校验入口。
 * \details 解析失败、文档为空、条目不合法、与内置 ID 冲突均视为错误。
 *          请求时的解析不会调用这里。
 */
pub fn validate_overlay(raw: &str) -> Result<PromptOverlay, PromptOverlayError> {
    let overlay = parse_overlay(raw)?;
    if overlay.is_empty() {
        return Err(PromptOverlayError::Empty);
    }
    let builtins = builtin_prompts();
    let collisions: Vec<String> = overlay
        .entries
        .iter()
        .filter(|p| builtins.contains_key(&p.identifier))
        .map(|p| p.identifier.clone())
        .collect();
    if !collisions.is_empty() {
        return Err(PromptOverlayError::Collision(collisions));
    }
    Ok(overlay)
}

/**
 * \brief 宽松读取用户 prompts：解析失败返回空，不合法条目被丢弃。
 */
pub fn user_prompts(raw: Option<&str>) -> Vec<PromptDefinition> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let mapping = match load_document(raw) {
        Ok(Some(mapping)) => mapping,
        Ok(None) => return Vec::new(),
        Err(err) => {
            telemetry::log_error("catalog", &format!("ignore user prompts: {}", err));
            return Vec::new();
        }
    };
    mapping
        .into_iter()
        .filter_map(|(key, value)| match entry_from_yaml(key, value) {
            Ok(prompt) => Some(prompt),
            Err(err) => {
                telemetry::log_error("catalog", &format!("drop user prompt: {}", err));
                None
            }
        })
        .collect()
}

/**
 * \brief 内置目录叠加用户覆盖层；同 ID 时用户条目生效。
 */
pub fn resolve_catalog(overlay_raw: Option<&str>) -> Catalog {
    let mut catalog = builtin_prompts();
    for prompt in user_prompts(overlay_raw) {
        catalog.insert(prompt.identifier.clone(), prompt);
    }
    catalog
}

/**
 * \brief 组装发送给模型的消息序列。
 * \details 顺序固定：system(prompt) → user(选中文本) → [system(语言指令)]。
 */
pub fn build_messages(language: &str, prompt: &PromptDefinition, selection: &str) -> Vec<Message> {
    let mut messages = vec![
        Message::system(prompt.message.clone()),
        Message::user(selection),
    ];
    if prompt.translate {
        messages.push(Message::system(format!("Answer in {}", language)));
    }
    messages
}

fn load_document(raw: &str) -> Result<Option<Mapping>, PromptOverlayError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let doc: YamlValue =
        serde_yaml::from_str(raw).map_err(|e| PromptOverlayError::Parse(e.to_string()))?;
    match doc {
        YamlValue::Mapping(mapping) if mapping.is_empty() => Ok(None),
        YamlValue::Mapping(mapping) => Ok(Some(mapping)),
        YamlValue::Null | YamlValue::Bool(false) => Ok(None),
        YamlValue::String(s) if s.is_empty() => Ok(None),
        YamlValue::Number(n) if n.as_f64() == Some(0.0) => Ok(None),
        _ => Err(PromptOverlayError::Parse(
            "expected a mapping of prompt id to prompt".to_string(),
        )),
    }
}

fn entry_from_yaml(key: YamlValue, value: YamlValue) -> Result<PromptDefinition, PromptOverlayError> {
    let identifier = match key {
        YamlValue::String(s) if !s.trim().is_empty() => s,
        other => {
            return Err(PromptOverlayError::InvalidEntry {
                identifier: format!("{:?}", other),
                reason: "prompt id must be a non-empty string".to_string(),
            })
        }
    };
    let entry: OverlayEntry =
        serde_yaml::from_value(value).map_err(|e| PromptOverlayError::InvalidEntry {
            identifier: identifier.clone(),
            reason: e.to_string(),
        })?;
    Ok(PromptDefinition {
        identifier,
        title: entry.title,
        message: entry.message,
        translate: entry.translate.unwrap_or(true),
        parameters: entry.parameters.unwrap_or_default(),
    })
}
