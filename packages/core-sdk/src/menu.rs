use serde::{Deserialize, Serialize};

use crate::prompt::user_prompts;

pub const ROOT_MENU_ID: &str = "br1efly";
pub const CUSTOM_MENU_ID: &str = "custom";
pub const CUSTOM_SEPARATOR_ID: &str = "separator_custom";

/**
 * \brief 菜单项类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuKind {
    Normal,
    Separator,
}

/**
 * \brief 菜单可出现的界面位置；目前所有菜单只在选中文本时出现。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuContext {
    Selection,
}

/**
 * \brief 右键菜单树的节点，序列化字段与浏览器 contextMenus 一致。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuNode {
    #[serde(rename = "id")]
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: MenuKind,
    pub contexts: Vec<MenuContext>,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<MenuNode>>,
}

impl MenuNode {
    /** \brief 可点击的叶子项。 */
    pub fn action(identifier: &str, title: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            title: Some(title.to_string()),
            kind: MenuKind::Normal,
            contexts: vec![MenuContext::Selection],
            parent_identifier: None,
            children: None,
        }
    }

    pub fn separator(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            title: None,
            kind: MenuKind::Separator,
            contexts: vec![MenuContext::Selection],
            parent_identifier: None,
            children: None,
        }
    }

    pub fn parent(identifier: &str, title: &str, children: Vec<MenuNode>) -> Self {
        Self {
            children: Some(children),
            ..Self::action(identifier, title)
        }
    }

    pub fn is_separator(&self) -> bool {
        self.kind == MenuKind::Separator
    }

    /** \brief 以自身为根的树深度（叶子为 1）。 */
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(MenuNode::depth)
            .max()
            .unwrap_or(0)
    }
}

/**
 * \brief 内置菜单树。
 */
pub fn builtin_menu_tree() -> Vec<MenuNode> {
    vec![MenuNode::parent(
        ROOT_MENU_ID,
        "br1efly",
        vec![
            MenuNode::action("summarize", "Summarize"),
            MenuNode::action("paraphrase", "Paraphrase"),
            MenuNode::action("translate", "Translate"),
            MenuNode::action("detect_language", "Detect Language"),
            MenuNode::action("counterproposal", "Counterproposal"),
            MenuNode::action("proofreading", "Proofreading"),
            MenuNode::separator("separator1"),
            MenuNode::parent(
                "convert",
                "Convert format",
                vec![
                    MenuNode::action("convert_to_markdown", "Convert to Markdown"),
                    MenuNode::action("convert_to_json", "Convert to JSON"),
                    MenuNode::action("convert_to_yaml", "Convert to YAML"),
                ],
            ),
            MenuNode::separator("separator2"),
            MenuNode::action("generate_code", "Generate Code"),
            MenuNode::action("draw_diagram", "Draw Diagram"),
        ],
    )]
}

/**
 * \brief 由用户 prompts 生成完整菜单树。
 * \details 没有有效的用户 prompt 时原样返回内置树；否则追加分隔符与 "Custom" 子菜单。
 */
pub fn build_menu_tree(overlay_raw: Option<&str>) -> Vec<MenuNode> {
    let custom = user_prompts(overlay_raw);
    let mut tree = builtin_menu_tree();
    if custom.is_empty() {
        return tree;
    }

    let children = custom
        .iter()
        .map(|prompt| MenuNode {
            parent_identifier: Some(CUSTOM_MENU_ID.to_string()),
            ..MenuNode::action(&prompt.identifier, prompt.menu_title())
        })
        .collect();

    tree.push(MenuNode::separator(CUSTOM_SEPARATOR_ID));
    tree.push(MenuNode::parent(CUSTOM_MENU_ID, "Custom", children));
    tree
}

/**
 * \brief 按注册顺序（先序）展开菜单树，并补全每个节点的 parentId。
 */
pub fn flatten_menu_tree(tree: &[MenuNode]) -> Vec<MenuNode> {
    fn walk(nodes: &[MenuNode], parent: Option<&str>, out: &mut Vec<MenuNode>) {
        for node in nodes {
            out.push(MenuNode {
                parent_identifier: parent.map(str::to_string),
                children: None,
                ..node.clone()
            });
            if let Some(children) = &node.children {
                walk(children, Some(&node.identifier), out);
            }
        }
    }

    let mut out = Vec::new();
    walk(tree, None, &mut out);
    out
}
