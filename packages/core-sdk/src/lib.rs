pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod llm;
pub mod menu;
pub mod models;
pub mod prompt;
pub mod server;
pub mod telemetry;

pub use completion::Completer;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::completion::Completer;
    pub use crate::config::{ConfigStore, RuntimeConfig};
    pub use crate::error::{CompletionError, ConfigError, PromptOverlayError, StorageError};
    pub use crate::history::HistoryStore;
    pub use crate::models::{HistoryRecord, MenuClick, Message, PromptDefinition};
    pub use crate::{db, history, llm, menu, prompt, server, telemetry};
}
