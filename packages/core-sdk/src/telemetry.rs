use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/**
 * \brief 本地日志开关，默认关闭；由 `app_settings.telemetry_enabled` 同步。
 */
static ENABLED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

const LOG_FILE: &str = "br1efly.log";

/** \brief 日志级别。 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 日志目录，可通过 BR1EFLY_LOG_DIR 覆盖。
 */
pub fn log_dir() -> PathBuf {
    std::env::var("BR1EFLY_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/**
 * \brief 写入一行日志；开关关闭时直接返回。
 * \details 写盘失败只打印到 stderr，不影响调用方。
 */
pub fn log(level: Level, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = append_line(&log_dir(), level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

pub fn log_event(category: &str, message: &str) {
    log(Level::Info, category, message);
}

pub fn log_error(category: &str, message: &str) {
    log(Level::Error, category, message);
}

fn format_line(timestamp: &str, level: Level, category: &str, message: &str) -> String {
    // 单行格式，消息中的换行折叠为空格
    let message = message.replace(['\r', '\n'], " ");
    format!("{} [{}] {} - {}", timestamp, level.as_str(), category, message)
}

fn append_line(dir: &Path, level: Level, category: &str, message: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        assert_eq!(
            format_line("2024-01-01T00:00:00Z", Level::Info, "completion", "action=summarize"),
            "2024-01-01T00:00:00Z [INFO] completion - action=summarize"
        );
        assert_eq!(
            format_line("t", Level::Error, "llm", "bad\nrequest"),
            "t [ERROR] llm - bad request"
        );
    }

    #[test]
    fn test_append_line_creates_file() {
        let dir = std::env::temp_dir().join(format!("br1efly-log-{}", std::process::id()));
        append_line(&dir, Level::Info, "test", "hello").expect("append");
        let content = std::fs::read_to_string(dir.join(LOG_FILE)).expect("read log");
        assert!(content.trim_end().ends_with("[INFO] test - hello"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
