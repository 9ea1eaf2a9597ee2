use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::PathBuf, sync::Mutex, thread, time::Duration};

use crate::config::ConfigStore;
use crate::error::StorageError;
use crate::history::{HistoryStore, HISTORY_KEY};
use crate::models::HistoryRecord;

/** \brief 可同步配置的数据库文件名。 */
pub const SYNC_DB_FILE: &str = "br1efly.sync.db";
/** \brief 仅本地数据（历史、遥测开关）的数据库文件名。 */
pub const LOCAL_DB_FILE: &str = "br1efly.local.db";

/**
 * \brief 数据目录，可通过 BR1EFLY_DATA_DIR 覆盖，默认当前目录。
 */
pub fn data_dir() -> PathBuf {
    std::env::var("BR1EFLY_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/**
 * \brief 打开数据库文件并设置忙等待。
 */
pub fn open_db(file: &str) -> Result<Connection> {
    let dir = data_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let conn = Connection::open(dir.join(file))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。两个数据库共用同一套表定义。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS sync_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS local_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_bool_setting(conn: &Connection, key: &str, value: bool) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, if value { "1" } else { "0" }],
        )
    })?;
    Ok(())
}

fn get_bool_setting(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = conn
        .query_row(
            "SELECT value FROM app_settings WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_setting(conn, "telemetry_enabled", false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_setting(conn, "telemetry_enabled", enabled)
}

fn kv_get(conn: &Connection, table: &str, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        &format!("SELECT value FROM {} WHERE key=?1", table),
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn kv_set(conn: &Connection, table: &str, key: &str, value: &str) -> Result<(), StorageError> {
    retry_on_locked(|| {
        conn.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                table
            ),
            params![key, value],
        )
    })
    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
    Ok(())
}

/**
 * \brief SQLite 支撑的配置存储（`sync_config` 表）。
 */
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    pub fn new(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /** \brief 打开默认的同步配置数据库。 */
    pub fn open_default() -> Result<Self> {
        Self::new(open_db(SYNC_DB_FILE)?)
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(kv_get(&conn, "sync_config", key)?.unwrap_or_default())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        kv_set(&conn, "sync_config", key, value)
    }
}

/**
 * \brief SQLite 支撑的历史存储：`local_store` 表中 `histories` 键下的 JSON 数组。
 */
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn new(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::new(open_db(LOCAL_DB_FILE)?)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn load(&self) -> Result<Vec<HistoryRecord>, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        match kv_get(&conn, "local_store", HISTORY_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
                key: HISTORY_KEY.to_string(),
                message: e.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, records: &[HistoryRecord]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(records).map_err(|e| StorageError::Corrupt {
            key: HISTORY_KEY.to_string(),
            message: e.to_string(),
        })?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        kv_set(&conn, "local_store", HISTORY_KEY, &raw)
    }
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
