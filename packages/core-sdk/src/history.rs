use std::sync::Mutex;

use async_trait::async_trait;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::StorageError;
use crate::models::HistoryRecord;

/** \brief 本地历史最多保留的条数。 */
pub const HISTORY_LIMIT: usize = 100;

/** \brief 本地存储中保存历史的键。 */
pub const HISTORY_KEY: &str = "histories";

/**
 * \brief 仅本地的较大键值存储，这里只关心 `histories` 一个键。
 */
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self) -> Result<Vec<HistoryRecord>, StorageError>;
    async fn save(&self, records: &[HistoryRecord]) -> Result<(), StorageError>;
}

/**
 * \brief 追加一条历史，并只保留最近 HISTORY_LIMIT 条。
 * \details 读-改-写，不加锁；并发追加时后写者覆盖。
 */
pub async fn append_history(
    store: &dyn HistoryStore,
    record: HistoryRecord,
) -> Result<(), StorageError> {
    let mut records = store.load().await?;
    records.push(record);
    let overflow = records.len().saturating_sub(HISTORY_LIMIT);
    records.drain(..overflow);
    store.save(&records).await
}

pub async fn list_history(store: &dyn HistoryStore) -> Result<Vec<HistoryRecord>, StorageError> {
    store.load().await
}

/** \brief 当前 UTC 时间的 RFC 3339 字符串。 */
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/**
 * \brief 内存实现。
 */
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self) -> Result<Vec<HistoryRecord>, StorageError> {
        self.records
            .lock()
            .map(|r| r.clone())
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn save(&self, records: &[HistoryRecord]) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        *guard = records.to_vec();
        Ok(())
    }
}
