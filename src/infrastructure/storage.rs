// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::settings::{StorageSettings, StorageType};
use crate::domain::models::record::RawRecord;
use crate::domain::repositories::record_repository::RecordRepository;
use crate::utils::errors::RepositoryError;

#[derive(Default)]
struct MemoryState {
    seen: HashSet<String>,
    records: Vec<RawRecord>,
}

/// 内存记录仓库
///
/// 按记录指纹去重，进程退出后数据丢失。
#[derive(Default)]
pub struct InMemoryRecordRepository {
    state: parking_lot::Mutex<MemoryState>,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已保存记录的副本
    pub fn records(&self) -> Vec<RawRecord> {
        self.state.lock().records.clone()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn persist(&self, records: &[RawRecord]) -> Result<usize, RepositoryError> {
        let mut state = self.state.lock();
        let mut saved = 0;
        for record in records {
            if state.seen.insert(record.fingerprint()) {
                state.records.push(record.clone());
                saved += 1;
            }
        }
        Ok(saved)
    }

    async fn current_record_count(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.lock().records.len() as u64)
    }
}

struct JsonLinesState {
    seen: HashSet<String>,
    count: u64,
}

/// JSON Lines 文件记录仓库
///
/// 每条记录一行追加写入。打开时读取已有文件重建指纹集合，
/// 因此重复运行不会写入重复记录。
pub struct JsonLinesRecordRepository {
    path: PathBuf,
    state: Mutex<JsonLinesState>,
}

impl JsonLinesRecordRepository {
    /// 打开或创建记录文件
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut seen = HashSet::new();
        match fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RawRecord>(line) {
                        Ok(record) => {
                            seen.insert(record.fingerprint());
                        }
                        Err(e) => warn!(path = %path.display(), line = line_no + 1, "跳过无法解析的记录: {}", e),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RepositoryError::Io(e)),
        }

        let count = seen.len() as u64;
        info!(path = %path.display(), existing = count, "记录文件已打开");
        Ok(Self {
            path,
            state: Mutex::new(JsonLinesState { seen, count }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordRepository for JsonLinesRecordRepository {
    async fn persist(&self, records: &[RawRecord]) -> Result<usize, RepositoryError> {
        let mut state = self.state.lock().await;

        let mut buffer = String::new();
        let mut fresh = Vec::new();
        for record in records {
            let fingerprint = record.fingerprint();
            if state.seen.contains(&fingerprint) || fresh.contains(&fingerprint) {
                continue;
            }
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
            fresh.push(fingerprint);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        let saved = fresh.len();
        state.count += saved as u64;
        state.seen.extend(fresh);
        debug!(saved, total = state.count, "记录已写入");
        Ok(saved)
    }

    async fn current_record_count(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.lock().await.count)
    }
}

/// 存储工厂函数
pub async fn create_record_repository(
    settings: &StorageSettings,
) -> Result<Arc<dyn RecordRepository>, RepositoryError> {
    match settings.storage_type {
        StorageType::Memory => Ok(Arc::new(InMemoryRecordRepository::new())),
        StorageType::Jsonl => Ok(Arc::new(
            JsonLinesRecordRepository::open(&settings.local_path).await?,
        )),
    }
}
