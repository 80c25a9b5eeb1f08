// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;

use crate::domain::models::record::RawRecord;
use crate::utils::errors::RepositoryError;

/// 采集记录仓库
///
/// 两个操作都需要对重复记录幂等，去重由存储层负责。
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// 持久化一批记录，返回实际新增的条数
    async fn persist(&self, records: &[RawRecord]) -> Result<usize, RepositoryError>;

    /// 当前已存储的记录总数
    async fn current_record_count(&self) -> Result<u64, RepositoryError>;
}
