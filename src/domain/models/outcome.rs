// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::detection::Strategy;
use super::record::RawRecord;
use super::task::Task;

/// 挑战处理的最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Resolved,
    Persistent,
}

/// 一次挑战处理调用的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlingOutcome {
    pub success: bool,
    pub strategy_used: Strategy,
    pub attempts_made: u32,
    pub elapsed: Duration,
    pub final_status: FinalStatus,
    pub recommendations: Vec<String>,
}

/// 任务失败的类别
///
/// 决定重新入队时的退避时长。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 超时、连接错误、非预期状态码
    Transient,
    /// 检测到挑战且处理后仍未消除
    ChallengePersisted,
    /// 重试无意义的失败，如 404 或资源不支持的操作
    Permanent,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Permanent)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::ChallengePersisted => write!(f, "challenge_persisted"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// 单次任务尝试的失败信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// worker 每次任务尝试产出一个结果
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub task: Task,
    pub success: bool,
    pub records: Vec<RawRecord>,
    pub error: Option<TaskFailure>,
    pub elapsed: Duration,
    pub worker_id: usize,
    /// 本次尝试是否遇到挑战
    pub challenge: Option<ChallengeReport>,
}

/// 尝试过程中遇到挑战时的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeReport {
    pub strategy: Strategy,
    pub resolved: bool,
}

impl WorkerResult {
    pub fn succeeded(
        task: Task,
        records: Vec<RawRecord>,
        elapsed: Duration,
        worker_id: usize,
        challenge: Option<ChallengeReport>,
    ) -> Self {
        Self {
            task,
            success: true,
            records,
            error: None,
            elapsed,
            worker_id,
            challenge,
        }
    }

    pub fn failed(
        task: Task,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
        worker_id: usize,
        challenge: Option<ChallengeReport>,
    ) -> Self {
        Self {
            task,
            success: false,
            records: Vec::new(),
            error: Some(TaskFailure {
                kind,
                message: message.into(),
            }),
            elapsed,
            worker_id,
            challenge,
        }
    }
}

/// 资源采样
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// 进程常驻内存，单位 MB
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub within_limits: bool,
}

/// 运行结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    BatchesExhausted,
    Cancelled,
}

/// 采集运行汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_records: u64,
    pub elapsed: Duration,
    pub tasks_completed: u64,
    /// 失败的尝试次数，包含随后被重试的尝试
    pub tasks_failed: u64,
    /// 重试耗尽后被丢弃的任务数
    pub tasks_abandoned: u64,
    pub total_attempts: u64,
    pub records_per_second: f64,
    pub target_achieved: bool,
    pub batches_processed: usize,
    pub success_rate: f64,
    pub challenges_detected: u64,
    pub challenges_resolved: u64,
    pub stop_reason: StopReason,
}
