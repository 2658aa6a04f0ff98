use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::core::error::TaskError;

/// 字节范围 `[offset, offset + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}

impl ByteRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// 结束位置（不含），超出 u64 时为 `None`
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    /// 结束位置（不含），溢出时截断到 `u64::MAX`
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// 最后一个字节的位置，空范围没有
    pub fn last(&self) -> Option<u64> {
        self.size
            .checked_sub(1)
            .and_then(|n| self.offset.checked_add(n))
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// HTTP `Range` 请求头的值
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.offset, self.last().unwrap_or(self.offset))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// 完整下载请求范围
    Full,
    /// 从输出端已有长度继续下载
    Resume,
    /// 仅探测资源大小
    SizeOnly,
}

/// 任务状态，只会向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskState {
    JustAdded,
    Downloading,
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::JustAdded => "等待中",
            TaskState::Downloading => "下载中",
            TaskState::Finished => "已结束",
        };
        f.write_str(name)
    }
}

/// 创建后不再变化的任务信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub url: String,
    pub destination: String,
    pub kind: TaskKind,
    pub timeout_secs: u64,
    /// `None` 表示范围未知，需要先探测
    pub range: Option<ByteRange>,
}

/// 任务状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub error: TaskError,
    pub size_total: Option<u64>,
    pub size_downloaded: u64,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self {
            state: TaskState::JustAdded,
            error: TaskError::default(),
            size_total: None,
            size_downloaded: 0,
        }
    }
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    pub fn is_success(&self) -> bool {
        self.is_finished() && !self.error.error_happened
    }

    /// 进度百分比，总大小未知时为 0
    pub fn progress(&self) -> f64 {
        match self.size_total {
            Some(total) if total > 0 => self.size_downloaded as f64 / total as f64 * 100.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self
            .size_total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "未知".to_string());
        write!(
            f,
            "{} {}/{} 字节 ({:.1}%)",
            self.state,
            self.size_downloaded,
            total,
            self.progress()
        )?;
        if self.error.error_happened {
            write!(f, " 错误: {}", self.error)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct TaskShared {
    id: Uuid,
    info: TaskInfo,
    status: Mutex<TaskStatus>,
}

/// 任务句柄，可在任意线程克隆和读取
#[derive(Debug, Clone)]
pub struct TaskHandle(Arc<TaskShared>);

impl TaskHandle {
    pub(crate) fn new(info: TaskInfo) -> Self {
        // 范围已知时，总大小在创建时就确定
        let status = TaskStatus {
            size_total: info.range.map(|range| range.size),
            ..TaskStatus::default()
        };
        TaskHandle(Arc::new(TaskShared {
            id: Uuid::new_v4(),
            info,
            status: Mutex::new(status),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn info(&self) -> &TaskInfo {
        &self.0.info
    }

    pub fn status(&self) -> TaskStatus {
        self.0
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn publish(&self, status: &TaskStatus) {
        let mut guard = self
            .0
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = status.clone();
    }

    /// 直接结束一个从未调度过的任务
    pub(crate) fn finish_unscheduled(&self, record: impl FnOnce(&mut TaskError)) {
        let mut guard = self
            .0
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.state == TaskState::Finished {
            return;
        }
        record(&mut guard.error);
        guard.state = TaskState::Finished;
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TaskHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range() {
        let range = ByteRange::new(100, 50);
        assert_eq!(range.end(), 150);
        assert_eq!(range.last(), Some(149));
        assert_eq!(range.header_value(), "bytes=100-149");
        assert_eq!(ByteRange::new(7, 0).last(), None);
        assert!(ByteRange::new(7, 0).is_empty());
    }

    #[test]
    fn test_byte_range_overflow() {
        let range = ByteRange::new(u64::MAX - 5, 10);
        assert_eq!(range.checked_end(), None);
        assert_eq!(range.end(), u64::MAX);
        assert_eq!(range.last(), None);
        assert_eq!(ByteRange::new(u64::MAX - 5, 5).checked_end(), Some(u64::MAX));
        assert_eq!(ByteRange::new(u64::MAX - 5, 6).last(), Some(u64::MAX));
    }

    #[test]
    fn test_known_range_sets_total_at_creation() {
        let info = |range| TaskInfo {
            url: "http://example.com/a".into(),
            destination: "a".into(),
            kind: TaskKind::Full,
            timeout_secs: 30,
            range,
        };
        let known = TaskHandle::new(info(Some(ByteRange::new(100, 4096)))).status();
        assert_eq!(known.state, TaskState::JustAdded);
        assert_eq!(known.size_total, Some(4096));
        assert_eq!(known.size_downloaded, 0);

        assert_eq!(TaskHandle::new(info(None)).status().size_total, None);
    }

    #[test]
    fn test_state_order() {
        assert!(TaskState::JustAdded < TaskState::Downloading);
        assert!(TaskState::Downloading < TaskState::Finished);
    }

    #[test]
    fn test_handle_publish_snapshot() {
        let handle = TaskHandle::new(TaskInfo {
            url: "http://example.com/a".into(),
            destination: "a".into(),
            kind: TaskKind::Full,
            timeout_secs: 30,
            range: None,
        });
        let copy = handle.clone();
        assert_eq!(copy, handle);

        let mut status = handle.status();
        assert_eq!(status.state, TaskState::JustAdded);
        status.state = TaskState::Finished;
        status.size_total = Some(10);
        status.size_downloaded = 10;
        handle.publish(&status);

        let seen = copy.status();
        assert!(seen.is_success());
        assert_eq!(seen.progress(), 100.0);
        assert!(seen.to_string().contains("已结束"));
    }
}
