//! `task` 模块包含单个下载任务相关的逻辑
//!
//! 主要包括：
//! - `state`: 任务信息、状态快照与跨线程句柄
//! - `subtask`: 子任务与调度接口
//! - `chunk_manager`: 剩余范围切分与按序写出的就绪队列
//! - `download`: 子任务请求与响应校验
//! - `download_task`: 任务状态机
//! - `retry`: 重试逻辑

pub mod state;
pub mod subtask;
pub mod chunk_manager;
pub mod download;
pub(crate) mod download_task;
pub mod retry;

pub use state::{ByteRange, TaskHandle, TaskInfo, TaskKind, TaskState, TaskStatus};
pub use download_task::Destination;
pub use retry::{RetryContext, RetryStrategy};
pub use subtask::{Payload, SubTaskId};
