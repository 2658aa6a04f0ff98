use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

use super::state::ByteRange;
use crate::core::error::FetchError;
use crate::core::transport::Request;

/// 子任务编号，由工作线程单调分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubTaskId(pub u64);

impl fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 在途子任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTask {
    /// 探测资源大小
    Probe,
    /// 下载一段数据，`order` 决定写入顺序
    Chunk { order: u64, range: ByteRange },
}

/// 子任务成功时的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Size { status: u16, total: u64 },
    Data { status: u16, body: Bytes },
}

pub type Outcome = Result<Payload, FetchError>;

/// 任务向工作线程申请子任务的接口
pub(crate) trait Spawner {
    fn free_handles(&self) -> usize;

    /// 占用一个连接句柄并发出请求
    fn spawn(&mut self, owner: Uuid, request: Request) -> SubTaskId;

    /// 取消在途子任务，完成结果仍会送回
    fn cancel(&mut self, id: SubTaskId);
}
