//! Core: 下载器门面、工作线程调度、任务状态机、传输层与错误处理等核心逻辑模块

pub mod downloader;
pub mod error;
pub mod handle_pool;
pub mod task;
pub mod transport;
pub(crate) mod worker;
pub mod writer;

// 只导出主流程和其它模块实际用到的类型
pub use downloader::{Downloader, DownloaderStats, Hints};
pub use error::{DownloadError, DownloadResult, FetchError, TaskError};
pub use task::{
    ByteRange, Destination, RetryStrategy, TaskHandle, TaskInfo, TaskKind, TaskState, TaskStatus,
};
pub use transport::{HttpTransport, Transport};
pub use writer::{BufferWriter, FileWriter, SharedWriter, Writer};
