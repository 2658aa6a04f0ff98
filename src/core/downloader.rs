//! 下载器门面：线程安全的任务创建、移除、等待与状态查询
//!
//! 所有网络操作与任务状态修改都在内部工作线程上完成，
//! 调用方只负责把请求放入队列并读取状态快照。

use log::{debug, info};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use super::error::{DownloadError, DownloadResult};
use super::task::download_task::Destination;
use super::task::retry::RetryStrategy;
use super::task::state::{ByteRange, TaskHandle, TaskInfo, TaskKind, TaskStatus};
use super::transport::{HttpTransport, Transport};
use super::worker::{lock, spawn_worker, PendingTask, Shared, Waiter};
use crate::utils::validator::validate_url;

/// 下载参数
#[derive(Debug, Clone, PartialEq)]
pub struct Hints {
    /// 同时在用的连接句柄上限
    pub max_concurrent_handles: usize,
    /// 分块大小（字节）
    pub chunk_size: u64,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    pub retry: RetryStrategy,
}

impl Default for Hints {
    fn default() -> Self {
        Self {
            max_concurrent_handles: 8,
            chunk_size: 512 * 1024,
            timeout_secs: 30,
            retry: RetryStrategy::default(),
        }
    }
}

impl Hints {
    pub fn validate(&self) -> DownloadResult<()> {
        if self.max_concurrent_handles == 0 {
            return Err(DownloadError::Config("并发句柄数必须大于0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::Config("分块大小必须大于0".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(DownloadError::Config("超时时间必须大于0".to_string()));
        }
        Ok(())
    }
}

/// 下载器运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloaderStats {
    pub handles_in_use: usize,
    pub peak_handles_in_use: usize,
    pub tasks_registered: usize,
    pub sub_tasks_created: u64,
}

pub struct Downloader {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Downloader {
    /// 使用 HTTP 传输创建下载器
    pub fn new(hints: Hints) -> DownloadResult<Self> {
        Self::with_transport(hints, HttpTransport::default)
    }

    /// 使用自定义传输创建下载器，`factory` 在工作线程上调用
    pub fn with_transport<T, F>(hints: Hints, factory: F) -> DownloadResult<Self>
    where
        T: Transport,
        F: FnOnce() -> T + Send + 'static,
    {
        hints.validate()?;
        let shared = Arc::new(Shared::new(hints));
        let worker = spawn_worker(Arc::clone(&shared), factory)?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// 仅探测资源大小
    pub fn start_size_probe(&self, url: &str) -> DownloadResult<TaskHandle> {
        self.enqueue(url, TaskKind::SizeOnly, None, None)
    }

    /// 完整下载，`range` 为 `None` 时先探测大小
    pub fn start_task(
        &self,
        url: &str,
        destination: Destination,
        range: Option<ByteRange>,
    ) -> DownloadResult<TaskHandle> {
        self.enqueue(url, TaskKind::Full, Some(destination), range)
    }

    /// 从输出端已有的长度继续下载
    pub fn resume_task(
        &self,
        url: &str,
        destination: Destination,
        range: Option<ByteRange>,
    ) -> DownloadResult<TaskHandle> {
        self.enqueue(url, TaskKind::Resume, Some(destination), range)
    }

    fn enqueue(
        &self,
        url: &str,
        kind: TaskKind,
        destination: Option<Destination>,
        range: Option<ByteRange>,
    ) -> DownloadResult<TaskHandle> {
        validate_url(url)?;
        let description = match &destination {
            Some(Destination::Path(path)) if path.as_os_str().is_empty() => {
                return Err(DownloadError::MissingDestination(url.to_string()));
            }
            Some(destination) => destination.describe(),
            None if kind != TaskKind::SizeOnly => {
                return Err(DownloadError::MissingDestination(url.to_string()));
            }
            None => String::new(),
        };
        if let Some(range) = range {
            if range.checked_end().is_none() {
                return Err(DownloadError::InvalidRange(format!(
                    "[{}, {}+{}) 超出可表示范围",
                    range.offset, range.offset, range.size
                )));
            }
        }

        let timeout_secs = {
            let hints = lock(&self.shared.hints);
            self.shared.started.store(true, Ordering::SeqCst);
            hints.timeout_secs
        };
        let handle = TaskHandle::new(TaskInfo {
            url: url.to_string(),
            destination: description,
            kind,
            timeout_secs,
            range,
        });

        {
            let mut pending = lock(&self.shared.pending);
            if self.shared.is_closed() {
                return Err(DownloadError::Multiplexer("下载工作线程已退出".to_string()));
            }
            pending.push_back(PendingTask {
                handle: handle.clone(),
                destination,
            });
        }
        self.shared.wake();
        info!("新任务 {}: {:?} {} 范围 {:?}", handle.id(), kind, url, range);
        Ok(handle)
    }

    /// 移除任务
    ///
    /// 尚未开始的任务直接从队列中移除，不会发出任何请求；
    /// 进行中的任务由工作线程取消在途请求并排空后结束。
    pub fn remove_task(&self, task: &TaskHandle) {
        let removed_pending = {
            let mut pending = lock(&self.shared.pending);
            match pending.iter().position(|p| p.handle == *task) {
                Some(index) => pending.remove(index),
                None => None,
            }
        };

        match removed_pending {
            Some(pending) => {
                debug!("任务 {} 在开始前被移除", task.id());
                pending
                    .handle
                    .finish_unscheduled(|e| e.record_other("任务在开始前被移除"));
            }
            None => lock(&self.shared.removals).push(task.clone()),
        }
        self.shared.wake();
    }

    /// 阻塞直到任务结束或被移除，返回最终状态
    ///
    /// 不能在异步运行时的线程上调用。
    pub fn wait_task(&self, task: &TaskHandle) -> TaskStatus {
        if !task.status().is_finished() {
            let (done, wait) = oneshot::channel();
            {
                let mut waiters = lock(&self.shared.waiters);
                // 工作线程已退出时没有人会唤醒等待者
                if self.shared.is_closed() {
                    return task.status();
                }
                waiters.push(Waiter {
                    handle: task.clone(),
                    done,
                });
            }
            self.shared.wake();
            let _ = wait.blocking_recv();
        }
        task.status()
    }

    pub fn task_info(&self, task: &TaskHandle) -> TaskInfo {
        task.info().clone()
    }

    pub fn task_status(&self, task: &TaskHandle) -> TaskStatus {
        task.status()
    }

    /// 修改下载参数，只能在第一个任务开始之前调用
    pub fn set_hints(&self, hints: Hints) -> DownloadResult<()> {
        hints.validate()?;
        let mut current = lock(&self.shared.hints);
        if self.shared.started.load(Ordering::SeqCst) {
            return Err(DownloadError::Config(
                "已有任务开始后不能修改下载参数".to_string(),
            ));
        }
        *current = hints;
        drop(current);
        self.shared.wake();
        Ok(())
    }

    pub fn hints(&self) -> Hints {
        lock(&self.shared.hints).clone()
    }

    pub fn stats(&self) -> DownloaderStats {
        let counters = &self.shared.counters;
        DownloaderStats {
            handles_in_use: counters.handles_in_use.load(Ordering::SeqCst),
            peak_handles_in_use: counters.peak_handles_in_use.load(Ordering::SeqCst),
            tasks_registered: counters.tasks_registered.load(Ordering::SeqCst),
            sub_tasks_created: counters.sub_tasks_created.load(Ordering::SeqCst),
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("下载工作线程异常退出");
            }
        }
    }
}
