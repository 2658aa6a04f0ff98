use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::chunk_manager::{ChunkCursor, ReadyChunk, ReadyQueue};
use super::state::{ByteRange, TaskHandle, TaskKind, TaskState, TaskStatus};
use super::subtask::{Outcome, Payload, Spawner, SubTask, SubTaskId};
use crate::core::error::FetchError;
use crate::core::transport::Request;
use crate::core::writer::{FileWriter, SharedWriter, Writer};

/// 下载目标
#[derive(Clone)]
pub enum Destination {
    /// 由任务在工作线程上打开的文件
    Path(PathBuf),
    /// 调用方提供的输出端，任务结束时只关闭
    Writer(SharedWriter),
}

impl Destination {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Destination::Path(path.into())
    }

    pub fn writer(writer: SharedWriter) -> Self {
        Destination::Writer(writer)
    }

    pub fn describe(&self) -> String {
        match self {
            Destination::Path(path) => path.display().to_string(),
            Destination::Writer(_) => "<writer>".to_string(),
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({})", self.describe())
    }
}

enum WriterSlot {
    Empty,
    Owned(Box<dyn Writer>),
    Shared(SharedWriter),
}

impl WriterSlot {
    fn with<R>(&mut self, f: impl FnOnce(&mut dyn Writer) -> io::Result<R>) -> io::Result<R> {
        match self {
            WriterSlot::Empty => Err(io::Error::new(io::ErrorKind::NotFound, "任务没有输出端")),
            WriterSlot::Owned(writer) => f(writer.as_mut()),
            WriterSlot::Shared(writer) => {
                let mut guard = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                f(&mut *guard)
            }
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, WriterSlot::Empty)
    }
}

/// 单个下载任务的状态机，只在工作线程上修改
pub(crate) struct DownloadTask {
    handle: TaskHandle,
    status: TaskStatus,
    destination: Option<Destination>,
    writer: WriterSlot,
    chunk_size: u64,
    timeout: Duration,
    cursor: ChunkCursor,
    working: HashMap<SubTaskId, SubTask>,
    ready: ReadyQueue,
    next_write: u64,
    removing: bool,
}

impl DownloadTask {
    pub fn new(handle: TaskHandle, destination: Option<Destination>, chunk_size: u64) -> Self {
        let timeout = Duration::from_secs(handle.info().timeout_secs);
        Self {
            status: handle.status(),
            handle,
            destination,
            writer: WriterSlot::Empty,
            chunk_size,
            timeout,
            cursor: ChunkCursor::default(),
            working: HashMap::new(),
            ready: ReadyQueue::new(),
            next_write: 0,
            removing: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn is_finished(&self) -> bool {
        self.status.state == TaskState::Finished
    }

    pub fn in_flight(&self) -> usize {
        self.working.len()
    }

    fn is_failed(&self) -> bool {
        self.status.error.error_happened
    }

    /// 还有未切出的数据且允许继续调度
    pub fn needs_data(&self) -> bool {
        self.status.state == TaskState::Downloading
            && !self.removing
            && !self.is_failed()
            && self.cursor.remaining() > 0
    }

    /// 首次出队时调用，按任务类型准备输出端并发出第一批请求
    pub fn prepare(&mut self, spawner: &mut dyn Spawner) {
        self.status.state = TaskState::Downloading;
        self.publish();

        let (kind, range) = (self.handle.info().kind, self.handle.info().range);
        info!(
            "任务 {} 开始: {:?} {} 范围 {:?}",
            self.id(),
            kind,
            self.handle.info().url,
            range
        );

        match kind {
            TaskKind::SizeOnly => self.spawn_probe(spawner),
            TaskKind::Full | TaskKind::Resume => {
                if let Err(e) = self.open_writer(kind == TaskKind::Resume) {
                    error!("任务 {} 打开输出端失败: {}", self.id(), e);
                    self.status.error.record_io(&e);
                    self.finalize();
                    return;
                }
                match (kind, range) {
                    (TaskKind::Full, Some(range)) => self.start_range(spawner, range, 0),
                    (TaskKind::Resume, Some(range)) => self.resume_from(spawner, range),
                    _ => self.spawn_probe(spawner),
                }
            }
        }
    }

    fn open_writer(&mut self, append: bool) -> io::Result<()> {
        match self.destination.take() {
            Some(Destination::Path(path)) => {
                let writer = if append {
                    FileWriter::append(&path)?
                } else {
                    FileWriter::create(&path)?
                };
                self.writer = WriterSlot::Owned(Box::new(writer));
            }
            Some(Destination::Writer(writer)) => {
                self.writer = WriterSlot::Shared(writer);
                if !append {
                    self.writer.with(|w| w.truncate())?;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn spawn_probe(&mut self, spawner: &mut dyn Spawner) {
        let request = Request::size(self.handle.info().url.clone(), self.timeout);
        let id = spawner.spawn(self.id(), request);
        self.working.insert(id, SubTask::Probe);
        debug!("任务 {} 发出大小探测 {}", self.id(), id);
    }

    fn resume_from(&mut self, spawner: &mut dyn Spawner, range: ByteRange) {
        let position = if self.writer.is_empty() {
            Ok(0)
        } else {
            self.writer.with(|w| w.seek_pos())
        };
        match position {
            Ok(position) => {
                if position > range.size {
                    warn!(
                        "任务 {} 已有数据 {} 字节超过请求大小 {}",
                        self.id(),
                        position,
                        range.size
                    );
                }
                self.start_range(spawner, range, position.min(range.size));
            }
            Err(e) => {
                self.status.error.record_io(&e);
                self.finalize();
            }
        }
    }

    fn start_range(&mut self, spawner: &mut dyn Spawner, range: ByteRange, already: u64) {
        self.status.size_total = Some(range.size);
        self.status.size_downloaded = already;
        let rest = ByteRange::new(range.offset + already, range.size - already);
        self.cursor = ChunkCursor::new(rest);
        self.publish();

        if rest.is_empty() {
            info!("任务 {} 无需下载数据", self.id());
            self.finalize();
            return;
        }
        debug!("任务 {} 剩余范围 {}", self.id(), rest);
        self.generate_chunks(spawner);
    }

    /// 在句柄预算内切出新的子任务
    pub fn generate_chunks(&mut self, spawner: &mut dyn Spawner) -> usize {
        let mut created = 0;
        while self.needs_data() && spawner.free_handles() > 0 {
            let Some((order, range)) = self.cursor.next_chunk(self.chunk_size) else {
                break;
            };
            let request = Request::range(self.handle.info().url.clone(), range, self.timeout);
            let id = spawner.spawn(self.id(), request);
            self.working.insert(id, SubTask::Chunk { order, range });
            created += 1;
        }
        if created > 0 {
            debug!(
                "任务 {} 新增 {} 个分块，在途 {}，剩余 {} 字节",
                self.id(),
                created,
                self.working.len(),
                self.cursor.remaining()
            );
        }
        created
    }

    /// 子任务完成（成功、失败或取消）后由工作线程调用
    pub fn on_subtask_done(&mut self, spawner: &mut dyn Spawner, id: SubTaskId, outcome: Outcome) {
        let subtask = match self.working.remove(&id) {
            Some(subtask) => subtask,
            None => panic!("任务 {} 收到未知子任务 {}", self.id(), id),
        };

        match subtask {
            SubTask::Probe => self.on_probe_done(spawner, outcome),
            SubTask::Chunk { order, range } => {
                let body = match outcome {
                    Ok(Payload::Data { status, body }) => {
                        self.status.error.record_http_success(status);
                        Some(body)
                    }
                    Ok(Payload::Size { .. }) => {
                        self.fail(spawner, |e| e.record_other("分块请求返回了大小探测结果"));
                        None
                    }
                    Err(FetchError::Cancelled) => None,
                    Err(fetch_error) => {
                        error!("任务 {} 分块 {} 失败: {}", self.id(), range, fetch_error);
                        self.fail(spawner, |e| e.record_fetch(&fetch_error));
                        None
                    }
                };
                self.ready.push(ReadyChunk { order, range, body });
                self.flush_ready(spawner);
                self.generate_chunks(spawner);
                self.publish();
                self.maybe_finish();
            }
        }
    }

    fn on_probe_done(&mut self, spawner: &mut dyn Spawner, outcome: Outcome) {
        if self.removing {
            self.finalize();
            return;
        }
        match outcome {
            Ok(Payload::Size { status, total }) => {
                self.status.error.record_http_success(status);
                info!("任务 {} 探测到大小 {} 字节", self.id(), total);
                let range = ByteRange::new(0, total);
                match self.handle.info().kind {
                    TaskKind::SizeOnly => {
                        self.status.size_total = Some(total);
                        self.finalize();
                    }
                    TaskKind::Full => self.start_range(spawner, range, 0),
                    TaskKind::Resume => self.resume_from(spawner, range),
                }
            }
            Ok(Payload::Data { .. }) => {
                self.status.error.record_other("大小探测返回了数据");
                self.finalize();
            }
            Err(fetch_error) => {
                if fetch_error != FetchError::Cancelled {
                    error!("任务 {} 大小探测失败: {}", self.id(), fetch_error);
                    self.status.error.record_fetch(&fetch_error);
                }
                self.finalize();
            }
        }
    }

    /// 按序号写出连续的已完成分块；失败后只推进序号不写入
    fn flush_ready(&mut self, spawner: &mut dyn Spawner) {
        while let Some(chunk) = self.ready.pop_if(self.next_write) {
            self.next_write += 1;
            if self.is_failed() {
                continue;
            }
            let Some(body) = chunk.body else {
                continue;
            };
            match self.writer.with(|w| w.save(&body)) {
                Ok(written) if written == body.len() => {
                    self.status.size_downloaded += written as u64;
                }
                Ok(written) => {
                    // 输出端已接受的部分照样计入
                    self.status.size_downloaded += written as u64;
                    let short = io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("短写: {}/{} 字节", written, body.len()),
                    );
                    error!("任务 {} 写入分块 {} 失败: {}", self.id(), chunk.range, short);
                    self.fail(spawner, |e| e.record_io(&short));
                }
                Err(io_error) => {
                    error!("任务 {} 写入分块 {} 失败: {}", self.id(), chunk.range, io_error);
                    self.fail(spawner, |e| e.record_io(&io_error));
                }
            }
        }
    }

    /// 记录失败并立即取消其余在途子任务
    fn fail(
        &mut self,
        spawner: &mut dyn Spawner,
        record: impl FnOnce(&mut crate::core::error::TaskError),
    ) {
        record(&mut self.status.error);
        self.cancel_in_flight(spawner);
    }

    fn cancel_in_flight(&self, spawner: &mut dyn Spawner) {
        for id in self.working.keys() {
            spawner.cancel(*id);
        }
    }

    /// 取消在途子任务，排空后结束
    pub fn begin_removal(&mut self, spawner: &mut dyn Spawner) {
        if self.is_finished() || self.removing {
            return;
        }
        info!("移除任务 {}，等待 {} 个在途子任务结束", self.id(), self.working.len());
        self.removing = true;
        self.status.error.record_other("任务已被移除");
        self.cancel_in_flight(spawner);
        self.publish();
        self.maybe_finish();
    }

    fn maybe_finish(&mut self) {
        if self.is_finished() || !self.working.is_empty() {
            return;
        }
        if self.cursor.remaining() == 0 || self.is_failed() {
            self.ready.clear();
            self.finalize();
        }
    }

    fn finalize(&mut self) {
        if !self.writer.is_empty() {
            if let Err(e) = self.writer.with(|w| w.close()) {
                self.status.error.record_io(&e);
            }
        }
        self.status.state = TaskState::Finished;
        self.publish();

        if self.is_failed() {
            warn!("任务 {} 结束，出现错误: {}", self.id(), self.status.error);
        } else {
            info!(
                "任务 {} 完成: {}/{:?} 字节",
                self.id(),
                self.status.size_downloaded,
                self.status.size_total
            );
        }
    }

    /// 外部强制结束（下载器关闭）
    pub fn abandon(&mut self, reason: &str) {
        if self.is_finished() {
            return;
        }
        self.status.error.record_multiplexer(reason);
        self.working.clear();
        self.ready.clear();
        self.finalize();
    }

    fn publish(&self) {
        self.handle.publish(&self.status);
    }
}
