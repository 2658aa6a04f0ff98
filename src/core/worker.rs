//! 工作线程：独占传输层，驱动所有任务与子任务
//!
//! 每轮循环依次：
//! 1. 唤醒已结束任务的等待者
//! 2. 处理移除请求
//! 3. 在句柄预算内接纳新任务
//! 4. 按注册顺序为任务补充子任务
//! 5. 驱动在途请求一个轮询周期，收割完成的子任务
//!
//! 没有在途请求时线程挂起，直到调用方发出唤醒信号。

use futures::future::{AbortHandle, Abortable, LocalBoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, trace};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use uuid::Uuid;

use super::downloader::Hints;
use super::error::{DownloadError, DownloadResult, FetchError};
use super::handle_pool::HandlePool;
use super::task::download::fetch_with_retry;
use super::task::download_task::{Destination, DownloadTask};
use super::task::retry::RetryStrategy;
use super::task::state::TaskHandle;
use super::task::subtask::{Outcome, Spawner, SubTaskId};
use super::transport::{Request, Transport};
use crate::utils::timer::ScopeTimer;

/// 单轮驱动的最长等待
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

pub(crate) struct PendingTask {
    pub handle: TaskHandle,
    pub destination: Option<Destination>,
}

pub(crate) struct Waiter {
    pub handle: TaskHandle,
    pub done: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub handles_in_use: AtomicUsize,
    pub peak_handles_in_use: AtomicUsize,
    pub tasks_registered: AtomicUsize,
    pub sub_tasks_created: AtomicU64,
}

/// 调用方线程与工作线程共享的状态
pub(crate) struct Shared {
    pub pending: Mutex<VecDeque<PendingTask>>,
    pub removals: Mutex<Vec<TaskHandle>>,
    pub waiters: Mutex<Vec<Waiter>>,
    pub hints: Mutex<Hints>,
    pub started: AtomicBool,
    pub shutdown: AtomicBool,
    /// 工作线程已退出，之后不再接纳任务和等待者；只在持有 `pending` 锁时置位
    pub closed: AtomicBool,
    pub counters: Counters,
    wake: Semaphore,
}

impl Shared {
    pub fn new(hints: Hints) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            removals: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
            hints: Mutex::new(hints),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            wake: Semaphore::new(0),
        }
    }

    /// 唤醒工作线程
    pub fn wake(&self) {
        self.wake.add_permits(1);
    }

    fn drain_wakeups(&self) {
        while let Ok(permit) = self.wake.try_acquire() {
            permit.forget();
        }
    }

    async fn wait_wakeup(&self) {
        if let Ok(permit) = self.wake.acquire().await {
            permit.forget();
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Completion<C> {
    id: SubTaskId,
    connection: C,
    outcome: Outcome,
}

/// 连接句柄池与在途请求集合
struct Multiplexer<T: Transport> {
    transport: Rc<T>,
    pool: HandlePool<T::Connection>,
    in_flight: FuturesUnordered<LocalBoxFuture<'static, Completion<T::Connection>>>,
    routes: HashMap<SubTaskId, Uuid>,
    aborts: HashMap<SubTaskId, AbortHandle>,
    next_id: u64,
    retry: RetryStrategy,
    shared: Arc<Shared>,
}

impl<T: Transport> Multiplexer<T> {
    fn new(transport: T, hints: &Hints, shared: Arc<Shared>) -> Self {
        Self {
            transport: Rc::new(transport),
            pool: HandlePool::new(hints.max_concurrent_handles),
            in_flight: FuturesUnordered::new(),
            routes: HashMap::new(),
            aborts: HashMap::new(),
            next_id: 0,
            retry: hints.retry.clone(),
            shared,
        }
    }

    /// 归还句柄，返回子任务所属的任务
    fn settle(&mut self, id: SubTaskId, mut connection: T::Connection) -> Uuid {
        self.aborts.remove(&id);
        let owner = match self.routes.remove(&id) {
            Some(owner) => owner,
            None => panic!("子任务 {} 没有登记所属任务", id),
        };
        self.transport.reset(&mut connection);
        self.pool.release(connection);
        self.shared
            .counters
            .handles_in_use
            .store(self.pool.in_use(), Ordering::SeqCst);
        owner
    }
}

impl<T: Transport> Spawner for Multiplexer<T> {
    fn free_handles(&self) -> usize {
        self.pool.free_count()
    }

    fn spawn(&mut self, owner: Uuid, request: Request) -> SubTaskId {
        let transport = &self.transport;
        let connection = self.pool.acquire(|| transport.open());
        let id = SubTaskId(self.next_id);
        self.next_id += 1;

        let (abort, registration) = AbortHandle::new_pair();
        let transport = Rc::clone(&self.transport);
        let retry = self.retry.clone();
        trace!("子任务 {} 发出 {:?}", id, request.kind);
        let transfer = async move {
            let outcome = Abortable::new(
                fetch_with_retry(&*transport, &connection, &request, &retry),
                registration,
            )
            .await
            .unwrap_or(Err(FetchError::Cancelled));
            Completion {
                id,
                connection,
                outcome,
            }
        };
        self.in_flight.push(transfer.boxed_local());
        self.routes.insert(id, owner);
        self.aborts.insert(id, abort);

        let counters = &self.shared.counters;
        counters.sub_tasks_created.fetch_add(1, Ordering::SeqCst);
        counters
            .handles_in_use
            .store(self.pool.in_use(), Ordering::SeqCst);
        counters
            .peak_handles_in_use
            .store(self.pool.peak_in_use(), Ordering::SeqCst);
        id
    }

    fn cancel(&mut self, id: SubTaskId) {
        if let Some(abort) = self.aborts.get(&id) {
            abort.abort();
        }
    }
}

struct WorkerLoop<T: Transport> {
    shared: Arc<Shared>,
    hints: Hints,
    mux: Multiplexer<T>,
    tasks: HashMap<Uuid, DownloadTask>,
    /// 注册顺序，决定句柄分配的先后
    order: Vec<Uuid>,
}

impl<T: Transport> WorkerLoop<T> {
    fn new(shared: Arc<Shared>, transport: T) -> Self {
        let hints = lock(&shared.hints).clone();
        let mux = Multiplexer::new(transport, &hints, Arc::clone(&shared));
        Self {
            shared,
            hints,
            mux,
            tasks: HashMap::new(),
            order: Vec::new(),
        }
    }

    async fn run(mut self) {
        info!(
            "下载工作线程启动: 句柄上限 {}, 分块 {} 字节",
            self.hints.max_concurrent_handles, self.hints.chunk_size
        );
        loop {
            self.shared.drain_wakeups();
            self.signal_finished_waiters();
            if self.shared.is_shutdown() {
                break;
            }
            self.sync_hints();
            self.apply_removals();
            self.admit_pending();
            self.balance_handles();

            if self.mux.in_flight.is_empty() {
                trace!("没有在途请求，挂起等待");
                self.shared.wait_wakeup().await;
                continue;
            }
            self.drive().await;
        }
        self.shutdown("下载器已关闭");
    }

    fn signal_finished_waiters(&mut self) {
        let waiters = std::mem::take(&mut *lock(&self.shared.waiters));
        let (done, waiting): (Vec<Waiter>, Vec<Waiter>) = waiters
            .into_iter()
            .partition(|w| w.handle.status().is_finished());
        lock(&self.shared.waiters).extend(waiting);
        for waiter in done {
            let _ = waiter.done.send(());
        }
    }

    /// 设置只允许在任何任务开始前修改，此时句柄池必然空闲
    fn sync_hints(&mut self) {
        let hints = lock(&self.shared.hints).clone();
        if hints != self.hints && self.mux.pool.set_capacity(hints.max_concurrent_handles) {
            debug!("应用新的下载参数: {:?}", hints);
            self.mux.retry = hints.retry.clone();
            self.hints = hints;
        }
    }

    fn apply_removals(&mut self) {
        let removals = std::mem::take(&mut *lock(&self.shared.removals));
        for handle in removals {
            let id = handle.id();
            let finished = match self.tasks.get_mut(&id) {
                Some(task) => {
                    task.begin_removal(&mut self.mux);
                    task.is_finished()
                }
                None => {
                    debug!("任务 {} 已结束，移除请求无需处理", id);
                    false
                }
            };
            if finished {
                self.retire(id);
            }
        }
    }

    fn admit_pending(&mut self) {
        while self.mux.free_handles() > 0 {
            let next = lock(&self.shared.pending).pop_front();
            let Some(pending) = next else {
                break;
            };
            let task = DownloadTask::new(pending.handle, pending.destination, self.hints.chunk_size);
            self.shared
                .counters
                .tasks_registered
                .fetch_add(1, Ordering::SeqCst);

            // 先登记再准备，准备过程中出现异常时关闭流程仍能结束该任务
            let id = task.id();
            self.order.push(id);
            self.tasks.insert(id, task);
            let finished = match self.tasks.get_mut(&id) {
                Some(task) => {
                    task.prepare(&mut self.mux);
                    task.is_finished()
                }
                None => false,
            };
            if finished {
                self.retire(id);
            }
        }
    }

    fn balance_handles(&mut self) {
        for id in &self.order {
            if self.mux.free_handles() == 0 {
                break;
            }
            if let Some(task) = self.tasks.get_mut(id) {
                if task.needs_data() {
                    task.generate_chunks(&mut self.mux);
                }
            }
        }
    }

    async fn drive(&mut self) {
        let _timer = ScopeTimer::new("驱动在途请求");
        let has_work = !self.mux.in_flight.is_empty();
        let first = tokio::select! {
            done = self.mux.in_flight.next(), if has_work => done,
            _ = self.shared.wait_wakeup() => None,
            _ = tokio::time::sleep(POLL_INTERVAL) => None,
        };
        if let Some(done) = first {
            self.on_completion(done);
        }
        while let Some(Some(done)) = self.mux.in_flight.next().now_or_never() {
            self.on_completion(done);
        }
    }

    fn on_completion(&mut self, done: Completion<T::Connection>) {
        let Completion {
            id,
            connection,
            outcome,
        } = done;
        let owner = self.mux.settle(id, connection);
        let finished = match self.tasks.get_mut(&owner) {
            Some(task) => {
                task.on_subtask_done(&mut self.mux, id, outcome);
                task.is_finished()
            }
            None => panic!("子任务 {} 的所属任务 {} 不存在", id, owner),
        };
        if finished {
            self.retire(owner);
        }
    }

    fn retire(&mut self, id: Uuid) {
        if let Some(task) = self.tasks.remove(&id) {
            debug_assert_eq!(task.in_flight(), 0);
        }
        self.order.retain(|other| *other != id);
        trace!("任务 {} 已注销，剩余 {} 个任务", id, self.tasks.len());
    }

    fn shutdown(&mut self, reason: &str) {
        info!(
            "下载工作线程退出: {} 个进行中任务，{} 个在途请求",
            self.tasks.len(),
            self.mux.in_flight.len()
        );
        self.mux.in_flight.clear();
        self.mux.aborts.clear();
        self.mux.routes.clear();
        for task in self.tasks.values_mut() {
            task.abandon(reason);
        }
        self.tasks.clear();
        self.order.clear();

        let pending: Vec<PendingTask> = {
            let mut queue = lock(&self.shared.pending);
            self.shared.closed.store(true, Ordering::SeqCst);
            queue.drain(..).collect()
        };
        for task in pending {
            task.handle.finish_unscheduled(|e| e.record_multiplexer(reason));
        }
        let waiters = std::mem::take(&mut *lock(&self.shared.waiters));
        for waiter in waiters {
            let _ = waiter.done.send(());
        }
        self.shared.counters.handles_in_use.store(0, Ordering::SeqCst);
    }
}

impl<T: Transport> Drop for WorkerLoop<T> {
    fn drop(&mut self) {
        // 正常退出时 run 已经调用过 shutdown
        if thread::panicking() && !self.shared.is_closed() {
            error!("下载工作线程异常退出，结束所有任务");
            self.shutdown("下载工作线程异常退出");
        }
    }
}

/// 启动工作线程；运行时创建失败时返回多路复用器错误
pub(crate) fn spawn_worker<T, F>(shared: Arc<Shared>, factory: F) -> DownloadResult<JoinHandle<()>>
where
    T: Transport,
    F: FnOnce() -> T + Send + 'static,
{
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
    let handle = thread::Builder::new()
        .name("chunkfetch-worker".to_string())
        .spawn(move || {
            let runtime = match actix_rt::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            runtime.block_on(async move {
                let transport = factory();
                WorkerLoop::new(shared, transport).run().await;
            });
        })
        .map_err(|e| DownloadError::Multiplexer(format!("无法启动工作线程: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(message)) => {
            let _ = handle.join();
            Err(DownloadError::Multiplexer(format!("无法创建运行时: {}", message)))
        }
        Err(_) => {
            let _ = handle.join();
            Err(DownloadError::Multiplexer("工作线程意外退出".to_string()))
        }
    }
}
