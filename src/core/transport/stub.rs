//! 测试用的内存传输：随机延迟、可注入失败、记录所有请求

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ContentRange, Request, RequestKind, Response, Transport};
use crate::core::error::FetchError;

#[derive(Debug)]
struct StubState {
    content: Bytes,
    min_delay_ms: u64,
    max_delay_ms: u64,
    honor_ranges: bool,
    fail_status: Option<u16>,
    /// 按顺序消费的一次性故障
    scripted_failures: Mutex<VecDeque<FetchError>>,
    requests: Mutex<Vec<Request>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) struct StubTransport {
    state: Arc<StubState>,
}

impl StubTransport {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            state: Arc::new(StubState {
                content: content.into(),
                min_delay_ms: 0,
                max_delay_ms: 0,
                honor_ranges: true,
                fail_status: None,
                scripted_failures: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut StubState)) -> Self {
        let state = Arc::get_mut(&mut self.state).expect("配置必须在克隆之前完成");
        f(state);
        self
    }

    pub fn with_delay(self, min_ms: u64, max_ms: u64) -> Self {
        self.configure(|s| {
            s.min_delay_ms = min_ms;
            s.max_delay_ms = max_ms.max(min_ms);
        })
    }

    pub fn ignore_ranges(self) -> Self {
        self.configure(|s| s.honor_ranges = false)
    }

    pub fn fail_with(self, status: u16) -> Self {
        self.configure(|s| s.fail_status = Some(status))
    }

    pub fn fail_next(&self, error: FetchError) {
        self.state.scripted_failures.lock().unwrap().push_back(error);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn range_requests(&self) -> Vec<crate::core::task::state::ByteRange> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r.kind {
                RequestKind::Range(range) => Some(range),
                RequestKind::Size => None,
            })
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn opened_connections(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait(?Send)]
impl Transport for StubTransport {
    type Connection = usize;

    fn open(&self) -> usize {
        self.state.opened.fetch_add(1, Ordering::SeqCst)
    }

    async fn fetch(&self, _connection: &usize, request: &Request) -> Result<Response, FetchError> {
        let state = &self.state;
        state.requests.lock().unwrap().push(request.clone());

        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&state.active);

        let delay = if state.max_delay_ms > 0 {
            rand::thread_rng().gen_range(state.min_delay_ms..=state.max_delay_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if let Some(error) = state.scripted_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if let Some(status) = state.fail_status {
            return Ok(Response {
                status,
                ..Response::default()
            });
        }

        let total = state.content.len() as u64;
        let response = match request.kind {
            RequestKind::Size => Response {
                status: 200,
                content_length: Some(total),
                ..Response::default()
            },
            RequestKind::Range(range) if state.honor_ranges => {
                let start = range.offset.min(total) as usize;
                let end = range.end().min(total) as usize;
                Response {
                    status: 206,
                    content_length: Some((end - start) as u64),
                    content_range: range.last().map(|last| ContentRange {
                        first: range.offset,
                        last: last.min(total.saturating_sub(1)),
                        total: Some(total),
                    }),
                    body: state.content.slice(start..end),
                }
            }
            RequestKind::Range(_) => Response {
                status: 200,
                content_length: Some(total),
                content_range: None,
                body: state.content.clone(),
            },
        };
        Ok(response)
    }
}
