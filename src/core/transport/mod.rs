//! 传输层接口
//!
//! 工作线程只通过 `Transport` 发起请求，连接句柄由 `HandlePool` 复用。
//! 实现运行在工作线程的单线程运行时里，不要求 `Send`。

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::core::error::FetchError;
use crate::core::task::state::ByteRange;

pub mod http;
#[cfg(test)]
pub(crate) mod stub;

pub use http::HttpTransport;

/// 请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// 只取大小
    Size,
    Range(ByteRange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub kind: RequestKind,
    pub timeout: Duration,
}

impl Request {
    pub fn size(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            kind: RequestKind::Size,
            timeout,
        }
    }

    pub fn range(url: impl Into<String>, range: ByteRange, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            kind: RequestKind::Range(range),
            timeout,
        }
    }
}

/// `Content-Range: bytes first-last/total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub body: Bytes,
}

#[async_trait(?Send)]
pub trait Transport: 'static {
    /// 可复用的连接句柄
    type Connection: 'static;

    fn open(&self) -> Self::Connection;

    /// 归还到空闲列表前调用
    fn reset(&self, _connection: &mut Self::Connection) {}

    async fn fetch(
        &self,
        connection: &Self::Connection,
        request: &Request,
    ) -> Result<Response, FetchError>;
}
