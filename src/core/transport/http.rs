use async_trait::async_trait;
use awc::error::{ConnectError, PayloadError, SendRequestError};
use awc::http::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use bytes::Bytes;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use super::{ContentRange, Request, RequestKind, Response, Transport};
use crate::core::error::{FetchError, TransportErrorKind};

pub const DEFAULT_USER_AGENT: &str = concat!("chunkfetch/", env!("CARGO_PKG_VERSION"));

/// 基于 awc 的 HTTP 传输
///
/// 每个连接句柄是一个独立的 `awc::Client`，自带 keep-alive 连接池。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    user_agent: String,
    connect_timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl HttpTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn read_body<S>(
        response: &mut awc::ClientResponse<S>,
        limit: u64,
        timeout: Duration,
    ) -> Result<Bytes, FetchError>
    where
        S: futures::Stream<Item = Result<Bytes, PayloadError>> + Unpin,
    {
        let body = response.body().limit(limit as usize);
        match tokio::time::timeout(timeout, body).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(PayloadError::Overflow)) => Err(FetchError::BodyLength {
                expected: limit,
                actual: limit + 1,
            }),
            Ok(Err(e)) => Err(map_payload_error(e)),
            Err(_) => Err(FetchError::transport(
                TransportErrorKind::Timeout,
                "读取响应体超时",
            )),
        }
    }
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    type Connection = awc::Client;

    fn open(&self) -> awc::Client {
        let connector = awc::Connector::new().timeout(self.connect_timeout);
        awc::Client::builder()
            .connector(connector)
            .add_default_header((awc::http::header::USER_AGENT, self.user_agent.clone()))
            .finish()
    }

    async fn fetch(&self, client: &awc::Client, request: &Request) -> Result<Response, FetchError> {
        let builder = match request.kind {
            RequestKind::Size => client.head(request.url.as_str()),
            RequestKind::Range(range) => client
                .get(request.url.as_str())
                .insert_header((RANGE, range.header_value())),
        };

        let mut response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status().as_u16();
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);

        let mut result = Response {
            status,
            content_length,
            content_range,
            body: Bytes::new(),
        };

        if let RequestKind::Range(range) = request.kind {
            // 失败状态或服务器忽略了非零起点的范围，不必读取响应体
            let ignored_range = status == 200 && range.offset != 0;
            if status < 400 && !ignored_range {
                result.body = match Self::read_body(&mut response, range.size, request.timeout).await {
                    Err(FetchError::BodyLength { .. }) if status == 200 => {
                        return Err(FetchError::RangeNotHonored { status })
                    }
                    other => other?,
                };
            }
        }

        Ok(result)
    }
}

fn content_range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*bytes\s+(\d+)-(\d+)/(\d+|\*)\s*$").expect("Content-Range 正则无效")
    })
}

/// 解析 `bytes 0-99/1000` 或 `bytes 0-99/*`
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let caps = content_range_regex().captures(value)?;
    let first = caps.get(1)?.as_str().parse().ok()?;
    let last = caps.get(2)?.as_str().parse().ok()?;
    let total = match caps.get(3)?.as_str() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };
    if last < first {
        return None;
    }
    Some(ContentRange { first, last, total })
}

fn map_send_error(error: SendRequestError) -> FetchError {
    let message = error.to_string();
    let kind = match &error {
        SendRequestError::Url(_) => TransportErrorKind::InvalidUrl,
        SendRequestError::Connect(connect) => match connect {
            ConnectError::Timeout => TransportErrorKind::Timeout,
            ConnectError::Resolver(_) | ConnectError::NoRecords | ConnectError::Unresolved => {
                TransportErrorKind::Resolve
            }
            ConnectError::Io(_) | ConnectError::Disconnected => TransportErrorKind::Io,
            _ => TransportErrorKind::Connect,
        },
        SendRequestError::Timeout => TransportErrorKind::Timeout,
        SendRequestError::Send(_) => TransportErrorKind::Io,
        SendRequestError::Response(_) => TransportErrorKind::Payload,
        _ => TransportErrorKind::Other,
    };
    FetchError::transport(kind, message)
}

fn map_payload_error(error: PayloadError) -> FetchError {
    let kind = match &error {
        PayloadError::Io(_) => TransportErrorKind::Io,
        _ => TransportErrorKind::Payload,
    };
    FetchError::transport(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 0-99/1000"),
            Some(ContentRange {
                first: 0,
                last: 99,
                total: Some(1000)
            })
        );
        assert_eq!(
            parse_content_range("bytes 100-199/*"),
            Some(ContentRange {
                first: 100,
                last: 199,
                total: None
            })
        );
        assert_eq!(parse_content_range("bytes 9-3/10"), None);
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range(""), None);
    }

    #[test]
    fn test_send_error_mapping() {
        let timeout = map_send_error(SendRequestError::Timeout);
        assert!(matches!(
            timeout,
            FetchError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        ));
        assert!(timeout.is_retryable());

        let connect = map_send_error(SendRequestError::Connect(ConnectError::Timeout));
        assert!(connect.is_retryable());

        let resolve = map_send_error(SendRequestError::Connect(ConnectError::Unresolved));
        assert!(matches!(
            resolve,
            FetchError::Transport {
                kind: TransportErrorKind::Resolve,
                ..
            }
        ));

        let dropped = map_send_error(SendRequestError::Connect(ConnectError::Disconnected));
        assert!(matches!(
            dropped,
            FetchError::Transport {
                kind: TransportErrorKind::Io,
                ..
            }
        ));
        let tls = map_send_error(SendRequestError::Connect(ConnectError::SslIsNotSupported));
        assert!(matches!(
            tls,
            FetchError::Transport {
                kind: TransportErrorKind::Connect,
                ..
            }
        ));
    }

    #[test]
    fn test_payload_error_mapping() {
        let err = map_payload_error(PayloadError::Incomplete(None));
        assert!(matches!(
            err,
            FetchError::Transport {
                kind: TransportErrorKind::Payload,
                ..
            }
        ));
    }

    #[test]
    fn test_default_user_agent() {
        assert!(DEFAULT_USER_AGENT.starts_with("chunkfetch/"));
        let transport = HttpTransport::default().with_connect_timeout(Duration::from_secs(3));
        assert_eq!(transport.connect_timeout, Duration::from_secs(3));
    }
}
