use serde::Serialize;
use std::fmt;
use std::io;
use std::panic::Location;
use thiserror::Error;

/// 下载器接口层面的错误（参数、配置、工作线程启动等）
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO错误: {0}")]
    IoError(#[from] io::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("缺少下载目标: {0}")]
    MissingDestination(String),

    #[error("无效的字节范围: {0}")]
    InvalidRange(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("多路复用器错误: {0}")]
    Multiplexer(String),

    #[error("配置文件解析失败: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("日志初始化失败: {0}")]
    Logger(#[from] log::SetLoggerError),
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// 传输层错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportErrorKind {
    InvalidUrl,
    Resolve,
    Connect,
    Timeout,
    Io,
    Payload,
    Other,
}

impl TransportErrorKind {
    /// 数值错误码，写入任务状态
    pub fn code(self) -> i32 {
        match self {
            TransportErrorKind::InvalidUrl => 3,
            TransportErrorKind::Resolve => 6,
            TransportErrorKind::Connect => 7,
            TransportErrorKind::Timeout => 28,
            TransportErrorKind::Io => 56,
            TransportErrorKind::Payload => 18,
            TransportErrorKind::Other => 1,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::InvalidUrl => "URL格式错误",
            TransportErrorKind::Resolve => "域名解析失败",
            TransportErrorKind::Connect => "连接失败",
            TransportErrorKind::Timeout => "请求超时",
            TransportErrorKind::Io => "网络读写错误",
            TransportErrorKind::Payload => "响应体错误",
            TransportErrorKind::Other => "未知传输错误",
        };
        f.write_str(name)
    }
}

/// 单个子任务（一次范围请求）的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("传输错误({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("内容不存在或未授权: HTTP {0}")]
    HttpStatus(u16),

    #[error("服务器不支持范围请求: HTTP {status}")]
    RangeNotHonored { status: u16 },

    #[error("返回的范围不匹配: 预期 {expected}, 实际 {actual}")]
    RangeMismatch { expected: String, actual: String },

    #[error("响应长度不匹配: 预期 {expected} 字节, 实际 {actual} 字节")]
    BodyLength { expected: u64, actual: u64 },

    #[error("响应缺少 Content-Length")]
    MissingContentLength,

    #[error("子任务被取消")]
    Cancelled,
}

impl FetchError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        FetchError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// 网络抖动与服务端 5xx 可以重试，其余直接失败
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { kind, .. } => matches!(
                kind,
                TransportErrorKind::Resolve
                    | TransportErrorKind::Connect
                    | TransportErrorKind::Timeout
                    | TransportErrorKind::Io
                    | TransportErrorKind::Payload
            ),
            FetchError::HttpStatus(code) => (500..600).contains(code),
            _ => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus(code) => Some(*code),
            FetchError::RangeNotHonored { status } => Some(*status),
            _ => None,
        }
    }
}

/// 传输错误记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub code: i32,
}

/// 任务的错误记录
///
/// 每一类错误只保留第一次出现的值，`message` 与 `location` 也只写一次。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskError {
    pub error_happened: bool,
    pub http_code: Option<u16>,
    pub transport_error: Option<TransportFailure>,
    pub multiplexer_error: Option<String>,
    pub file_errno: Option<i32>,
    pub file_error: Option<String>,
    pub message: Option<String>,
    pub location: Option<String>,
}

impl TaskError {
    /// 成功响应的状态码，出错后不再覆盖
    pub fn record_http_success(&mut self, status: u16) {
        if !self.error_happened {
            self.http_code = Some(status);
        }
    }

    #[track_caller]
    pub fn record_fetch(&mut self, error: &FetchError) {
        let location = Location::caller();
        match error {
            FetchError::Transport { kind, .. } => {
                if self.transport_error.is_none() {
                    self.transport_error = Some(TransportFailure {
                        kind: *kind,
                        code: kind.code(),
                    });
                }
            }
            other => {
                if let Some(code) = other.http_status() {
                    if !self.error_happened {
                        self.http_code = Some(code);
                    }
                }
            }
        }
        self.latch(error.to_string(), location);
    }

    #[track_caller]
    pub fn record_io(&mut self, error: &io::Error) {
        let location = Location::caller();
        if self.file_error.is_none() {
            self.file_errno = error.raw_os_error();
            self.file_error = Some(error.to_string());
        }
        self.latch(format!("文件写入失败: {}", error), location);
    }

    #[track_caller]
    pub fn record_multiplexer(&mut self, message: impl Into<String>) {
        let location = Location::caller();
        let message = message.into();
        if self.multiplexer_error.is_none() {
            self.multiplexer_error = Some(message.clone());
        }
        self.latch(message, location);
    }

    /// 与具体类别无关的失败（如任务被移除）
    #[track_caller]
    pub fn record_other(&mut self, message: impl Into<String>) {
        let location = Location::caller();
        self.latch(message.into(), location);
    }

    fn latch(&mut self, message: String, location: &Location<'_>) {
        if self.message.is_none() {
            self.message = Some(message);
        }
        if self.location.is_none() {
            self.location = Some(format!("{}:{}", location.file(), location.line()));
        }
        self.error_happened = true;
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.error_happened {
            return f.write_str("无错误");
        }
        write!(f, "{}", self.message.as_deref().unwrap_or("未知错误"))?;
        if let Some(code) = self.http_code {
            write!(f, " (HTTP {})", code)?;
        }
        if let Some(location) = &self.location {
            write!(f, " @ {}", location)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::transport(TransportErrorKind::Timeout, "timeout").is_retryable());
        assert!(FetchError::transport(TransportErrorKind::Connect, "refused").is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());

        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(!FetchError::RangeNotHonored { status: 200 }.is_retryable());
        assert!(!FetchError::transport(TransportErrorKind::InvalidUrl, "bad").is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_first_error_is_kept() {
        let mut error = TaskError::default();
        error.record_http_success(206);
        assert_eq!(error.http_code, Some(206));
        assert!(!error.error_happened);

        error.record_fetch(&FetchError::HttpStatus(404));
        error.record_fetch(&FetchError::HttpStatus(500));
        error.record_http_success(206);

        assert!(error.error_happened);
        assert_eq!(error.http_code, Some(404));
        assert!(error.message.as_deref().unwrap_or_default().contains("404"));
        assert!(error.location.as_deref().unwrap_or_default().contains("error.rs"));
    }

    #[test]
    fn test_categories_recorded_once() {
        let mut error = TaskError::default();
        error.record_fetch(&FetchError::transport(TransportErrorKind::Timeout, "slow"));
        error.record_fetch(&FetchError::transport(TransportErrorKind::Connect, "refused"));
        error.record_io(&io::Error::from_raw_os_error(28));

        let transport = error.transport_error.clone().expect("应记录传输错误");
        assert_eq!(transport.kind, TransportErrorKind::Timeout);
        assert_eq!(transport.code, 28);
        assert_eq!(error.file_errno, Some(28));
        assert!(error.message.as_deref().unwrap_or_default().contains("slow"));
    }

    #[test]
    fn test_download_error_display() {
        let err = DownloadError::InvalidRange("[10, 5)".into());
        assert!(err.to_string().contains("[10, 5)"));
        let io: DownloadError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(io, DownloadError::IoError(_)));
    }
}
