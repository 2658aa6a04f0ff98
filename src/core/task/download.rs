use log::{debug, warn};

use super::retry::{RetryContext, RetryStrategy};
use super::subtask::{Outcome, Payload};
use crate::core::error::FetchError;
use crate::core::transport::{Request, RequestKind, Response, Transport};

/// 执行一次子任务请求，可重试的失败按退避策略在同一句柄上重发
pub async fn fetch_with_retry<T: Transport + ?Sized>(
    transport: &T,
    connection: &T::Connection,
    request: &Request,
    strategy: &RetryStrategy,
) -> Outcome {
    let mut retry_context = RetryContext::new(strategy.clone());
    loop {
        let result = match transport.fetch(connection, request).await {
            Ok(response) => check_response(request, response),
            Err(error) => Err(error),
        };
        match result {
            Ok(payload) => {
                if retry_context.retry_count > 0 {
                    debug!(
                        "{} 第 {} 次重试后成功，累计等待 {} 毫秒",
                        request.url,
                        retry_context.retry_count,
                        retry_context.total_retry_time.as_millis()
                    );
                }
                return Ok(payload);
            }
            Err(error) if retry_context.should_retry(&error) => {
                let delay = retry_context.increment_retry();
                warn!(
                    "请求 {} {:?} 失败: {}，{} 毫秒后重试 (第 {} 次)",
                    request.url,
                    request.kind,
                    error,
                    delay.as_millis(),
                    retry_context.retry_count
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                if retry_context.retry_count > 0 {
                    warn!(
                        "请求 {} {:?} 重试 {} 次后放弃，累计等待 {} 毫秒: {}",
                        request.url,
                        request.kind,
                        retry_context.retry_count,
                        retry_context.total_retry_time.as_millis(),
                        error
                    );
                }
                return Err(error);
            }
        }
    }
}

/// 校验响应并转换为子任务结果
///
/// 对非零起点的范围请求返回 200 视为服务器不支持范围请求；
/// 起点为 0 且整个响应体恰好等于请求长度时，数据相同，按成功处理。
pub fn check_response(request: &Request, response: Response) -> Outcome {
    let status = response.status;
    if status >= 400 {
        return Err(FetchError::HttpStatus(status));
    }

    match request.kind {
        RequestKind::Size => {
            let total = response
                .content_length
                .or_else(|| response.content_range.and_then(|cr| cr.total))
                .ok_or(FetchError::MissingContentLength)?;
            Ok(Payload::Size { status, total })
        }
        RequestKind::Range(range) => {
            let actual = response.body.len() as u64;
            match status {
                206 => {
                    if let Some(cr) = response.content_range {
                        if cr.first != range.offset || Some(cr.last) != range.last() {
                            return Err(FetchError::RangeMismatch {
                                expected: range.to_string(),
                                actual: format!("[{}, {}]", cr.first, cr.last),
                            });
                        }
                    }
                    if actual != range.size {
                        return Err(FetchError::BodyLength {
                            expected: range.size,
                            actual,
                        });
                    }
                    Ok(Payload::Data {
                        status,
                        body: response.body,
                    })
                }
                200..=299 => {
                    if range.offset == 0 && actual == range.size {
                        Ok(Payload::Data {
                            status,
                            body: response.body,
                        })
                    } else {
                        Err(FetchError::RangeNotHonored { status })
                    }
                }
                _ => Err(FetchError::HttpStatus(status)),
            }
        }
    }
}
