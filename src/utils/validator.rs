use url::Url;

use crate::core::error::{DownloadError, DownloadResult};

/// 只接受 http 与 https
pub fn is_valid_url(url: &str) -> bool {
    validate_url(url).is_ok()
}

pub fn validate_url(url: &str) -> DownloadResult<()> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err(DownloadError::InvalidUrl(format!("{}: 缺少主机名", url))),
        other => Err(DownloadError::InvalidUrl(format!(
            "{}: 不支持的协议 {}",
            url, other
        ))),
    }
}

pub fn validate_urls(urls: &[String]) -> DownloadResult<()> {
    if urls.is_empty() {
        return Err(DownloadError::InvalidUrl("URL列表不能为空".to_string()));
    }
    urls.iter().try_for_each(|url| validate_url(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://example.com/a.bin?x=1"));
        assert!(!is_valid_url("invalid-url"));
        assert!(!is_valid_url("ftp://example.com/a.bin"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn test_urls_validation() {
        let valid_urls = vec![
            "https://example.com".to_string(),
            "http://example.com".to_string(),
        ];
        assert!(validate_urls(&valid_urls).is_ok());

        let invalid_urls = vec![
            "invalid-url".to_string(),
            "https://example.com".to_string(),
        ];
        assert!(matches!(
            validate_urls(&invalid_urls),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert!(validate_urls(&[]).is_err());
    }
}
