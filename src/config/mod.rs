use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::downloader::Hints;
use crate::core::error::DownloadError;
use crate::core::task::retry::RetryStrategy;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 同时在用的连接句柄上限（所有任务共享）
    pub max_concurrent_handles: usize,
    /// 分块大小（字节）
    pub chunk_size: u64,
    /// 单次请求超时时间（秒）
    pub timeout: u64,
    /// 每个分块的重试次数，0 表示不重试
    pub retry_count: usize,
    /// 第一次重试前的等待（毫秒）
    pub retry_delay_ms: u64,
    /// 重试等待的上限（毫秒）
    pub retry_max_delay_ms: u64,
    /// User-Agent
    pub user_agent: String,
    /// 默认下载目录
    pub download_dir: String,
    /// 日志文件路径
    pub log_file: String,
    /// 日志级别：error / warn / info / debug / trace
    pub log_level: String,
    /// 日志文件大小上限（字节），超过后轮转
    pub log_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        let hints = Hints::default();
        Self {
            max_concurrent_handles: hints.max_concurrent_handles,
            chunk_size: hints.chunk_size,
            timeout: hints.timeout_secs,
            retry_count: hints.retry.max_retries,
            retry_delay_ms: hints.retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: hints.retry.max_delay.as_millis() as u64,
            user_agent: crate::core::transport::http::DEFAULT_USER_AGENT.to_string(),
            download_dir: "./downloads".to_string(),
            log_file: "./logs/chunkfetch.log".to_string(),
            log_level: "info".to_string(),
            log_max_size: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在时写入带教程的默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            // 尝试解析TOML
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("配置文件 {} 格式错误: {}，将使用默认配置", path, e);
                    eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    /// 生成配置文件教程内容，全部为注释
    fn generate_tutorial_content() -> &'static str {
        r#"# chunkfetch 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件，用于配置 chunkfetch 下载器的行为。
# 文件末尾是当前生效的配置项，修改后保存即可。
#
# 配置文件位置：
# - Windows: %APPDATA%/chunkfetch/chunkfetch.conf
# - macOS: ~/Library/Application Support/chunkfetch/chunkfetch.conf
# - Linux: ~/.config/chunkfetch/chunkfetch.conf
#
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   chunkfetch https://example.com/file.zip                      # 使用默认配置
#   chunkfetch -j 16 https://example.com/file.zip                # 最多同时使用16个连接
#   chunkfetch -s 1048576 https://example.com/file.zip           # 1MB 分块
#   chunkfetch --resume https://example.com/file.zip             # 从已有文件继续下载
#   chunkfetch --size-only https://example.com/file.zip          # 只查询大小
#   chunkfetch -d /path/to/downloads -f urls.txt                 # 批量下载到指定目录

# ==================== 配置项说明 ====================
#
# max_concurrent_handles  所有任务共享的连接数上限，建议 4-32
# chunk_size              每个分块请求的字节数，太小请求过多，太大单块重试代价高
# timeout                 单次请求超时时间（秒）
# retry_count             每个分块失败后的重试次数，0 表示不重试
# retry_delay_ms          第一次重试前的等待（毫秒），之后按指数退避
# retry_max_delay_ms      重试等待的上限（毫秒）
# user_agent              某些服务器可能需要特定的 User-Agent
# download_dir            默认下载目录，支持相对路径和绝对路径
# log_file                日志文件路径
# log_level               error / warn / info / debug / trace
# log_max_size            日志文件超过此大小（字节）后轮转为 .backup

# ==================== 故障排除 ====================
#
# 问题：下载速度很慢
# 解决：增加 max_concurrent_handles 或 chunk_size
#
# 问题：经常下载失败
# 解决：增加 retry_count 或 timeout 值
#
# 问题：续传时报告服务器不支持范围请求
# 解决：该服务器只能整体下载，去掉 --resume 重新下载
#
# 问题：内存占用过高
# 解决：减少 chunk_size 或 max_concurrent_handles
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_concurrent_handles == 0 {
            return Err(DownloadError::Config("并发句柄数必须大于0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::Config("分块大小必须大于0".to_string()));
        }
        if self.timeout == 0 {
            return Err(DownloadError::Config("超时时间必须大于0".to_string()));
        }
        if self.download_dir.is_empty() {
            return Err(DownloadError::Config("下载目录不能为空".to_string()));
        }
        if self.retry_max_delay_ms < self.retry_delay_ms {
            return Err(DownloadError::Config("最大重试延迟不能小于重试延迟".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        // 命令行参数覆盖配置文件
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(handles) = args.handles {
            self.max_concurrent_handles = handles;
        }
        if let Some(chunk_size) = args.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(timeout) = args.timeout {
            self.timeout = timeout;
        }
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy {
            max_retries: self.retry_count,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryStrategy::default()
        }
    }

    /// 转换为下载器参数
    pub fn hints(&self) -> Hints {
        Hints {
            max_concurrent_handles: self.max_concurrent_handles,
            chunk_size: self.chunk_size,
            timeout_secs: self.timeout,
            retry: self.retry_strategy(),
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 连接上限: {}\n\
            - 分块大小: {} 字节\n\
            - 超时时间: {} 秒\n\
            - 重试次数: {}\n\
            - 日志: {} ({})",
            self.download_dir,
            self.max_concurrent_handles,
            self.chunk_size,
            self.timeout,
            if self.retry_count == 0 { "不重试".to_string() } else { self.retry_count.to_string() },
            self.log_file,
            self.log_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_handles, 8);
        assert_eq!(config.chunk_size, 512 * 1024);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.hints(), Hints::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.max_concurrent_handles = 0;
        assert!(matches!(config.validate(), Err(DownloadError::Config(_))));

        config = Config::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_max_delay_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("chunkfetch.conf");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.chunk_size = 4096;
        config.user_agent = "test-agent".to_string();
        config.save_with_tutorial(path).expect("保存带教程的配置失败");

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("chunkfetch 配置文件"));
        assert!(content.contains("故障排除"));

        let loaded = Config::load(path).expect("加载配置失败");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_creates_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.conf");
        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_config_partial_and_broken_files() {
        let dir = tempdir().unwrap();
        let partial = dir.path().join("partial.conf");
        fs::write(&partial, "chunk_size = 1024\n").unwrap();
        let loaded = Config::load(partial.to_str().unwrap()).unwrap();
        assert_eq!(loaded.chunk_size, 1024);
        assert_eq!(loaded.max_concurrent_handles, 8);

        let broken = dir.path().join("broken.conf");
        fs::write(&broken, "chunk_size = \"many\"\n").unwrap();
        assert_eq!(Config::load(broken.to_str().unwrap()).unwrap(), Config::default());
    }

    #[test]
    fn test_merge_from_args() {
        let args = crate::cli::Args::parse_from([
            "chunkfetch",
            "-j",
            "3",
            "-s",
            "2048",
            "-d",
            "/tmp/out",
            "http://example.com/a",
        ]);
        let mut config = Config::default();
        config.merge_from_args(&args);
        assert_eq!(config.max_concurrent_handles, 3);
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.download_dir, "/tmp/out");
        assert_eq!(config.timeout, 30);
    }

    #[test]
    fn test_config_summary() {
        let summary = Config::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("连接上限: 8"));
    }
}
