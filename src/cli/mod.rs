//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析和验证
//! - 配置文件路径管理
//! - URL 列表处理（命令行参数和文件）
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 基本下载：`chunkfetch <url>`
//! - 批量下载：`chunkfetch -f urls.txt`
//! - 断点续传：`chunkfetch --resume <url>`
//! - 查询大小：`chunkfetch --size-only <url>`
//! - 编辑配置：`chunkfetch -e`
//! - 指定配置：`chunkfetch -c config.conf <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/chunkfetch/chunkfetch.conf`
//! - macOS: `~/Library/Application Support/chunkfetch/chunkfetch.conf`
//! - Linux: `~/.config/chunkfetch/chunkfetch.conf`

use clap::Parser;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::utils::validator::validate_url;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/chunkfetch/chunkfetch.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/chunkfetch/chunkfetch.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/chunkfetch/chunkfetch.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 $EDITOR，其次 xdg-open，最后 nano
        let editor = env::var("EDITOR").ok();
        let opened = match editor {
            Some(editor) => std::process::Command::new(editor).arg(config_path).status().is_ok(),
            None => false,
        };
        if !opened && std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\n构建时间: ",
        env!("VERGEN_BUILD_TIMESTAMP"),
        "\n提交: ",
        env!("VERGEN_GIT_SHA")
    )
}

/// chunkfetch 命令行参数
///
/// 示例用法：
///   chunkfetch https://example.com/file.zip
///   chunkfetch -e  # 编辑配置文件
///   chunkfetch -c /path/to/config.conf https://example.com/file.zip
///   chunkfetch --resume -n file.zip https://example.com/file.zip
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkfetch",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    long_version = long_version(),
    about = "一个用 Rust 编写的并发分块、可断点续传的下载器",
    long_about = "所有任务共享有限数量的连接，按分块并发下载并按顺序写入，支持断点续传与大小查询。\n\n示例：\n  chunkfetch https://example.com/file.zip\n  chunkfetch -e\n  chunkfetch -j 16 -s 1048576 https://example.com/file.zip\n  chunkfetch --resume https://example.com/file.zip\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 指定下载目录
    #[arg(long, short = 'd', help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 指定下载文件名
    #[arg(long, short = 'n', help = "指定下载文件名，覆盖URL自动推断，只能用于单个URL。")]
    pub file_name: Option<String>,

    #[arg(long, short = 'j', help = "所有任务共享的连接数上限，覆盖配置文件中的设置。")]
    pub handles: Option<usize>,

    #[arg(long, short = 's', help = "分块大小（字节），覆盖配置文件中的设置。")]
    pub chunk_size: Option<u64>,

    #[arg(long, short = 't', help = "单次请求超时时间（秒），覆盖配置文件中的设置。")]
    pub timeout: Option<u64>,

    #[arg(long, help = "从已存在的文件末尾继续下载。")]
    pub resume: bool,

    #[arg(long, conflicts_with = "resume", help = "只查询资源大小，不下载。")]
    pub size_only: bool,

    #[arg(long, help = "结束后以 JSON 输出每个任务的最终状态。")]
    pub json: bool,
}

impl Args {
    /// 解析命令行参数并加载、合并、校验配置
    pub fn parse_args() -> DownloadResult<(Self, Config)> {
        let args = Args::parse();

        // --edit 逻辑
        if args.edit_config {
            if !Path::new(&args.config).exists() {
                Config::default().save_with_tutorial(&args.config)?;
            }
            open_config_in_editor(&args.config);
            std::process::exit(0); // 退出程序
        }

        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 加载或创建配置文件，合并命令行参数
    pub fn load_config(&self) -> DownloadResult<Config> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        config
            .validate()
            .map_err(|e| DownloadError::Config(format!("配置无效: {}", e)))?;
        Ok(config)
    }

    /// 汇总命令行与文件中的URL
    pub fn get_urls(&self) -> DownloadResult<Vec<String>> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)?;
            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        if urls.is_empty() {
            return Err(DownloadError::InvalidUrl(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }
        for url in &urls {
            validate_url(url)?;
        }
        if self.file_name.is_some() && urls.len() > 1 {
            return Err(DownloadError::Config("-n 只能用于单个URL".to_string()));
        }
        Ok(urls)
    }

    /// 计算URL对应的保存路径
    pub fn destination_for(&self, config: &Config, url: &str) -> PathBuf {
        let name = self
            .file_name
            .clone()
            .unwrap_or_else(|| extract_filename_from_url(url));
        Path::new(&config.download_dir).join(name)
    }
}

/// 从URL路径的最后一段推断文件名
pub fn extract_filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download.bin".to_string())
}

// 测试模块
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["chunkfetch", "https://example.com/file.zip"]).unwrap();
        assert_eq!(args.urls, vec!["https://example.com/file.zip"]);
        assert!(!args.resume);
        assert!(args.handles.is_none());

        let args = Args::try_parse_from([
            "chunkfetch",
            "--resume",
            "-j",
            "4",
            "-t",
            "10",
            "--json",
            "https://example.com/file.zip",
        ])
        .unwrap();
        assert!(args.resume);
        assert!(args.json);
        assert_eq!(args.handles, Some(4));
        assert_eq!(args.timeout, Some(10));

        assert!(Args::try_parse_from(["chunkfetch", "--resume", "--size-only", "http://a/b"]).is_err());
    }

    #[test]
    fn test_config_loading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunkfetch.conf");
        let path = path.to_str().unwrap();

        let args = Args::try_parse_from(["chunkfetch", "-c", path, "-s", "4096", "https://example.com/f"]).unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert!(Path::new(path).exists());

        let args = Args::try_parse_from(["chunkfetch", "-c", path, "-j", "0", "https://example.com/f"]).unwrap();
        assert!(matches!(args.load_config(), Err(DownloadError::Config(_))));
    }

    #[test]
    fn test_url_file_parsing() {
        let dir = tempdir().unwrap();
        let url_file = dir.path().join("urls.txt");
        let content = "# 这是一个注释\nhttps://example.com/file1.zip\n\n  https://example.com/file2.zip  \n";
        fs::write(&url_file, content).unwrap();

        let args = Args::try_parse_from(["chunkfetch", "-f", url_file.to_str().unwrap()]).unwrap();
        let urls = args.get_urls().unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://example.com/file1.zip");
        assert_eq!(urls[1], "https://example.com/file2.zip");

        fs::write(&url_file, "not-a-url\n").unwrap();
        assert!(matches!(args.get_urls(), Err(DownloadError::InvalidUrl(_))));
    }

    #[test]
    fn test_missing_urls() {
        let args = Args::try_parse_from(["chunkfetch"]).unwrap();
        assert!(args.get_urls().is_err());

        let args = Args::try_parse_from(["chunkfetch", "-n", "x.bin", "http://a.com/1", "http://a.com/2"]).unwrap();
        assert!(matches!(args.get_urls(), Err(DownloadError::Config(_))));
    }

    #[test]
    fn test_destination_for() {
        let mut config = Config::default();
        config.download_dir = "/data".to_string();
        let args = Args::try_parse_from(["chunkfetch", "http://example.com/pub/file.iso?x=1"]).unwrap();
        assert_eq!(
            args.destination_for(&config, "http://example.com/pub/file.iso?x=1"),
            PathBuf::from("/data/file.iso")
        );
        assert_eq!(extract_filename_from_url("http://example.com/"), "download.bin");
    }
}
