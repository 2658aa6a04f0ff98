use chrono::Local; // 用于获取本地时间
use log::LevelFilter; // 用于设置日志级别
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::error::DownloadResult;

/// 按大小轮转的日志文件，超过上限后改名为 `.backup` 并重新开始
pub struct RotatingFile {
    writer: BufWriter<File>,
    file_path: PathBuf,
    max_size: u64, // 最大文件大小 (bytes)
    current_size: u64,
}

impl RotatingFile {
    pub fn new(file_path: impl AsRef<Path>, max_size: u64) -> io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        // 确保日志目录存在
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
        let current_size = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            file_path,
            max_size,
            current_size,
        })
    }

    fn backup_path(&self) -> PathBuf {
        let mut backup = self.file_path.clone().into_os_string();
        backup.push(".backup");
        PathBuf::from(backup)
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> io::Result<()> {
        if self.max_size == 0 || self.current_size <= self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup_path = self.backup_path();
        if backup_path.exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(&self.file_path, &backup_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        let written = self.writer.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 安装全局日志，输出到按大小轮转的文件
pub fn init_logger(file_path: impl AsRef<Path>, level: LevelFilter, max_size: u64) -> DownloadResult<()> {
    let target = RotatingFile::new(file_path, max_size)?;
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(target)))
        .try_init()?;
    Ok(())
}

/// 解析配置中的日志级别，无法识别时使用 info
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}
