//! 输出端抽象：任务按偏移顺序把数据交给 `Writer`
//!
//! - `FileWriter`: 带写缓冲的文件输出，支持截断新建与追加续传两种打开方式
//! - `BufferWriter`: 固定容量的内存输出，空间不足时返回短写

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// 输出端接口
///
/// `save` 允许返回小于输入长度的写入量（短写），由任务把它视为失败。
pub trait Writer: Send {
    fn save(&mut self, data: &[u8]) -> io::Result<usize>;
    /// 当前写入位置，即已有数据长度
    fn seek_pos(&mut self) -> io::Result<u64>;
    fn truncate(&mut self) -> io::Result<()>;
    /// 可重复调用
    fn close(&mut self) -> io::Result<()>;
    fn is_closed(&self) -> bool;
}

/// 调用方持有的共享输出端，任务只关闭不销毁
pub type SharedWriter = Arc<Mutex<dyn Writer>>;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "输出端已关闭")
}

const DEFAULT_FILE_BUFFER: usize = 256 * 1024;

/// 文件输出端
pub struct FileWriter {
    path: PathBuf,
    file: Option<File>,
    buffer: Vec<u8>,
    buffer_size: usize,
    position: u64,
    flush_count: u64,
}

impl FileWriter {
    /// 新建或截断文件，用于完整下载
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(path, file, 0))
    }

    /// 以追加方式打开，写入位置为已有长度，用于断点续传
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let position = file.metadata()?.len();
        Ok(Self::from_file(path, file, position))
    }

    fn from_file(path: &Path, file: File, position: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            file: Some(file),
            buffer: Vec::with_capacity(DEFAULT_FILE_BUFFER),
            buffer_size: DEFAULT_FILE_BUFFER,
            position,
            flush_count: 0,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// 将缓冲区内容刷入文件
    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        file.write_all(&self.buffer)?;
        self.buffer.clear();
        self.flush_count += 1;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

impl Writer for FileWriter {
    fn save(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.file.is_none() {
            return Err(closed_error());
        }
        let mut written = 0;
        while written < data.len() {
            let space_left = self.buffer_size - self.buffer.len();
            let to_copy = space_left.min(data.len() - written);
            self.buffer.extend_from_slice(&data[written..written + to_copy]);
            written += to_copy;
            if self.buffer.len() == self.buffer_size {
                self.flush_buffer()?;
            }
        }
        self.position += written as u64;
        Ok(written)
    }

    fn seek_pos(&mut self) -> io::Result<u64> {
        if self.file.is_none() {
            return Err(closed_error());
        }
        Ok(self.position)
    }

    fn truncate(&mut self) -> io::Result<()> {
        self.buffer.clear();
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.flush_buffer()?;
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("关闭文件 {} 失败: {}", self.path.display(), e);
        }
    }
}

/// 固定容量的内存输出端
#[derive(Debug, Default)]
pub struct BufferWriter {
    data: Vec<u8>,
    capacity: usize,
    closed: bool,
}

impl BufferWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    /// 已有部分数据的缓冲区，用于续传
    pub fn with_prefix(capacity: usize, prefix: &[u8]) -> Self {
        let mut writer = Self::new(capacity);
        let keep = prefix.len().min(capacity);
        writer.data.extend_from_slice(&prefix[..keep]);
        writer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Writer for BufferWriter {
    fn save(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        let space_left = self.capacity - self.data.len();
        let to_copy = space_left.min(data.len());
        self.data.extend_from_slice(&data[..to_copy]);
        Ok(to_copy)
    }

    fn seek_pos(&mut self) -> io::Result<u64> {
        if self.closed {
            return Err(closed_error());
        }
        Ok(self.data.len() as u64)
    }

    fn truncate(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(closed_error());
        }
        self.data.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_buffer_writer_short_write() {
        let mut writer = BufferWriter::new(8);
        assert_eq!(writer.save(b"hello").unwrap(), 5);
        assert_eq!(writer.save(b"world").unwrap(), 3);
        assert_eq!(writer.as_bytes(), b"hellowor");
        assert_eq!(writer.save(b"!").unwrap(), 0);
        assert_eq!(writer.seek_pos().unwrap(), 8);
    }

    #[test]
    fn test_buffer_writer_close_is_idempotent() {
        let mut writer = BufferWriter::with_prefix(16, b"abc");
        assert_eq!(writer.seek_pos().unwrap(), 3);
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());
        assert!(writer.save(b"d").is_err());
        assert_eq!(writer.as_bytes(), b"abc");
    }

    #[test]
    fn test_file_writer_create_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"old content").unwrap();

        let mut writer = FileWriter::create(&path).unwrap().with_buffer_size(4);
        assert_eq!(writer.seek_pos().unwrap(), 0);
        assert_eq!(writer.save(b"0123456789").unwrap(), 10);
        assert!(writer.flush_count() >= 2);
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());

        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
    }

    #[test]
    fn test_file_writer_append_resumes_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("part.bin");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"half").unwrap();

        let mut writer = FileWriter::append(&path).unwrap();
        assert_eq!(writer.seek_pos().unwrap(), 4);
        writer.save(b"-rest").unwrap();
        assert_eq!(writer.seek_pos().unwrap(), 9);
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"half-rest");
    }

    #[test]
    fn test_file_writer_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        std::fs::write(&path, b"stale").unwrap();

        let mut writer = FileWriter::append(&path).unwrap();
        writer.truncate().unwrap();
        assert_eq!(writer.seek_pos().unwrap(), 0);
        writer.save(b"fresh").unwrap();
        drop(writer);

        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
    }
}
