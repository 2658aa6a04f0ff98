//! chunkfetch: 并发分块、可断点续传的下载库
//!
//! 一个 [`Downloader`] 实例拥有一个工作线程，所有传输都在该线程上复用
//! 有限数量的连接句柄完成。调用方可以在任意线程上创建、移除、等待任务。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use crate::core::{
    ByteRange, Destination, DownloadError, DownloadResult, Downloader, DownloaderStats, Hints,
    TaskHandle, TaskInfo, TaskKind, TaskState, TaskStatus,
};
