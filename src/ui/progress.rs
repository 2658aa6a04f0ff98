use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Instant;

use crate::core::task::state::TaskStatus;

const BAR_TEMPLATE: &str = "{prefix:>20} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:>20} {spinner} {bytes} {msg}";

struct TaskBar {
    bar: ProgressBar,
    last_bytes: u64,
    last_tick: Instant,
    speed: u64,
}

// 结构体：ProgressManager
// 用于管理所有任务的进度条
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Vec<TaskBar>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            bars: Vec::new(),
        }
    }

    /// 不绘制任何内容，用于 JSON 输出和测试
    pub fn hidden() -> Self {
        ProgressManager {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            bars: Vec::new(),
        }
    }

    /// 添加进度条，返回索引
    pub fn add_progress_bar(&mut self, label: &str) -> usize {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style(SPINNER_TEMPLATE));
        bar.set_prefix(shorten(label, 20));
        self.bars.push(TaskBar {
            bar,
            last_bytes: 0,
            last_tick: Instant::now(),
            speed: 0,
        });
        self.bars.len() - 1
    }

    /// 按任务状态刷新进度条
    pub fn update_progress(&mut self, index: usize, status: &TaskStatus) {
        let Some(task) = self.bars.get_mut(index) else {
            return;
        };
        if let Some(total) = status.size_total {
            if task.bar.length() != Some(total) {
                task.bar.set_length(total);
                task.bar.set_style(style(BAR_TEMPLATE));
            }
        }
        task.bar.set_position(status.size_downloaded);

        // 速度按两次刷新之间的增量估算
        let elapsed = task.last_tick.elapsed().as_secs_f64();
        if elapsed >= 0.5 {
            let delta = status.size_downloaded.saturating_sub(task.last_bytes);
            task.speed = (delta as f64 / elapsed) as u64;
            task.last_bytes = status.size_downloaded;
            task.last_tick = Instant::now();
        }

        let remaining = status
            .size_total
            .map(|total| total.saturating_sub(status.size_downloaded));
        task.bar.set_message(format!(
            "{} | {} | ETA:{}",
            status.state,
            format_speed(task.speed),
            format_eta(remaining, task.speed)
        ));
    }

    /// 结束进度条，显示最终结果
    pub fn finish_progress(&mut self, index: usize, status: &TaskStatus) {
        let Some(task) = self.bars.get(index) else {
            return;
        };
        if task.bar.is_finished() {
            return;
        }
        let message = if status.is_success() {
            "✓ 完成".to_string()
        } else {
            format!("✗ {}", status.error)
        };
        task.bar.set_position(status.size_downloaded);
        if status.is_success() {
            task.bar.finish_with_message(message);
        } else {
            task.bar.abandon_with_message(message);
        }
    }

    /// 输出一行不打乱进度条的文字
    pub fn println(&self, line: &str) {
        let _ = self.multi.println(line);
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn shorten(label: &str, width: usize) -> String {
    let count = label.chars().count();
    if count <= width {
        return label.to_string();
    }
    let tail: String = label.chars().skip(count - (width - 1)).collect();
    format!("…{}", tail)
}

pub fn format_speed(speed: u64) -> String {
    if speed > 1024 * 1024 {
        format!("{:.2} MB/s", speed as f64 / (1024.0 * 1024.0))
    } else if speed > 1024 {
        format!("{:.2} KB/s", speed as f64 / 1024.0)
    } else {
        format!("{} B/s", speed)
    }
}

/// 剩余时间，总大小或速度未知时为“未知”
pub fn format_eta(remaining: Option<u64>, speed: u64) -> String {
    match remaining {
        Some(0) => "0s".to_string(),
        Some(remaining) if speed > 0 => {
            let seconds = remaining / speed;
            if seconds > 3600 {
                format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
            } else if seconds > 60 {
                format!("{}m{}s", seconds / 60, seconds % 60)
            } else {
                format!("{}s", seconds)
            }
        }
        _ => "未知".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::state::TaskState;

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(512), "512 B/s");
        assert_eq!(format_speed(2048), "2.00 KB/s");
        assert_eq!(format_speed(3 * 1024 * 1024), "3.00 MB/s");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None, 100), "未知");
        assert_eq!(format_eta(Some(100), 0), "未知");
        assert_eq!(format_eta(Some(0), 0), "0s");
        assert_eq!(format_eta(Some(500), 10), "50s");
        assert_eq!(format_eta(Some(1000), 10), "1m40s");
        assert_eq!(format_eta(Some(7300), 1), "2h1m");
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short", 20), "short");
        let long = shorten("a-very-long-file-name-for-display.bin", 20);
        assert_eq!(long.chars().count(), 20);
        assert!(long.ends_with("display.bin"));
    }

    #[test]
    fn test_hidden_progress() {
        let mut progress = ProgressManager::hidden();
        let index = progress.add_progress_bar("file.bin");
        let mut status = TaskStatus {
            state: TaskState::Downloading,
            size_total: Some(100),
            size_downloaded: 40,
            ..TaskStatus::default()
        };
        progress.update_progress(index, &status);
        assert_eq!(progress.bars[index].bar.position(), 40);
        assert_eq!(progress.bars[index].bar.length(), Some(100));

        status.state = TaskState::Finished;
        status.size_downloaded = 100;
        progress.finish_progress(index, &status);
        assert!(progress.bars[index].bar.is_finished());
        // 越界索引被忽略
        progress.update_progress(9, &status);
    }
}
