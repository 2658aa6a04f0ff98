use anyhow::Context;
use chunkfetch::cli::{self, Args};
use chunkfetch::core::transport::HttpTransport;
use chunkfetch::core::{Destination, Downloader, TaskHandle, TaskKind, TaskStatus};
use chunkfetch::ui::{self, DownloadSummary, ProgressManager};
use chunkfetch::utils::logger::{init_logger, parse_level};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use log::{error, info};
use serde::Serialize;
use std::time::{Duration, Instant};

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// JSON 输出的单条记录
#[derive(Serialize)]
struct TaskReport<'a> {
    url: &'a str,
    destination: &'a str,
    kind: TaskKind,
    status: TaskStatus,
}

/// 退出时恢复终端
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Option<Self> {
        terminal::enable_raw_mode().ok().map(|_| RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn main() -> anyhow::Result<()> {
    // 解析参数和配置
    let (args, config) = match Args::parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            ui::print_error(&format!("参数解析失败: {}", e));
            std::process::exit(2);
        }
    };

    init_logger(&config.log_file, parse_level(&config.log_level), config.log_max_size)
        .context("无法初始化日志")?;
    info!(
        "chunkfetch {} 启动 (提交 {}, 构建于 {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    );
    info!("配置文件路径: {}", args.config);
    info!("{}", config.get_summary());

    let urls = match args.get_urls() {
        Ok(urls) => urls,
        Err(e) => {
            error!("获取URL列表失败: {}", e);
            ui::print_error(&format!("获取URL列表失败: {}", e));
            std::process::exit(2);
        }
    };
    info!("解析到的URLs: {:?}", urls);

    let user_agent = config.user_agent.clone();
    let connect_timeout = Duration::from_secs(config.timeout);
    let downloader = Downloader::with_transport(config.hints(), move || {
        HttpTransport::new(user_agent).with_connect_timeout(connect_timeout)
    })
    .context("无法启动下载器")?;

    let tasks = create_tasks(&downloader, &args, &config, &urls);
    if tasks.is_empty() {
        ui::print_error("没有可下载的任务");
        std::process::exit(1);
    }

    let started = Instant::now();
    let statuses = run_download_loop(&downloader, &tasks, args.json)?;

    if args.json {
        let reports: Vec<TaskReport<'_>> = tasks
            .iter()
            .zip(&statuses)
            .map(|(task, status)| TaskReport {
                url: &task.info().url,
                destination: &task.info().destination,
                kind: task.info().kind,
                status: status.clone(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (task, status) in tasks.iter().zip(&statuses) {
            match (task.info().kind, status.is_success()) {
                (TaskKind::SizeOnly, true) => ui::print_success(&format!(
                    "{}: {} 字节",
                    task.info().url,
                    status.size_total.unwrap_or(0)
                )),
                (_, true) => ui::print_success(&format!("{} -> {}", task.info().url, task.info().destination)),
                (_, false) => ui::print_error(&format!("{}: {}", task.info().url, status.error)),
            }
        }
        print!("{}", DownloadSummary::from_statuses(&statuses, started.elapsed()));
    }

    let stats = downloader.stats();
    info!(
        "下载结束: {} 个任务, {} 个子任务, 连接峰值 {}",
        stats.tasks_registered, stats.sub_tasks_created, stats.peak_handles_in_use
    );

    if statuses.iter().any(|status| !status.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}

/// 为每个URL创建任务，单个失败不影响其它任务
fn create_tasks(
    downloader: &Downloader,
    args: &Args,
    config: &chunkfetch::config::Config,
    urls: &[String],
) -> Vec<TaskHandle> {
    let mut tasks = Vec::new();
    for url in urls {
        let created = if args.size_only {
            downloader.start_size_probe(url)
        } else {
            let destination = Destination::path(args.destination_for(config, url));
            if args.resume {
                downloader.resume_task(url, destination, None)
            } else {
                downloader.start_task(url, destination, None)
            }
        };
        match created {
            Ok(task) => {
                info!("创建下载任务: {} -> {}", url, task.info().destination);
                tasks.push(task);
            }
            Err(e) => {
                error!("创建下载任务失败: {} - {}", url, e);
                ui::print_error(&format!("创建下载任务失败: {} - {}", url, e));
            }
        }
    }
    tasks
}

/// 刷新进度并处理按键，直到所有任务结束；返回每个任务的最终状态
fn run_download_loop(
    downloader: &Downloader,
    tasks: &[TaskHandle],
    quiet: bool,
) -> anyhow::Result<Vec<TaskStatus>> {
    let mut progress = if quiet {
        ProgressManager::hidden()
    } else {
        ProgressManager::new()
    };
    let bars: Vec<usize> = tasks
        .iter()
        .map(|task| progress.add_progress_bar(&cli::extract_filename_from_url(&task.info().url)))
        .collect();

    let keys = if quiet { None } else { RawModeGuard::enable() };
    if keys.is_some() {
        progress.println("开始下载... (按 'q' 移除所有任务并退出)");
    }

    let mut removed = false;
    let mut last_update = Instant::now() - PROGRESS_UPDATE_INTERVAL;
    loop {
        if keys.is_some() && event::poll(KEYBOARD_POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                let quit = key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q'));
                if quit && !removed {
                    info!("用户移除所有下载任务");
                    progress.println("正在移除所有任务...");
                    for task in tasks {
                        downloader.remove_task(task);
                    }
                    removed = true;
                }
            }
        } else if keys.is_none() {
            std::thread::sleep(KEYBOARD_POLL_INTERVAL);
        }

        if last_update.elapsed() >= PROGRESS_UPDATE_INTERVAL {
            let mut all_finished = true;
            for (task, bar) in tasks.iter().zip(&bars) {
                let status = downloader.task_status(task);
                if status.is_finished() {
                    progress.finish_progress(*bar, &status);
                } else {
                    all_finished = false;
                    progress.update_progress(*bar, &status);
                }
            }
            if all_finished {
                break;
            }
            last_update = Instant::now();
        }
    }
    drop(keys);

    Ok(tasks.iter().map(|task| downloader.wait_task(task)).collect())
}
