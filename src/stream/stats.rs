// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 发布统计 (Publish statistics)
///
/// 计数器由发布器独占修改; 统计线程只读, 每隔固定周期打印一次快照
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Sender};
use serde::Serialize;
use tracing::{info, warn};

/// 发布计数器
#[derive(Debug, Default)]
pub struct PublishCounters {
    in_flight: AtomicUsize,
    dropped: AtomicU64,
    published: AtomicU64,
}

impl PublishCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 在未达上限时占用一个发布名额
    pub(crate) fn try_acquire(&self, max_in_flight: usize) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_in_flight).then_some(n + 1)
            })
            .is_ok()
    }

    /// 发布完成 (无论成败) 时归还名额, 计数不会小于0
    pub(crate) fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// 会话开始时清零 (在途数保留, 由尚未完成的发布自行归还)
    pub fn reset(&self) {
        self.dropped.store(0, Ordering::Relaxed);
        self.published.store(0, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// 统计快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub average_fps: f64,
    pub current_fps: f64,
    pub in_flight: usize,
}

/// 快照计算 (平均fps从会话开始算, 当前fps只看上一个窗口)
#[derive(Debug)]
pub struct StatsWindow {
    started: Instant,
    window_start: Instant,
    window_frames: u64,
}

impl StatsWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            window_start: now,
            window_frames: 0,
        }
    }

    pub fn sample(&mut self, counters: &PublishCounters, now: Instant) -> StatsSnapshot {
        let total = counters.published();
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let window = now.duration_since(self.window_start).as_secs_f64();
        let window_frames = total.saturating_sub(self.window_frames);

        self.window_start = now;
        self.window_frames = total;

        StatsSnapshot {
            total_frames: total,
            dropped_frames: counters.dropped(),
            average_fps: if elapsed > 0. { total as f64 / elapsed } else { 0. },
            current_fps: if window > 0. { window_frames as f64 / window } else { 0. },
            in_flight: counters.in_flight(),
        }
    }
}

/// 统计线程句柄, drop 或 stop 时退出
pub struct StatsReporter {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatsReporter {
    pub fn spawn(counters: Arc<PublishCounters>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let spawned = std::thread::Builder::new()
            .name("relay-stats".into())
            .spawn(move || {
                let ticker = tick(interval);
                let mut window = StatsWindow::new(Instant::now());
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let s = window.sample(&counters, Instant::now());
                            let dropped = if s.dropped_frames > 0 {
                                format!(" ({} dropped)", s.dropped_frames)
                            } else {
                                String::new()
                            };
                            info!(
                                total_frames = s.total_frames,
                                dropped_frames = s.dropped_frames,
                                in_flight = s.in_flight,
                                "📊 统计: {}帧, 平均 {:.2}fps, 当前 {:.2}fps{}, 在途 {}",
                                s.total_frames, s.average_fps, s.current_fps, dropped, s.in_flight
                            );
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("⚠️  统计线程启动失败: {}", e);
                None
            }
        };

        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    pub fn stop(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        // 关闭发送端, 统计线程的 recv 立即返回
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
