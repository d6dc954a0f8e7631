// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 推流会话 (Streamer)
//! 职责: 管理唯一的拉流会话, 对外提供 启动 / 停止 / 状态 / 切换主题

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, error, info};

use super::controller::TopicController;
use super::envelope::TopicChangedNotice;
use super::publisher::{FramePublisher, PublishOutcome};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::stream::{
    self, Frame, FrameDemuxer, FrameThrottle, MjpegSource, PublishCounters, StatsReporter,
};
use crate::transport::Transport;

/// 会话状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub active: bool,
    pub source_url: String,
    pub video_topic_prefix: String,
    pub active_topic: String,
    pub full_video_topic: String,
    pub control_topic: String,
    pub frames_published: u64,
    pub dropped_frames: u64,
    pub in_flight: usize,
}

/// 会话结束事件
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnd {
    pub generation: u64,
    /// None 表示正常结束 (EOF 或主动停止)
    pub error: Option<String>,
}

pub struct Streamer {
    source_url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    chunk_size: usize,
    max_buffer: usize,
    min_frame_interval: Duration,
    stats_interval: Duration,

    controller: Arc<TopicController>,
    publisher: Arc<FramePublisher>,
    counters: Arc<PublishCounters>,

    active: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    /// 当前会话的统计线程 (会话代数, 句柄)
    stats: Arc<Mutex<Option<(u64, StatsReporter)>>>,
    frame_tap: Option<Sender<Frame>>,
    ended_tx: Sender<SessionEnd>,
    ended_rx: Receiver<SessionEnd>,
}

impl Streamer {
    pub fn new(config: &RelayConfig, transport: Arc<dyn Transport>) -> Self {
        let counters = PublishCounters::new();
        let controller = Arc::new(TopicController::from_config(
            transport.clone(),
            &config.relay,
        ));
        let publisher = Arc::new(FramePublisher::new(
            transport,
            counters.clone(),
            config.relay.max_in_flight,
        ));
        let (ended_tx, ended_rx) = unbounded();

        Self {
            source_url: config.camera_url(),
            connect_timeout: Duration::from_secs(config.camera.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.camera.read_timeout_secs),
            chunk_size: config.relay.chunk_size,
            max_buffer: config.relay.max_buffer_bytes,
            min_frame_interval: config.min_frame_interval(),
            stats_interval: config.stats_interval(),
            controller,
            publisher,
            counters,
            active: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(Mutex::new(None)),
            frame_tap: None,
            ended_tx,
            ended_rx,
        }
    }

    /// 放行的帧同时尝试送入检测通道 (满则跳过)
    pub fn with_frame_tap(mut self, tap: Sender<Frame>) -> Self {
        self.frame_tap = Some(tap);
        self
    }

    pub fn controller(&self) -> &Arc<TopicController> {
        &self.controller
    }

    pub fn publisher(&self) -> &Arc<FramePublisher> {
        &self.publisher
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 会话结束通知 (每个会话一条)
    pub fn session_events(&self) -> Receiver<SessionEnd> {
        self.ended_rx.clone()
    }

    /// 连接摄像头并启动会话; 已在运行时什么也不做, 返回 false
    pub fn start(&self) -> Result<bool> {
        if !self.claim() {
            info!("ℹ️  视频流已在运行");
            return Ok(false);
        }
        let source = match MjpegSource::connect(
            &self.source_url,
            self.connect_timeout,
            self.read_timeout,
        ) {
            Ok(source) => source,
            Err(e) => {
                self.active.store(false, Ordering::Release);
                error!("❌ 摄像头连接失败: {}", e);
                return Err(e);
            }
        };
        self.launch(source.into_reader());
        Ok(true)
    }

    /// 用给定的字节流启动会话 (测试 / 回放)
    pub fn start_with_reader<R>(&self, reader: R) -> bool
    where
        R: Read + Send + 'static,
    {
        if !self.claim() {
            info!("ℹ️  视频流已在运行");
            return false;
        }
        self.launch(reader);
        true
    }

    fn claim(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn launch<R>(&self, reader: R)
    where
        R: Read + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.reset();
        let previous = self.lock_stats().replace((
            generation,
            StatsReporter::spawn(self.counters.clone(), self.stats_interval),
        ));
        if let Some((_, stats)) = previous {
            stats.stop();
        }

        let active = self.active.clone();
        let current = self.generation.clone();
        let controller = self.controller.clone();
        let publisher = self.publisher.clone();
        let tap = self.frame_tap.clone();
        let ended = self.ended_tx.clone();
        let stats = self.stats.clone();
        let chunk_size = self.chunk_size;
        let mut demuxer = FrameDemuxer::new(self.max_buffer);
        let mut throttle = FrameThrottle::new(self.min_frame_interval);

        let spawned = std::thread::Builder::new()
            .name(format!("relay-ingest-{}", generation))
            .spawn(move || {
                let is_current = || {
                    active.load(Ordering::Acquire) && current.load(Ordering::Acquire) == generation
                };
                let result = stream::pump(reader, chunk_size, &mut demuxer, is_current, |frame| {
                    if !is_current() || !throttle.admit(Instant::now()) {
                        return;
                    }
                    if publisher.publish_frame(&frame, &controller) == PublishOutcome::Submitted {
                        if let Some(tap) = tap.as_ref() {
                            match tap.try_send(frame) {
                                Ok(()) | Err(TrySendError::Full(_)) => {}
                                Err(TrySendError::Disconnected(_)) => {
                                    debug!("检测通道已关闭");
                                }
                            }
                        }
                    }
                });

                // 只结束属于自己的会话
                if current.load(Ordering::Acquire) == generation {
                    active.store(false, Ordering::Release);
                }
                stop_stats(&stats, generation);
                let error = match result {
                    Ok(()) => None,
                    Err(e) => {
                        error!("❌ 视频流错误: {}", e);
                        Some(e.to_string())
                    }
                };
                let _ = ended.send(SessionEnd { generation, error });
            });

        match spawned {
            Ok(_) => info!("▶️  视频流会话 #{} 已启动", generation),
            Err(e) => {
                error!("❌ 读取线程启动失败: {}", e);
                self.active.store(false, Ordering::Release);
                self.lock_stats().take();
                let _ = self.ended_tx.send(SessionEnd {
                    generation,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    /// 停止会话, 可重复调用
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("⏹️  视频流已停止");
        }
        if let Some((_, stats)) = self.lock_stats().take() {
            stats.stop();
        }
    }

    pub fn change_topic(&self, new_topic: &str) -> TopicChangedNotice {
        self.controller.change_topic(new_topic)
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            active: self.is_active(),
            source_url: self.source_url.clone(),
            video_topic_prefix: self.controller.prefix().to_string(),
            active_topic: self.controller.active_topic(),
            full_video_topic: self.controller.full_topic(),
            control_topic: self.controller.control_topic().to_string(),
            frames_published: self.counters.published(),
            dropped_frames: self.counters.dropped(),
            in_flight: self.counters.in_flight(),
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, Option<(u64, StatsReporter)>> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 会话结束时停掉它自己的统计线程; 新会话的统计线程不受影响
fn stop_stats(stats: &Mutex<Option<(u64, StatsReporter)>>, generation: u64) {
    let finished = {
        let mut slot = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_ref() {
            Some((owner, _)) if *owner == generation => slot.take(),
            _ => None,
        }
    };
    if let Some((_, reporter)) = finished {
        reporter.stop();
        debug!("统计线程随会话 #{} 结束", generation);
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}
