// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频流输入 (MJPEG over HTTP)
///
/// 摄像头的 HTTP 响应体就是字节流, 分帧完全依赖 JPEG 标记
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::demux::{Frame, FrameDemuxer};
use crate::error::{RelayError, Result};

/// 前N帧打印详细信息
const LOGGED_FRAMES: u64 = 10;
/// 接收速率打印周期
const THROUGHPUT_INTERVAL: Duration = Duration::from_secs(2);

/// 摄像头 MJPEG 连接
pub struct MjpegSource {
    url: String,
    reader: Box<dyn Read + Send + Sync>,
}

impl MjpegSource {
    /// 发起 GET 并校验状态码, 返回的 reader 即为持续的视频流
    ///
    /// `read_timeout` 是单次读取的空闲上限, 超时后读取返回 `TimedOut`
    pub fn connect(url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        info!("🔗 连接摄像头: {}", url);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();

        let response = agent
            .get(url)
            .set("Connection", "keep-alive")
            .set("Accept", "*/*")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => RelayError::HttpStatus(code),
                ureq::Error::Transport(t) => RelayError::Connect {
                    url: url.to_string(),
                    reason: t.to_string(),
                },
            })?;

        let status = response.status();
        info!("✅ 摄像头响应 HTTP {} {}", status, response.status_text());
        for name in response.headers_names() {
            debug!("   {}: {}", name, response.header(&name).unwrap_or(""));
        }
        if status != 200 {
            return Err(RelayError::HttpStatus(status));
        }

        Ok(Self {
            url: url.to_string(),
            reader: Box::new(response.into_reader()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn into_reader(self) -> Box<dyn Read + Send + Sync> {
        self.reader
    }
}

/// 帧率限制; 只有放行的帧才推进时钟
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// 接收诊断: 前N帧的大小与间隔, 以及周期性吞吐
#[derive(Debug)]
struct IngestDiagnostics {
    frames_seen: u64,
    last_frame_at: Option<Instant>,
    window_start: Instant,
    window_bytes: usize,
}

impl IngestDiagnostics {
    fn new(now: Instant) -> Self {
        Self {
            frames_seen: 0,
            last_frame_at: None,
            window_start: now,
            window_bytes: 0,
        }
    }

    fn on_chunk(&mut self, len: usize, now: Instant) {
        self.window_bytes += len;
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= THROUGHPUT_INTERVAL {
            let kbps = self.window_bytes as f64 / 1024.0 / elapsed.as_secs_f64();
            debug!("📥 接收速率: {:.1} KB/s", kbps);
            self.window_start = now;
            self.window_bytes = 0;
        }
    }

    fn on_frame(&mut self, frame: &Frame, now: Instant) {
        self.frames_seen += 1;
        if self.frames_seen <= LOGGED_FRAMES {
            let gap = self
                .last_frame_at
                .map(|t| now.duration_since(t).as_millis())
                .unwrap_or(0);
            info!(
                frame_id = frame.id,
                "🖼️  第{}帧: {} 字节, 距上一帧 {}ms",
                self.frames_seen,
                frame.len(),
                gap
            );
        }
        self.last_frame_at = Some(now);
    }
}

/// 从 reader 持续读取并分帧, 每帧回调一次
///
/// `keep_going` 在每次读取前检查, 返回 false 时正常退出;
/// 流结束 (EOF) 也视为正常结束, 读取错误返回 `RelayError::Stream`
pub fn pump<R, F, K>(
    mut reader: R,
    chunk_size: usize,
    demuxer: &mut FrameDemuxer,
    keep_going: K,
    mut on_frame: F,
) -> Result<()>
where
    R: Read,
    F: FnMut(Frame),
    K: Fn() -> bool,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut diag = IngestDiagnostics::new(Instant::now());

    while keep_going() {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                info!("📴 视频流结束");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RelayError::Stream(e)),
        };

        let now = Instant::now();
        diag.on_chunk(n, now);
        for frame in demuxer.feed(&chunk[..n]) {
            diag.on_frame(&frame, now);
            on_frame(frame);
        }
    }
    debug!("视频流读取已停止");
    Ok(())
}
