// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// MJPEG 帧解复用器
/// Incremental Motion-JPEG frame demultiplexer
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

/// JPEG 起始标记
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG 结束标记
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// 缓冲上限默认值
pub const DEFAULT_MAX_BUFFER: usize = 100_000;

/// 一帧完整的 JPEG 图像 (解复用线程 → 发布器 / 检测线程)
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// 增量解复用器
///
/// 跨调用保留一个累积缓冲, 标记可能被切在两个块之间.
/// 每次 `feed` 后缓冲里只剩最后一个未闭合的起始标记之后的字节
/// (或者一个可能是半个标记的 0xFF).
pub struct FrameDemuxer {
    buffer: Vec<u8>,
    // 缓冲以起始标记开头时, 下次从这里继续找结束标记
    eoi_scan_from: usize,
    max_buffer: usize,
    last_id: u64,
    overflows: u64,
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER)
    }
}

impl FrameDemuxer {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            eoi_scan_from: 0,
            max_buffer,
            last_id: 0,
            overflows: 0,
        }
    }

    /// 喂入一个数据块, 返回其中 (及之前残留中) 完成的所有帧, 按到达顺序
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut cursor = 0;
        let mut resume = self.eoi_scan_from;
        self.eoi_scan_from = 0;

        loop {
            let Some(start) = find_marker(&self.buffer, cursor, &JPEG_SOI) else {
                // 没有起始标记: 只留下可能是半个标记的末尾 0xFF
                cursor = match self.buffer.last() {
                    Some(&0xFF) => self.buffer.len() - 1,
                    _ => self.buffer.len(),
                };
                break;
            };

            let eoi_from = (start + 2).max(resume);
            resume = 0;
            let Some(end) = find_marker(&self.buffer, eoi_from, &JPEG_EOI) else {
                cursor = start;
                // 下次从末尾前一字节继续, 覆盖跨块的结束标记
                self.eoi_scan_from = (self.buffer.len() - start).saturating_sub(1).max(2);
                break;
            };

            let data = self.buffer[start..end + 2].to_vec();
            frames.push(self.make_frame(data));
            cursor = end + 2;
        }

        if cursor > 0 {
            self.buffer.drain(..cursor);
        }

        if self.buffer.len() > self.max_buffer {
            warn!(
                "⚠️  缓冲溢出: {} 字节 (上限 {}), 清空缓冲",
                self.buffer.len(),
                self.max_buffer
            );
            self.buffer.clear();
            self.eoi_scan_from = 0;
            self.overflows += 1;
        }

        frames
    }

    /// 丢弃内部状态, 从头开始
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.eoi_scan_from = 0;
    }

    /// 当前缓冲中的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 累计溢出清空次数
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    fn make_frame(&mut self, data: Vec<u8>) -> Frame {
        let timestamp = Utc::now();
        // 毫秒时间戳作为帧ID, 同一毫秒内递增保证单调
        let millis = timestamp.timestamp_millis().max(0) as u64;
        self.last_id = millis.max(self.last_id + 1);
        Frame {
            id: self.last_id,
            timestamp,
            data: Arc::new(data),
        }
    }
}

fn find_marker(haystack: &[u8], from: usize, marker: &[u8; 2]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}
