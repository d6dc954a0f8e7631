// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频流输入系统 (Video Stream Input)
///
/// 摄像头以 HTTP 长连接推送 MJPEG 字节流, 块的大小与时机都不固定
/// - FrameDemuxer: 按 JPEG 起止标记增量切帧
/// - MjpegSource:  HTTP 拉流
/// - pump:         读取循环 (读块 → 切帧 → 回调)
/// - Stats:        发布计数 + 周期统计
pub mod demux;
pub mod ingest;
pub mod stats;

pub use demux::{Frame, FrameDemuxer, JPEG_EOI, JPEG_SOI};
pub use ingest::{pump, FrameThrottle, MjpegSource};
pub use stats::{PublishCounters, StatsReporter, StatsSnapshot};
