// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置: 命令行参数 + JSON配置文件
pub mod detection; // 检测后处理系统
pub mod error; // 错误类型
pub mod relay; // 中继: 发布器 / 活动主题控制器 / 会话
pub mod stream; // 视频流输入: MJPEG解复用
pub mod telemetry; // 日志初始化
pub mod transport; // 消息总线抽象

pub use crate::config::{Args, RelayConfig};
pub use crate::detection::{Detection, Detector};
pub use crate::error::RelayError;
pub use crate::relay::{FramePublisher, Streamer, TopicController};
pub use crate::stream::{Frame, FrameDemuxer};
pub use crate::transport::{MemoryBus, QoS, Transport};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// 按置信度降序排序后做逐类别NMS
///
/// 同一类别中, 与已保留框 IoU 超过阈值的候选被抑制; 不同类别互不抑制.
/// 排序是稳定的, 同分候选保持原有顺序.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.score.total_cmp(&b1.score));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].label != xs[index].label {
                continue;
            }
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// ISO-8601 时间戳 (毫秒精度, UTC, `Z` 结尾)
pub fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bbox {
    // 原图像素坐标下的角点框
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// 中心点格式 → 角点格式
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2.)
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax.min(another.xmax);
        let t = self.ymin.max(another.ymin);
        let b = self.ymax.min(another.ymax);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}
