// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测分析线程
//! 职责: 取最新一帧 → 检测 → 发布 DetectionReport 到分析主题
//!
//! 帧通道只有一个槽位, 检测忙时新帧直接跳过.

use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::detector::{Detector, FrameDetections};
use super::types::Detection;
use crate::error::Result;
use crate::iso_timestamp;
use crate::relay::{FramePublisher, PublishOutcome, TopicController};
use crate::stream::Frame;
use crate::transport::QoS;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// 分析报告 (JSON)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub frame_id: u64,
    pub people_count: usize,
    pub detections: Vec<Detection>,
    pub timestamp: String,
    pub frame_size: FrameSize,
    pub active_topic: String,
    pub model: String,
}

impl DetectionReport {
    pub fn new(frame: &Frame, result: FrameDetections, active_topic: String, model: &str) -> Self {
        Self {
            frame_id: frame.id,
            people_count: result
                .detections
                .iter()
                .filter(|d| d.label == "person")
                .count(),
            detections: result.detections,
            timestamp: iso_timestamp(Utc::now()),
            frame_size: FrameSize {
                width: result.width,
                height: result.height,
            },
            active_topic,
            model: model.to_string(),
        }
    }
}

/// 单槽帧通道 (读取线程 try_send, 满则跳过)
pub fn frame_channel() -> (Sender<Frame>, Receiver<Frame>) {
    bounded(1)
}

pub struct AnalyticsWorker {
    handle: JoinHandle<()>,
}

impl AnalyticsWorker {
    /// 启动分析线程; 帧通道的发送端全部关闭后退出
    pub fn spawn(
        mut detector: Detector,
        frames: Receiver<Frame>,
        publisher: FramePublisher,
        topics: Arc<TopicController>,
        analytics_topic: String,
    ) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("relay-analytics".into())
            .spawn(move || {
                info!("🧠 检测分析线程启动, 结果发布到 {}", analytics_topic);
                for frame in frames {
                    let result = match detector.try_detect(frame.bytes()) {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(frame_id = frame.id, "⚠️  检测失败: {:#}", e);
                            continue;
                        }
                    };

                    let report = DetectionReport::new(
                        &frame,
                        result,
                        topics.active_topic(),
                        detector.model_name(),
                    );
                    debug!(
                        frame_id = frame.id,
                        "👥 检测到 {} 人 ({} 个目标)",
                        report.people_count,
                        report.detections.len()
                    );

                    let payload = match serde_json::to_vec(&report) {
                        Ok(p) => p,
                        Err(e) => {
                            error!("❌ 分析报告序列化失败: {}", e);
                            continue;
                        }
                    };
                    if publisher.publish(&analytics_topic, payload, QoS::AtMostOnce)
                        == PublishOutcome::Dropped
                    {
                        debug!("分析报告在途已满, 跳过");
                    }
                }
                info!("🧠 检测分析线程退出");
            })?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("❌ 检测分析线程异常退出");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::detection::detector::tests::{scripted_output, test_jpeg, ScriptedEngine};
    use crate::stream::PublishCounters;
    use crate::transport::MemoryBus;
    use serde_json::Value;

    #[test]
    fn test_worker_publishes_report() {
        let bus = Arc::new(MemoryBus::new());
        let topics = Arc::new(TopicController::new(
            bus.clone(),
            "video/esp32",
            "aircanada",
            "video/esp32/control",
        ));
        let config = DetectionConfig {
            labels: vec![],
            ..Default::default()
        };
        let detector = Detector::new(
            Box::new(ScriptedEngine {
                output: scripted_output(),
                calls: 0,
            }),
            &config,
        );
        let publisher = FramePublisher::new(bus.clone(), PublishCounters::new(), 1);
        let (tx, rx) = frame_channel();
        let worker = AnalyticsWorker::spawn(
            detector,
            rx,
            publisher,
            topics,
            config.analytics_topic.clone(),
        )
        .unwrap();

        tx.send(Frame {
            id: 42,
            timestamp: Utc::now(),
            data: Arc::new(test_jpeg(640, 640)),
        })
        .unwrap();
        drop(tx);
        worker.join();

        let msgs = bus.messages_on("video/esp32/analytics");
        assert_eq!(msgs.len(), 1);
        let doc: Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(doc["frameId"], 42);
        assert_eq!(doc["activeTopic"], "aircanada");
        assert_eq!(doc["model"], "scripted");
        assert_eq!(doc["frameSize"]["width"], 640);
        assert_eq!(doc["detections"].as_array().unwrap().len(), 2);
        assert_eq!(doc["peopleCount"], 1);
        assert_eq!(doc["detections"][0]["bbox"]["xmin"], 288.0);
    }

    #[test]
    fn test_full_channel_skips_frames() {
        let (tx, _rx) = frame_channel();
        let frame = Frame {
            id: 1,
            timestamp: Utc::now(),
            data: Arc::new(vec![]),
        };
        assert!(tx.try_send(frame.clone()).is_ok());
        assert!(tx.try_send(frame).is_err());
    }
}
