// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// 独立工作线程, 对中继的帧做人员检测
/// - Preprocessor: 解码 + 拉伸 + 归一化
/// - Engine:       推理后端 (ONNX Runtime)
/// - Postprocessor: YOLOv8 解码 + NMS
/// - Analytics:    检测线程, 发布分析报告
pub mod analytics;
pub mod detector;
pub mod engine;
pub mod postprocess;
pub mod preprocess;
pub mod types;

pub use analytics::{AnalyticsWorker, DetectionReport};
pub use detector::{Detector, FrameDetections};
pub use engine::InferenceEngine;
#[cfg(feature = "onnx")]
pub use engine::OrtBackend;
pub use postprocess::{filter_labels, YoloV8Postprocessor};
pub use preprocess::Preprocessor;
pub use types::{Detection, InputTensor, COCO_CLASSES};
