// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 单张图片检测
///
/// cargo run --bin detect --release -- --model models/yolov8n.onnx frame.jpg
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use camera_relay::config::DetectionConfig;
use camera_relay::detection::Detector;
use camera_relay::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(author, version, about = "YOLOv8 单张图片检测", long_about = None)]
struct Args {
    /// ONNX模型路径
    #[arg(short, long, default_value = "models/yolov8n.onnx")]
    model: PathBuf,

    /// 图片路径 (JPEG/PNG)
    image: PathBuf,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.5)]
    conf: f32,

    /// NMS IoU阈值
    #[arg(long, default_value_t = 0.45)]
    iou: f32,

    /// 只保留的类别, 逗号分隔; 空字符串表示全部
    #[arg(long, default_value = "person")]
    labels: String,

    /// 输出调试日志
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = DetectionConfig {
        model_path: Some(args.model.clone()),
        confidence_threshold: args.conf,
        iou_threshold: args.iou,
        labels: args
            .labels
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        ..Default::default()
    };

    let mut detector = Detector::from_config(&config).context("检测模型初始化失败")?;
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("读取图片失败: {}", args.image.display()))?;

    let result = detector.try_detect(&bytes)?;
    info!(
        "✅ {}x{} 检测到 {} 个目标",
        result.width,
        result.height,
        result.detections.len()
    );
    println!("{}", serde_json::to_string_pretty(&result.detections)?);
    Ok(())
}
