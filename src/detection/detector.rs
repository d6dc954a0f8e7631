// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测器 (Detector)
//! 职责: JPEG字节 → 预处理 → 推理 → 解码/NMS → 类别过滤

use std::time::Instant;

use anyhow::{bail, Context, Result};
use ndarray::{Axis, Ix2};
use tracing::{debug, warn};

use super::engine::InferenceEngine;
use super::postprocess::{filter_labels, YoloV8Postprocessor};
use super::preprocess::Preprocessor;
use super::types::Detection;
use crate::config::DetectionConfig;

/// 单帧检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub detections: Vec<Detection>,
    pub width: u32,
    pub height: u32,
}

pub struct Detector {
    engine: Box<dyn InferenceEngine>,
    pre: Preprocessor,
    post: YoloV8Postprocessor,
    labels: Vec<String>,
}

impl Detector {
    pub fn new(engine: Box<dyn InferenceEngine>, config: &DetectionConfig) -> Self {
        Self {
            engine,
            pre: Preprocessor::new(config.input_size),
            post: YoloV8Postprocessor::new(
                config.confidence_threshold,
                config.iou_threshold,
                config.input_size,
            ),
            labels: config.labels.clone(),
        }
    }

    /// 按配置加载 ONNX 模型
    #[cfg(feature = "onnx")]
    pub fn from_config(config: &DetectionConfig) -> std::result::Result<Self, crate::RelayError> {
        let path = config
            .model_path
            .as_ref()
            .ok_or_else(|| crate::RelayError::Config("未指定模型路径".to_string()))?;
        let engine = super::engine::OrtBackend::build(path)?;
        Ok(Self::new(Box::new(engine), config))
    }

    pub fn model_name(&self) -> &str {
        self.engine.name()
    }

    pub fn try_detect(&mut self, encoded: &[u8]) -> Result<FrameDetections> {
        let t0 = Instant::now();
        let input = self.pre.preprocess(encoded)?;
        let (width, height) = (input.original_width, input.original_height);
        let t_pre = t0.elapsed();

        let t1 = Instant::now();
        let raw = self.engine.run(input.into_array()?)?;
        let t_run = t1.elapsed();

        // [1, C, D] → [C, D]
        let output = match raw.ndim() {
            3 => raw.index_axis(Axis(0), 0),
            2 => raw.view(),
            n => bail!("不支持的输出维度: {} ({:?})", n, raw.shape()),
        };
        let output = output
            .into_dimensionality::<Ix2>()
            .context("输出张量形状错误")?;

        let t2 = Instant::now();
        let detections = filter_labels(self.post.postprocess(output, width, height), &self.labels);
        debug!(
            "🎯 检测 {} 个目标 (预处理 {:.1}ms, 推理 {:.1}ms, 后处理 {:.1}ms)",
            detections.len(),
            t_pre.as_secs_f64() * 1000.0,
            t_run.as_secs_f64() * 1000.0,
            t2.elapsed().as_secs_f64() * 1000.0
        );

        Ok(FrameDetections {
            detections,
            width,
            height,
        })
    }

    /// 输入无法处理时返回空结果
    pub fn detect(&mut self, encoded: &[u8]) -> Vec<Detection> {
        match self.try_detect(encoded) {
            Ok(result) => result.detections,
            Err(e) => {
                warn!("⚠️  检测失败: {:#}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use ndarray::{Array3, Array4, ArrayD};
    use std::io::Cursor;

    /// 固定输出的假引擎
    pub(crate) struct ScriptedEngine {
        pub output: ArrayD<f32>,
        pub calls: usize,
    }

    impl InferenceEngine for ScriptedEngine {
        fn run(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
            assert_eq!(input.shape()[..2], [1, 3]);
            self.calls += 1;
            Ok(self.output.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// [1, 4+2, 3]: 一个人, 一辆自行车, 一个低分候选
    pub(crate) fn scripted_output() -> ArrayD<f32> {
        let mut out = Array3::<f32>::zeros((1, 6, 3));
        let cands = [
            (320., 320., 64., 128., 0.92, 0.0),
            (100., 100., 40., 40., 0.0, 0.88),
            (500., 500., 40., 40., 0.3, 0.1),
        ];
        for (i, (cx, cy, w, h, p, b)) in cands.into_iter().enumerate() {
            out[[0, 0, i]] = cx;
            out[[0, 1, i]] = cy;
            out[[0, 2, i]] = w;
            out[[0, 3, i]] = h;
            out[[0, 4, i]] = p;
            out[[0, 5, i]] = b;
        }
        out.into_dyn()
    }

    pub(crate) fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    fn detector(labels: &[&str]) -> Detector {
        let config = DetectionConfig {
            input_size: 64,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let mut d = Detector::new(
            Box::new(ScriptedEngine {
                output: scripted_output(),
                calls: 0,
            }),
            &config,
        );
        // 输出坐标按 640 输入给出
        d.post.input_size = 640;
        d
    }

    #[test]
    fn test_detect_people_only() {
        let mut d = detector(&["person"]);
        let result = d.try_detect(&test_jpeg(1280, 640)).unwrap();
        assert_eq!((result.width, result.height), (1280, 640));
        assert_eq!(result.detections.len(), 1);
        let person = &result.detections[0];
        assert_eq!(person.label, "person");
        assert!((person.bbox.xmin - 576.).abs() < 1e-3);
        assert!((person.bbox.ymax - 384.).abs() < 1e-3);
    }

    #[test]
    fn test_detect_all_labels() {
        let mut d = detector(&[]);
        let ys = d.detect(&test_jpeg(640, 640));
        let labels: Vec<&str> = ys.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["person", "bicycle"]);
    }

    #[test]
    fn test_bad_input_yields_empty() {
        let mut d = detector(&["person"]);
        assert!(d.detect(b"not an image").is_empty());
    }

    #[test]
    fn test_unexpected_output_shape() {
        let config = DetectionConfig {
            input_size: 32,
            ..Default::default()
        };
        let mut d = Detector::new(
            Box::new(ScriptedEngine {
                output: ArrayD::zeros(vec![84]),
                calls: 0,
            }),
            &config,
        );
        assert!(d.try_detect(&test_jpeg(32, 32)).is_err());
        assert!(d.detect(&test_jpeg(32, 32)).is_empty());
    }
}
