// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 推理引擎接口 (张量进, 张量出)

use anyhow::Result;
use ndarray::{Array4, ArrayD};

/// 推理后端; 同一实例的调用由调用方串行化
pub trait InferenceEngine: Send {
    /// 输入 [1, 3, N, N], 输出原始张量 (YOLOv8 为 [1, 84, 8400])
    fn run(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>>;

    /// 模型名 (用于分析报告)
    fn name(&self) -> &str;
}

#[cfg(feature = "onnx")]
pub use self::onnx::OrtBackend;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;

    use anyhow::{Context, Result};
    use ndarray::{Array4, ArrayD};
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use tracing::info;

    use super::InferenceEngine;
    use crate::error::RelayError;

    const INPUT_NAME: &str = "images";
    const OUTPUT_NAME: &str = "output0";

    /// ONNX Runtime 后端
    pub struct OrtBackend {
        session: Session,
        name: String,
    }

    impl OrtBackend {
        /// 加载模型; 失败是唯一的致命错误
        pub fn build(path: impl AsRef<Path>) -> std::result::Result<Self, RelayError> {
            let path = path.as_ref();
            let session = load_session(path)
                .map_err(|e| RelayError::ModelInit(format!("{}: {:#}", path.display(), e)))?;

            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "yolov8".to_string());
            info!("✅ 模型已加载: {}", path.display());
            Ok(Self { session, name })
        }
    }

    fn load_session(path: &Path) -> Result<Session> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .context("模型文件加载失败")?;
        Ok(session)
    }

    impl InferenceEngine for OrtBackend {
        fn run(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
            let tensor = Tensor::from_array(input).context("输入张量创建失败")?;
            let outputs = self
                .session
                .run(ort::inputs![INPUT_NAME => tensor])
                .context("推理失败")?;
            let output = outputs[OUTPUT_NAME]
                .try_extract_array::<f32>()
                .context("输出张量提取失败")?;
            Ok(output.to_owned())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
