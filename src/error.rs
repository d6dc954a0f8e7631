// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use thiserror::Error;

/// 中继系统错误
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("无法连接摄像头 {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("摄像头返回 HTTP {0}")]
    HttpStatus(u16),

    #[error("视频流读取失败: {0}")]
    Stream(#[source] std::io::Error),

    #[error("消息总线错误: {0}")]
    Transport(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("模型加载失败: {0}")]
    ModelInit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
