// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 中继配置 - 命令行参数 + JSON配置文件

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 摄像头MJPEG中继服务
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "摄像头MJPEG中继 + YOLOv8检测", long_about = None)]
pub struct Args {
    /// JSON配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 摄像头流地址, 覆盖配置文件中的 camera 段 (例: http://192.168.1.100:81/stream)
    #[arg(short = 'u', long)]
    pub camera_url: Option<String>,

    /// MQTT broker 地址 (例: tcp://localhost:1883)
    #[arg(short, long)]
    pub broker: Option<String>,

    /// 初始活动主题
    #[arg(short, long)]
    pub active_topic: Option<String>,

    /// ONNX检测模型路径
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 启用逐帧检测 (需要模型)
    #[arg(long, default_value_t = false)]
    pub detect: bool,

    /// 输出调试日志
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// MQTT broker 连接参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "tcp://localhost:1883".to_string(),
            username: "default".to_string(),
            password: "default".to_string(),
            client_id: "esp32-video-streamer".to_string(),
            keep_alive_secs: 60,
        }
    }
}

/// 摄像头 (MJPEG over HTTP) 地址
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub ip: String,
    pub port: u16,
    pub path: String,
    pub connect_timeout_secs: u64,
    /// 读取空闲超时, 摄像头停止发送超过该时长视为流错误
    pub read_timeout_secs: u64,
    /// 完整URL, 设置后忽略 ip/port/path
    pub url: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.100".to_string(),
            port: 81,
            path: "/stream".to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            url: None,
        }
    }
}

/// 中继参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub video_topic_prefix: String,
    pub active_topic: String,
    pub control_topic: String,
    pub chunk_size: usize,
    pub min_frame_interval_ms: u64, // 0 = 不限流
    pub max_fps: u32,               // 0 = 不限; 设置后覆盖 min_frame_interval_ms
    pub max_in_flight: usize,       // 同时未确认的发布数上限
    pub max_buffer_bytes: usize,    // 解复用缓冲上限
    pub stats_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            video_topic_prefix: "video/esp32".to_string(),
            active_topic: "aircanada".to_string(),
            control_topic: "video/esp32/control".to_string(),
            chunk_size: 8192,
            min_frame_interval_ms: 0,
            max_fps: 0,
            max_in_flight: 1,
            max_buffer_bytes: 100_000,
            stats_interval_secs: 5,
        }
    }
}

/// 检测参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    /// 只保留这些类别, 为空则全部保留
    pub labels: Vec<String>,
    pub analytics_topic: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            input_size: 640,
            labels: vec!["person".to_string()],
            analytics_topic: "video/esp32/analytics".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub broker: BrokerConfig,
    pub camera: CameraConfig,
    pub relay: StreamConfig,
    pub detection: DetectionConfig,
}

impl RelayConfig {
    /// 从JSON文件加载配置, 失败时使用默认值
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("⚠️  配置文件 {} 读取失败: {}, 使用默认值", path.display(), e);
                Self::default()
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// 加载配置文件 (如有) 并应用命令行覆盖
    pub fn from_args(args: &Args) -> Self {
        let mut config = match &args.config {
            Some(path) => Self::load(path),
            None => Self::default(),
        };
        if let Some(url) = &args.camera_url {
            config.camera.url = Some(url.clone());
        }
        if let Some(broker) = &args.broker {
            config.broker.host = broker.clone();
        }
        if let Some(topic) = &args.active_topic {
            config.relay.active_topic = topic.clone();
        }
        if let Some(model) = &args.model {
            config.detection.model_path = Some(model.clone());
        }
        config
    }

    pub fn camera_url(&self) -> String {
        match &self.camera.url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}:{}{}",
                self.camera.ip, self.camera.port, self.camera.path
            ),
        }
    }

    /// 帧间最小间隔; `max_fps` 优先
    pub fn min_frame_interval(&self) -> Duration {
        if self.relay.max_fps > 0 {
            Duration::from_millis(1000 / self.relay.max_fps as u64)
        } else {
            Duration::from_millis(self.relay.min_frame_interval_ms)
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.relay.stats_interval_secs.max(1))
    }
}
