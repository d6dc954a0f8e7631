// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 消息格式 (帧封包 / INACTIVE 哨兵 / 主题切换通知 / 控制命令)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::iso_timestamp;
use crate::stream::Frame;

/// 1x1 黑色 JPEG, INACTIVE 哨兵中的占位图
const INACTIVE_PLACEHOLDER_B64: &str = "/9j/4AAQSkZJRgABAQEASABIAAD/2wBDAAEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQH/2wBDAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQH/wAARCAABAAEDAREAAhEBAxEB/8QAFQABAQAAAAAAAAAAAAAAAAAAAAv/xAAUEAEAAAAAAAAAAAAAAAAAAAAA/8QAFQEBAQAAAAAAAAAAAAAAAAAAAAX/xAAUEQEAAAAAAAAAAAAAAAAAAAAA/9oADAMBAAIRAxEAPwA/wA//2Q==";

static INACTIVE_PLACEHOLDER: Lazy<Vec<u8>> =
    Lazy::new(|| BASE64.decode(INACTIVE_PLACEHOLDER_B64).unwrap_or_default());

/// 占位图原始字节
pub fn inactive_placeholder() -> &'static [u8] {
    &INACTIVE_PLACEHOLDER
}

/// 二进制帧封包: `<frameId>|<ISO-8601>|<byteLength>|` + JPEG字节
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let header = format!(
        "{}|{}|{}|",
        frame.id,
        iso_timestamp(frame.timestamp),
        frame.len()
    );
    let mut message = Vec::with_capacity(header.len() + frame.len());
    message.extend_from_slice(header.as_bytes());
    message.extend_from_slice(frame.bytes());
    message
}

/// 解析后的二进制帧封包
#[derive(Debug, PartialEq)]
pub struct FrameEnvelope<'a> {
    pub frame_id: &'a str,
    pub timestamp: &'a str,
    pub declared_size: &'a str,
    pub data: &'a [u8],
}

/// 按第三个 `|` 定位图像数据, 不依赖头部里的长度字段
pub fn decode_frame(payload: &[u8]) -> Option<FrameEnvelope<'_>> {
    let mut pipes = payload
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'|')
        .map(|(i, _)| i);
    let p1 = pipes.next()?;
    let p2 = pipes.next()?;
    let p3 = pipes.next()?;

    Some(FrameEnvelope {
        frame_id: std::str::from_utf8(&payload[..p1]).ok()?,
        timestamp: std::str::from_utf8(&payload[p1 + 1..p2]).ok()?,
        declared_size: std::str::from_utf8(&payload[p2 + 1..p3]).ok()?,
        data: &payload[p3 + 1..],
    })
}

/// INACTIVE 哨兵 (JSON), 让订阅端区分"主动停播"与"画面卡住"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InactiveMessage {
    pub frame_id: String,
    pub timestamp: String,
    pub frame_size: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub data: String,
}

impl InactiveMessage {
    pub fn new(now: DateTime<Utc>) -> Self {
        let placeholder = inactive_placeholder();
        Self {
            frame_id: now.timestamp_millis().to_string(),
            timestamp: iso_timestamp(now),
            frame_size: placeholder.len(),
            kind: "inactive".to_string(),
            message: "INACTIVE".to_string(),
            data: BASE64.encode(placeholder),
        }
    }
}

/// 主题切换通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicChangedNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub old_active_topic: String,
    pub new_active_topic: String,
    pub old_video_topic: String,
    pub new_video_topic: String,
    pub video_topic_prefix: String,
    pub timestamp: String,
}

/// 订阅端看到的视频主题消息
#[derive(Debug, PartialEq)]
pub enum StreamMessage<'a> {
    Frame(FrameEnvelope<'a>),
    Inactive(InactiveMessage),
}

impl<'a> StreamMessage<'a> {
    /// 能完整解析为 JSON 哨兵的是 INACTIVE, 否则按二进制封包处理
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        if let Ok(msg) = serde_json::from_slice::<InactiveMessage>(payload) {
            if msg.kind == "inactive" {
                return Some(StreamMessage::Inactive(msg));
            }
        }
        decode_frame(payload).map(StreamMessage::Frame)
    }
}

/// 控制命令解析失败的原因
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRejection {
    NotJson(String),
    MissingTopic,
}

/// 解析控制命令 `{"controlTopic": "<name>"}`, 返回新主题
pub fn parse_control_command(payload: &[u8]) -> Result<String, ControlRejection> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| ControlRejection::NotJson(e.to_string()))?;
    match value.get("controlTopic").and_then(Value::as_str) {
        Some(topic) if !topic.is_empty() => Ok(topic.to_string()),
        _ => Err(ControlRejection::MissingTopic),
    }
}
