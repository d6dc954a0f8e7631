// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 消息总线 (Publish/Subscribe Transport)
///
/// 中继只依赖 `Transport` trait:
/// - MemoryBus:     进程内总线 (测试 / 空跑)
/// - MqttTransport: MQTT broker 客户端
pub mod memory;
pub mod mqtt;

use std::sync::Arc;

use crate::error::Result;

pub use memory::{BusMessage, MemoryBus};
pub use mqtt::MqttTransport;

/// 投递质量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// 订阅回调: (主题, 消息体)
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// 发布/订阅传输
///
/// `publish` 在消息真正交给网络 (写入连接) 后才返回, 可能阻塞;
/// 发布器据此归还在途名额, 调用方自行决定在哪个线程调用
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()>;

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<()>;

    fn is_connected(&self) -> bool {
        true
    }
}
